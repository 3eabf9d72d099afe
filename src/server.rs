/*!
 * Server state and per-request execution
 *
 * `Server` owns the numbered databases, the registry of live clients keyed
 * by `host:port`, and the command table. The event loop drives it through
 * [`Server::step`], which applies the connection rules (QUIT
 * short-circuit, MULTI queueing) before handing the request to
 * [`Server::dispatch`]. All execution is synchronous; nothing here touches
 * a socket.
 */

use crate::commands::{self, CommandError, CommandSpec};
use crate::protocol::Reply;
use crate::storage::{now_secs, Database};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use hashbrown::HashMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use thiserror::Error;

/// Runtime configuration, normally built from command-line flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Store values that parse as base-10 integers in canonical ASCII form
    /// (SET/GETSET/APPEND). Off by default: raw bytes are kept as sent.
    pub coerce_integers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            coerce_integers: false,
        }
    }
}

/// Per-connection execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Multi,
}

/// Registry entry for one live connection. The I/O state machine lives in
/// the event loop; everything commands can observe about a client is here.
#[derive(Debug)]
pub struct ClientInfo {
    pub token: usize,
    pub name: Option<SmolStr>,
    pub db: u32,
    pub mode: Mode,
    pub queue: Vec<Vec<Vec<u8>>>,
    pub conn_time: f64,
    pub last_active: f64,
    pub idle_time: f64,
    pub last_cmd: SmolStr,
    pub kill: bool,
    /// Buffer sizes mirrored from the connection for CLIENT LIST.
    pub qbuf: usize,
    pub qbuf_free: usize,
    pub omem: usize,
}

impl ClientInfo {
    fn new(token: usize) -> Self {
        let now = now_secs();
        ClientInfo {
            token,
            name: None,
            db: 0,
            mode: Mode::Normal,
            queue: Vec::new(),
            conn_time: now,
            last_active: now,
            idle_time: 0.0,
            last_cmd: SmolStr::default(),
            kill: false,
            qbuf: 0,
            qbuf_free: 0,
            omem: 0,
        }
    }
}

/// Dispatch-level failures; both keep the connection open.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    CommandNotFound(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl DispatchError {
    pub fn into_reply(self) -> Reply {
        match self {
            DispatchError::CommandNotFound(name) => {
                Reply::error("ERR", format!("unknown command '{name}'"))
            }
            DispatchError::Command(err) => err.into_reply(),
        }
    }
}

/// What the connection should do after one request.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Write the reply and keep reading.
    Reply(Reply),
    /// Nothing to write; keep reading. Produced by an empty request.
    Continue,
    /// Acknowledge with `+OK` and close the transport.
    Quit,
}

/// The process-wide server state.
pub struct Server {
    pub config: Config,
    dbs: HashMap<u32, Database>,
    clients: HashMap<String, ClientInfo>,
    commands: FxHashMap<Vec<u8>, CommandSpec>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let mut commands = FxHashMap::default();
        commands::register_all(&mut commands);
        let mut dbs = HashMap::new();
        dbs.insert(0, Database::new());
        Server {
            config,
            dbs,
            clients: HashMap::new(),
            commands,
        }
    }

    /// Database by number, created on first use. Database 0 always exists.
    pub fn database(&mut self, id: u32) -> &mut Database {
        self.dbs.entry(id).or_insert_with(Database::new)
    }

    pub fn databases_mut(&mut self) -> impl Iterator<Item = &mut Database> {
        self.dbs.values_mut()
    }

    /// The database currently selected by `addr`.
    pub fn client_db(&mut self, addr: &str) -> &mut Database {
        let id = self.clients.get(addr).map(|c| c.db).unwrap_or(0);
        self.database(id)
    }

    pub fn connect_client(&mut self, addr: &str, token: usize) {
        self.clients.insert(addr.to_string(), ClientInfo::new(token));
    }

    pub fn disconnect_client(&mut self, addr: &str) {
        self.clients.remove(addr);
    }

    pub fn client(&self, addr: &str) -> Option<&ClientInfo> {
        self.clients.get(addr)
    }

    pub fn client_mut(&mut self, addr: &str) -> Option<&mut ClientInfo> {
        self.clients.get_mut(addr)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Flag the named peer for closure; false when no such client exists.
    pub fn request_kill(&mut self, addr: &str) -> bool {
        match self.clients.get_mut(addr) {
            Some(info) => {
                info.kill = true;
                true
            }
            None => false,
        }
    }

    /// Collect and clear pending kill requests.
    pub fn drain_kills(&mut self) -> Vec<String> {
        self.clients
            .iter_mut()
            .filter_map(|(addr, info)| {
                if info.kill {
                    info.kill = false;
                    Some(addr.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// One CLIENT LIST line per connection, ordered by token, joined
    /// with `\r`.
    pub fn client_list(&self) -> String {
        let mut entries: Vec<(&String, &ClientInfo)> = self.clients.iter().collect();
        entries.sort_by_key(|(_, info)| info.token);
        let now = now_secs();
        let lines: Vec<String> = entries
            .iter()
            .map(|(addr, c)| {
                let multi = match c.mode {
                    Mode::Multi => c.queue.len() as i64,
                    Mode::Normal => -1,
                };
                let events = if c.omem > 0 { "rw" } else { "r" };
                format!(
                    "addr={addr} fd={fd} name={name} age={age} idle={idle} flags=N db={db} \
                     sub=0 psub=0 multi={multi} qbuf={qbuf} qbuf-free={qbuf_free} obl=0 oll=0 \
                     omem={omem} events={events} cmd={cmd}",
                    fd = c.token,
                    name = c.name.as_deref().unwrap_or(""),
                    age = (now - c.conn_time) as i64,
                    idle = c.idle_time as i64,
                    db = c.db,
                    qbuf = c.qbuf,
                    qbuf_free = c.qbuf_free,
                    omem = c.omem,
                    cmd = c.last_cmd,
                )
            })
            .collect();
        lines.join("\r")
    }

    /// Look up and invoke the handler for `argv`. Arity is checked before
    /// the handler runs.
    pub fn dispatch(&mut self, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, DispatchError> {
        let Some(first) = argv.first() else {
            return Err(DispatchError::CommandNotFound(String::new()));
        };
        let name = first.to_ascii_lowercase();
        let Some(spec) = self.commands.get(name.as_slice()).copied() else {
            return Err(DispatchError::CommandNotFound(
                String::from_utf8_lossy(&name).into_owned(),
            ));
        };
        let display = String::from_utf8_lossy(&name).into_owned();
        spec.arity.check(argv.len() - 1, &display)?;
        Ok((spec.handler)(self, addr, argv)?)
    }

    /// One request exactly as the connection state machine sees it: skip
    /// empty requests, account idle time, intercept QUIT, queue under MULTI
    /// (EXEC, DISCARD and a nested MULTI pass through so the latter can
    /// fail), otherwise dispatch and map failures to error replies.
    pub fn step(&mut self, addr: &str, argv: &[Vec<u8>]) -> Step {
        if argv.is_empty() {
            return Step::Continue;
        }
        if let Some(info) = self.clients.get_mut(addr) {
            let now = now_secs();
            info.idle_time += now - info.last_active;
            info.last_active = now;
        }
        if argv[0].eq_ignore_ascii_case(b"quit") {
            return Step::Quit;
        }

        let queue_it = self
            .clients
            .get(addr)
            .map(|c| c.mode == Mode::Multi)
            .unwrap_or(false)
            && !argv[0].eq_ignore_ascii_case(b"exec")
            && !argv[0].eq_ignore_ascii_case(b"discard")
            && !argv[0].eq_ignore_ascii_case(b"multi");

        let reply = if queue_it {
            if let Some(info) = self.clients.get_mut(addr) {
                info.queue.push(argv.to_vec());
            }
            Reply::queued()
        } else {
            match self.dispatch(addr, argv) {
                Ok(reply) => reply,
                Err(err) => err.into_reply(),
            }
        };

        if let Some(info) = self.clients.get_mut(addr) {
            info.last_cmd = SmolStr::new(String::from_utf8_lossy(&argv[0]));
        }
        Step::Reply(reply)
    }
}
