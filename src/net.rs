/*!
 * Network layer and event loop
 *
 * A single mio poll loop on one thread hosts the listener and every
 * accepted connection. Commands execute inline on the loop thread between
 * readiness events, so each command runs to completion atomically with
 * respect to all other connections and a MULTI batch is never interleaved.
 * A connection with a partial request simply leaves the bytes in its read
 * buffer until more arrive.
 */

use crate::protocol::{parse_request, resp_error, resp_simple};
use crate::server::{Config, Server, Step};
use anyhow::Result;
use bytes::BytesMut;
use hashbrown::HashMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

/// Size of the stack buffer used per read call.
const READ_BUF: usize = 4096;

const LISTENER: Token = Token(0);

/// Bind the listening socket with SO_REUSEADDR so restarts do not trip
/// over sockets in TIME_WAIT.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Per-connection I/O state. Everything commands can observe about the
/// client lives in the server registry instead.
struct Conn {
    sock: TcpStream,
    addr: String,
    rbuf: BytesMut,
    wbuf: BytesMut,
    /// Stop reading and close once the write buffer drains.
    closing: bool,
}

/// Run the server event loop. Blocks until the process is interrupted.
pub fn run(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let mut server = Server::new(config);

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);
    let mut listener = bind_listener(addr)?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;
    log::info!("listening on {addr}");

    let mut conns: HashMap<usize, Conn> = HashMap::new();
    let mut next_token: usize = 1;

    loop {
        poll.poll(&mut events, Some(Duration::from_millis(200)))?;

        for ev in events.iter() {
            match ev.token() {
                LISTENER => loop {
                    match listener.accept() {
                        Ok((mut sock, peer)) => {
                            sock.set_nodelay(true).ok();
                            let token = next_token;
                            next_token += 1;
                            poll.registry().register(
                                &mut sock,
                                Token(token),
                                Interest::READABLE | Interest::WRITABLE,
                            )?;
                            let peer_addr = peer.to_string();
                            server.connect_client(&peer_addr, token);
                            log::info!("client {peer_addr} connected");
                            conns.insert(
                                token,
                                Conn {
                                    sock,
                                    addr: peer_addr,
                                    rbuf: BytesMut::with_capacity(READ_BUF),
                                    wbuf: BytesMut::new(),
                                    closing: false,
                                },
                            );
                        }
                        Err(ref e) if would_block(e) => break,
                        Err(e) => {
                            log::warn!("accept error: {e}");
                            break;
                        }
                    }
                },

                Token(token) => {
                    let mut drop_conn = false;
                    if let Some(conn) = conns.get_mut(&token) {
                        if ev.is_readable() && !conn.closing {
                            drop_conn = read_into(conn);
                            if !drop_conn {
                                process(&mut server, conn);
                            }
                        }
                        if !drop_conn {
                            drop_conn = flush(conn);
                        }
                        if conn.closing && conn.wbuf.is_empty() {
                            drop_conn = true;
                        }
                    }
                    if drop_conn {
                        close_conn(&mut server, &poll, &mut conns, token);
                    }
                }
            }
        }

        // Administrative kills requested by CLIENT KILL: drain pending
        // output best-effort, then close the victim's transport. Its own
        // loop iteration never runs again, which is the asynchronous close
        // the command promises.
        for victim in server.drain_kills() {
            let found = conns
                .iter()
                .find(|(_, conn)| conn.addr == victim)
                .map(|(token, _)| *token);
            if let Some(token) = found {
                if let Some(conn) = conns.get_mut(&token) {
                    let _ = flush(conn);
                }
                log::info!("client {victim} killed");
                close_conn(&mut server, &poll, &mut conns, token);
            }
        }
    }
}

/// Drain the socket into the connection's read buffer. True means the peer
/// is gone and the connection should be dropped.
fn read_into(conn: &mut Conn) -> bool {
    let mut tmp = [0u8; READ_BUF];
    loop {
        match conn.sock.read(&mut tmp) {
            Ok(0) => return true,
            Ok(n) => conn.rbuf.extend_from_slice(&tmp[..n]),
            Err(ref e) if would_block(e) => return false,
            Err(_) => return true,
        }
    }
}

/// Execute every complete request sitting in the read buffer.
fn process(server: &mut Server, conn: &mut Conn) {
    while !conn.closing {
        match parse_request(&mut conn.rbuf) {
            Ok(None) => break,
            Ok(Some(argv)) => {
                if let Some(info) = server.client_mut(&conn.addr) {
                    info.qbuf = conn.rbuf.len();
                    info.qbuf_free = conn.rbuf.capacity() - conn.rbuf.len();
                    info.omem = conn.wbuf.len();
                }
                match server.step(&conn.addr, &argv) {
                    Step::Reply(reply) => conn.wbuf.extend_from_slice(&reply.encode()),
                    Step::Continue => {}
                    Step::Quit => {
                        conn.wbuf.extend_from_slice(&resp_simple("OK"));
                        conn.closing = true;
                    }
                }
            }
            Err(err) => {
                log::debug!("client {}: protocol error: {err}", conn.addr);
                conn.wbuf
                    .extend_from_slice(&resp_error("ERR", &format!("Protocol error: {err}")));
                conn.closing = true;
            }
        }
    }
}

/// Write as much buffered output as the socket accepts. True on a fatal
/// write error.
fn flush(conn: &mut Conn) -> bool {
    while !conn.wbuf.is_empty() {
        match conn.sock.write(&conn.wbuf) {
            Ok(0) => return true,
            Ok(n) => {
                let _ = conn.wbuf.split_to(n);
            }
            Err(ref e) if would_block(e) => return false,
            Err(_) => return true,
        }
    }
    false
}

fn close_conn(
    server: &mut Server,
    poll: &Poll,
    conns: &mut HashMap<usize, Conn>,
    token: usize,
) {
    if let Some(mut conn) = conns.remove(&token) {
        let _ = poll.registry().deregister(&mut conn.sock);
        server.disconnect_client(&conn.addr);
        log::info!("client {} exiting", conn.addr);
    }
}

/// Non-blocking I/O conditions that mean "try again later".
#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
