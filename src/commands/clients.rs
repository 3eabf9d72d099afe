/*!
 * CLIENT subcommands: connection introspection and administration.
 */

use super::{client_of, CommandError};
use crate::protocol::Reply;
use crate::server::Server;
use smol_str::SmolStr;

fn usage() -> CommandError {
    CommandError::err(
        "Syntax error, try CLIENT (LIST | KILL ip:port | GETNAME | SETNAME connection-name)",
    )
}

/// `CLIENT <LIST | KILL ip:port | GETNAME | SETNAME name | PAUSE ms>`
pub fn client(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    match argv[1].to_ascii_uppercase().as_slice() {
        b"KILL" => kill(srv, argv),
        b"LIST" => list(srv, argv),
        b"GETNAME" => getname(srv, addr, argv),
        b"SETNAME" => setname(srv, addr, argv),
        b"PAUSE" => pause(argv),
        _ => Err(usage()),
    }
}

/// `CLIENT KILL ip:port` — marks the named peer; the event loop closes its
/// transport after the current command completes.
fn kill(srv: &mut Server, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() != 3 {
        return Err(usage());
    }
    let target = String::from_utf8_lossy(&argv[2]).into_owned();
    if srv.request_kill(&target) {
        Ok(Reply::ok())
    } else {
        Err(CommandError::err("No such client"))
    }
}

/// `CLIENT LIST` — one `key=value` line per connection, lines joined
/// with `\r`.
fn list(srv: &mut Server, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() != 2 {
        return Err(usage());
    }
    Ok(Reply::Bulk(srv.client_list().into_bytes()))
}

/// `CLIENT GETNAME` — nil until a name has been assigned.
fn getname(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() != 2 {
        return Err(usage());
    }
    match client_of(srv, addr)?.name.clone() {
        Some(name) => Ok(Reply::Bulk(name.as_bytes().to_vec())),
        None => Ok(Reply::Nil),
    }
}

/// `CLIENT SETNAME name` — the name shows up in CLIENT LIST, so spaces and
/// control bytes are rejected; an empty name clears it.
fn setname(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() != 3 {
        return Err(usage());
    }
    let name = &argv[2];
    if name.iter().any(|b| !b.is_ascii_graphic()) {
        return Err(CommandError::err(
            "Client names cannot contain spaces, newlines or special characters.",
        ));
    }
    let info = client_of(srv, addr)?;
    info.name = if name.is_empty() {
        None
    } else {
        Some(SmolStr::new(String::from_utf8_lossy(name)))
    };
    Ok(Reply::ok())
}

/// `CLIENT PAUSE milliseconds` — accepted syntactically; pausing itself is
/// not implemented.
fn pause(argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() != 3 {
        return Err(usage());
    }
    std::str::from_utf8(&argv[2])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| CommandError::err("timeout is not an integer or out of range"))?;
    Ok(Reply::ok())
}
