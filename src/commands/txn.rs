/*!
 * MULTI/EXEC transactions. Queueing itself happens in the connection step;
 * these handlers only flip the client mode and run the queued batch.
 */

use super::{client_of, CommandError};
use crate::protocol::Reply;
use crate::server::{Mode, Server};

/// `MULTI` — enters queueing mode.
pub fn multi(srv: &mut Server, addr: &str, _argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let info = client_of(srv, addr)?;
    if info.mode == Mode::Multi {
        return Err(CommandError::err("MULTI calls can not be nested"));
    }
    info.mode = Mode::Multi;
    Ok(Reply::ok())
}

/// `EXEC` — leaves queueing mode and runs the queued commands in insertion
/// order as one uninterrupted batch. Failures of individual commands become
/// elements of the array reply instead of aborting it.
pub fn exec(srv: &mut Server, addr: &str, _argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let queued = {
        let info = client_of(srv, addr)?;
        if info.mode != Mode::Multi {
            return Err(CommandError::err("EXEC without MULTI"));
        }
        info.mode = Mode::Normal;
        std::mem::take(&mut info.queue)
    };

    let mut replies = Vec::with_capacity(queued.len());
    for argv in &queued {
        match srv.dispatch(addr, argv) {
            Ok(reply) => replies.push(reply),
            Err(err) => replies.push(err.into_reply()),
        }
    }
    Ok(Reply::Array(replies))
}

/// `DISCARD` — leaves queueing mode and drops the queue.
pub fn discard(srv: &mut Server, addr: &str, _argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let info = client_of(srv, addr)?;
    if info.mode != Mode::Multi {
        return Err(CommandError::err("DISCARD without MULTI"));
    }
    info.mode = Mode::Normal;
    info.queue.clear();
    Ok(Reply::ok())
}
