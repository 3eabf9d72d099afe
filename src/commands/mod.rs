/*!
 * Command registry
 *
 * Commands are registered in an explicit table built at server startup:
 * lowercase name -> (handler fn, arity rule). The dispatcher checks arity
 * before the handler runs, so handlers can index their fixed arguments
 * directly. Handlers are plain functions over `(&mut Server, client addr,
 * argv)`; they never touch the socket and report failures as
 * `CommandError` values.
 */

use crate::protocol::Reply;
use crate::server::{ClientInfo, Server};
use crate::storage::Object;
use rustc_hash::FxHashMap;
use thiserror::Error;

pub mod clients;
pub mod keys;
pub mod lists;
pub mod strings;
pub mod txn;

/// A validated semantic failure, rendered as `-<KIND> <message>`.
/// The connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {message}")]
pub struct CommandError {
    pub kind: String,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CommandError {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Plain `ERR`-kind failure.
    pub fn err(message: impl Into<String>) -> Self {
        CommandError::new("ERR", message)
    }

    pub fn syntax() -> Self {
        CommandError::err("syntax error")
    }

    pub fn wrong_type() -> Self {
        CommandError::new(
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value",
        )
    }

    pub fn not_integer() -> Self {
        CommandError::err("value is not an integer or out of range")
    }

    pub fn into_reply(self) -> Reply {
        Reply::Error {
            kind: self.kind,
            message: self.message,
        }
    }
}

pub type Handler = fn(&mut Server, &str, &[Vec<u8>]) -> Result<Reply, CommandError>;

/// Argument-count rule, checked against argc excluding the command name.
#[derive(Debug, Clone, Copy)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn check(self, nargs: usize, name: &str) -> Result<(), CommandError> {
        let ok = match self {
            Arity::Exact(n) => nargs == n,
            Arity::AtLeast(n) => nargs >= n,
        };
        if ok {
            Ok(())
        } else {
            Err(CommandError::err(format!(
                "wrong number of arguments for '{name}' command"
            )))
        }
    }
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub handler: Handler,
    pub arity: Arity,
}

/// Build the full command table. QUIT is absent on purpose: the connection
/// step intercepts it before dispatch.
pub fn register_all(table: &mut FxHashMap<Vec<u8>, CommandSpec>) {
    let mut reg = |name: &str, arity: Arity, handler: Handler| {
        table.insert(name.as_bytes().to_vec(), CommandSpec { handler, arity });
    };

    // strings & bitmaps
    reg("set", Arity::AtLeast(2), strings::set);
    reg("setnx", Arity::Exact(2), strings::setnx);
    reg("setex", Arity::Exact(3), strings::setex);
    reg("setrange", Arity::Exact(3), strings::setrange);
    reg("get", Arity::Exact(1), strings::get);
    reg("getset", Arity::Exact(2), strings::getset);
    reg("getrange", Arity::Exact(3), strings::getrange);
    reg("strlen", Arity::Exact(1), strings::strlen);
    reg("append", Arity::Exact(2), strings::append);
    reg("incr", Arity::Exact(1), strings::incr);
    reg("decr", Arity::Exact(1), strings::decr);
    reg("incrby", Arity::Exact(2), strings::incrby);
    reg("decrby", Arity::Exact(2), strings::decrby);
    reg("incrbyfloat", Arity::Exact(2), strings::incrbyfloat);
    reg("getbit", Arity::Exact(2), strings::getbit);
    reg("setbit", Arity::Exact(3), strings::setbit);
    reg("bitcount", Arity::AtLeast(1), strings::bitcount);
    reg("bitpos", Arity::AtLeast(2), strings::bitpos);
    reg("bitop", Arity::AtLeast(3), strings::bitop);

    // lists
    reg("lpush", Arity::AtLeast(2), lists::lpush);
    reg("lpushx", Arity::Exact(2), lists::lpushx);
    reg("lpop", Arity::Exact(1), lists::lpop);
    reg("lindex", Arity::Exact(2), lists::lindex);
    reg("llen", Arity::Exact(1), lists::llen);
    reg("lrange", Arity::Exact(3), lists::lrange);
    reg("lset", Arity::Exact(3), lists::lset);
    reg("ltrim", Arity::Exact(3), lists::ltrim);
    reg("linsert", Arity::Exact(4), lists::linsert);
    reg("lrem", Arity::Exact(3), lists::lrem);

    // key lifecycle and misc
    reg("del", Arity::AtLeast(1), keys::del);
    reg("expire", Arity::Exact(2), keys::expire);
    reg("expireat", Arity::Exact(2), keys::expireat);
    reg("pexpire", Arity::Exact(2), keys::pexpire);
    reg("pexpireat", Arity::Exact(2), keys::pexpireat);
    reg("persist", Arity::Exact(1), keys::persist);
    reg("dump", Arity::Exact(1), keys::dump);
    reg("restore", Arity::Exact(3), keys::restore);
    reg("echo", Arity::Exact(1), keys::echo);
    reg("flushdb", Arity::Exact(0), keys::flushdb);
    reg("flushall", Arity::Exact(0), keys::flushall);
    reg("select", Arity::Exact(1), keys::select);

    // transactions
    reg("multi", Arity::Exact(0), txn::multi);
    reg("exec", Arity::Exact(0), txn::exec);
    reg("discard", Arity::Exact(0), txn::discard);

    // connection introspection
    reg("client", Arity::AtLeast(1), clients::client);
}

/// Integer view over a command argument or a stored string payload.
pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(CommandError::not_integer)
}

/// Registry entry for the calling connection; every dispatched command runs
/// on behalf of a registered client.
pub(crate) fn client_of<'a>(
    srv: &'a mut Server,
    addr: &str,
) -> Result<&'a mut ClientInfo, CommandError> {
    srv.client_mut(addr)
        .ok_or_else(|| CommandError::err("unknown client"))
}

/// Apply the optional integer normalization to a value about to be stored
/// as a string.
pub(crate) fn store_bytes(coerce: bool, value: &[u8]) -> Vec<u8> {
    if coerce {
        if let Some(n) = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
        {
            return n.to_string().into_bytes();
        }
    }
    value.to_vec()
}

/// Borrow the string payload of an object, or fail with `WRONGTYPE`.
pub(crate) fn str_payload(obj: &Object) -> Result<&Vec<u8>, CommandError> {
    match &obj.value {
        crate::storage::Value::Str(b) => Ok(b),
        _ => Err(CommandError::wrong_type()),
    }
}
