/*!
 * List commands
 *
 * Negative indices count from the tail. Range commands clamp out-of-range
 * requests; positional commands answer nil or an index error as each
 * operation documents.
 */

use super::{parse_i64, CommandError};
use crate::protocol::Reply;
use crate::server::Server;
use crate::storage::{ListValue, Object, Value};

/// `LPUSH key value [value ...]` — each value becomes the new head in
/// argument order, so `LPUSH k a b c` leaves the list `c b a`.
pub fn lpush(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::List(list) => {
                for value in &argv[2..] {
                    list.push_head(value.clone());
                }
                Ok(Reply::Int(list.len() as i64))
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let mut list = ListValue::new();
            for value in &argv[2..] {
                list.push_head(value.clone());
            }
            let len = list.len() as i64;
            db.set(argv[1].clone(), Object::list(list));
            Ok(Reply::Int(len))
        }
    }
}

/// `LPUSHX key value` — no-op answering 0 when the key is absent.
pub fn lpushx(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => match &mut obj.value {
            Value::List(list) => {
                list.push_head(argv[2].clone());
                Ok(Reply::Int(list.len() as i64))
            }
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LPOP key` — nil when the key is absent or the list is empty.
pub fn lpop(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Ok(Reply::Nil),
        Some(obj) => match &mut obj.value {
            Value::List(list) => match list.pop(0) {
                Some(value) => Ok(Reply::Bulk(value)),
                None => Ok(Reply::Nil),
            },
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LINDEX key index` — nil when out of range.
pub fn lindex(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let index = parse_i64(&argv[2])?;
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Nil),
        Some(obj) => match &obj.value {
            Value::List(list) => {
                let n = list.len() as i64;
                let i = if index < 0 { n + index } else { index };
                if i < 0 || i >= n {
                    return Ok(Reply::Nil);
                }
                Ok(list
                    .get(i as usize)
                    .map(|v| Reply::Bulk(v.clone()))
                    .unwrap_or(Reply::Nil))
            }
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LLEN key` — 0 for a missing key.
pub fn llen(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => match &obj.value {
            Value::List(list) => Ok(Reply::Int(list.len() as i64)),
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LRANGE key start stop` — inclusive range, empty array when out of
/// range or the key is absent.
pub fn lrange(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Array(Vec::new())),
        Some(obj) => match &obj.value {
            Value::List(list) => Ok(Reply::Array(
                list.range(start, stop).into_iter().map(Reply::Bulk).collect(),
            )),
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LSET key index value` — errors when the key is absent or the index is
/// beyond bounds.
pub fn lset(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let index = parse_i64(&argv[2])?;
    let out_of_range = || CommandError::err("index out of range");
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Err(out_of_range()),
        Some(obj) => match &mut obj.value {
            Value::List(list) => {
                let n = list.len() as i64;
                let i = if index < 0 { n + index } else { index };
                if i < 0 || i >= n || !list.set(i as usize, argv[3].clone()) {
                    return Err(out_of_range());
                }
                Ok(Reply::ok())
            }
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LTRIM key start stop` — keeps only the inclusive range; a missing key
/// is already trimmed.
pub fn ltrim(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Ok(Reply::ok()),
        Some(obj) => match &mut obj.value {
            Value::List(list) => {
                list.trim(start, stop);
                Ok(Reply::ok())
            }
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LINSERT key BEFORE|AFTER pivot value` — -1 when the pivot is absent,
/// nil when the key is absent.
pub fn linsert(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let after = match argv[2].to_ascii_uppercase().as_slice() {
        b"BEFORE" => false,
        b"AFTER" => true,
        _ => return Err(CommandError::syntax()),
    };
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Ok(Reply::Nil),
        Some(obj) => match &mut obj.value {
            Value::List(list) => match list.position(&argv[3]) {
                None => Ok(Reply::Int(-1)),
                Some(i) => {
                    list.insert(if after { i + 1 } else { i }, argv[4].clone());
                    Ok(Reply::Int(list.len() as i64))
                }
            },
            _ => Err(CommandError::wrong_type()),
        },
    }
}

/// `LREM key count value` — count > 0 removes head-to-tail, count < 0
/// tail-to-head, count 0 removes all; answers the number removed.
pub fn lrem(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let count = parse_i64(&argv[2])?;
    let value = &argv[3];
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => match &mut obj.value {
            Value::List(list) => {
                let limit = if count == 0 {
                    usize::MAX
                } else {
                    count.unsigned_abs() as usize
                };
                let mut removed = 0usize;
                if count < 0 {
                    let mut i = list.len();
                    while i > 0 && removed < limit {
                        i -= 1;
                        if list.get(i).map(|v| v.as_slice()) == Some(value.as_slice()) {
                            list.pop(i);
                            removed += 1;
                        }
                    }
                } else {
                    let mut i = 0;
                    while i < list.len() && removed < limit {
                        if list.get(i).map(|v| v.as_slice()) == Some(value.as_slice()) {
                            list.pop(i);
                            removed += 1;
                        } else {
                            i += 1;
                        }
                    }
                }
                Ok(Reply::Int(removed as i64))
            }
            _ => Err(CommandError::wrong_type()),
        },
    }
}
