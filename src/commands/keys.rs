/*!
 * Key lifecycle commands: deletion, expiry management, DUMP/RESTORE,
 * database selection and flushing.
 */

use super::{client_of, parse_i64, CommandError};
use crate::protocol::Reply;
use crate::server::Server;
use crate::storage::{now_secs, Object};

/// `DEL key [key ...]` — counts the keys actually removed; entries that
/// already expired count as absent.
pub fn del(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    let mut removed = 0i64;
    for key in &argv[1..] {
        if db.get(key).is_some() && db.remove(key) {
            removed += 1;
        }
    }
    Ok(Reply::Int(removed))
}

fn apply_expiry(srv: &mut Server, addr: &str, key: &[u8], at: f64) -> Reply {
    let db = srv.client_db(addr);
    match db.get_mut(key) {
        Some(obj) => {
            obj.expire_at = Some(at);
            Reply::Int(1)
        }
        None => Reply::Int(0),
    }
}

/// `EXPIRE key seconds`
pub fn expire(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let secs = parse_i64(&argv[2])?;
    Ok(apply_expiry(srv, addr, &argv[1], now_secs() + secs as f64))
}

/// `EXPIREAT key timestamp` — absolute Unix seconds.
pub fn expireat(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let at = parse_i64(&argv[2])?;
    Ok(apply_expiry(srv, addr, &argv[1], at as f64))
}

/// `PEXPIRE key milliseconds`
pub fn pexpire(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ms = parse_i64(&argv[2])?;
    Ok(apply_expiry(srv, addr, &argv[1], now_secs() + ms as f64 / 1000.0))
}

/// `PEXPIREAT key milliseconds-timestamp` — absolute Unix milliseconds.
pub fn pexpireat(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ms = parse_i64(&argv[2])?;
    Ok(apply_expiry(srv, addr, &argv[1], ms as f64 / 1000.0))
}

/// `PERSIST key` — clears the expiry, turning the key persistent again.
pub fn persist(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => {
            obj.expire_at = None;
            Ok(Reply::Int(1))
        }
        None => Ok(Reply::Int(0)),
    }
}

/// `DUMP key` — opaque self-describing serialization of the stored object,
/// nil for a missing key. Not RDB-compatible; [`restore`] is its inverse.
pub fn dump(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Nil),
        Some(obj) => {
            let payload = serde_json::to_vec(obj)
                .map_err(|_| CommandError::err("DUMP serialization failed"))?;
            Ok(Reply::Bulk(payload))
        }
    }
}

/// `RESTORE key ttl serialized-value` — ttl is relative milliseconds,
/// 0 meaning no expiry; refuses to overwrite an existing key.
pub fn restore(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let ttl = parse_i64(&argv[2])?;
    if ttl < 0 {
        return Err(CommandError::err("Invalid TTL value, must be >= 0"));
    }
    let obj: Object = serde_json::from_slice(&argv[3])
        .map_err(|_| CommandError::err("Bad data format"))?;

    let db = srv.client_db(addr);
    if db.contains(&argv[1]) {
        return Err(CommandError::new("BUSYKEY", "Target key name already exists"));
    }
    let expire_at = (ttl > 0).then(|| now_secs() + ttl as f64 / 1000.0);
    db.set(argv[1].clone(), obj.with_expiry(expire_at));
    Ok(Reply::ok())
}

/// `ECHO message`
pub fn echo(_srv: &mut Server, _addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    Ok(Reply::Bulk(argv[1].clone()))
}

/// `FLUSHDB` — clears the client's current database.
pub fn flushdb(srv: &mut Server, addr: &str, _argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    srv.client_db(addr).flush();
    Ok(Reply::ok())
}

/// `FLUSHALL` — clears every database.
pub fn flushall(srv: &mut Server, _addr: &str, _argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    for db in srv.databases_mut() {
        db.flush();
    }
    Ok(Reply::ok())
}

/// `SELECT index` — switches the connection's database, creating it on
/// first use.
pub fn select(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let index = std::str::from_utf8(&argv[1])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| CommandError::err("invalid DB index"))?;
    srv.database(index);
    client_of(srv, addr)?.db = index;
    Ok(Reply::ok())
}
