/*!
 * String and bitmap commands
 *
 * The string slot doubles as the integer, decimal and bitmap
 * representation; numeric access parses on demand and writes back the
 * canonical base-10 ASCII form. Bit offsets count from the most
 * significant bit of byte 0.
 */

use super::{parse_i64, store_bytes, str_payload, CommandError};
use crate::protocol::Reply;
use crate::server::Server;
use crate::storage::{now_secs, Object, Value};
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// `SET key value [EX seconds] [PX milliseconds] [NX|XX]`
///
/// EX and PX are additive contributions to an expiry baseline taken at
/// command time. NX against an existing key and XX against a missing key
/// answer nil without writing.
pub fn set(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let key = &argv[1];
    let mut expire_at: Option<f64> = None;
    let mut nx = false;
    let mut xx = false;

    let mut i = 3;
    while i < argv.len() {
        match argv[i].to_ascii_lowercase().as_slice() {
            b"ex" => {
                let secs = option_int(argv, i)?;
                *expire_at.get_or_insert_with(now_secs) += secs as f64;
                i += 1;
            }
            b"px" => {
                let ms = option_int(argv, i)?;
                *expire_at.get_or_insert_with(now_secs) += ms as f64 / 1000.0;
                i += 1;
            }
            b"nx" => nx = true,
            b"xx" => xx = true,
            _ => return Err(CommandError::syntax()),
        }
        i += 1;
    }
    if nx && xx {
        return Err(CommandError::syntax());
    }

    let bytes = store_bytes(srv.config.coerce_integers, &argv[2]);
    let db = srv.client_db(addr);
    if nx && db.contains(key) {
        return Ok(Reply::Nil);
    }
    if xx && !db.contains(key) {
        return Ok(Reply::Nil);
    }
    db.set(key.clone(), Object::string(bytes).with_expiry(expire_at));
    Ok(Reply::ok())
}

/// Value of the option at `i`; missing or non-integer values are a syntax
/// error, matching SET's option parser.
fn option_int(argv: &[Vec<u8>], i: usize) -> Result<i64, CommandError> {
    argv.get(i + 1)
        .and_then(|arg| std::str::from_utf8(arg).ok())
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(CommandError::syntax)
}

/// `SETNX key value`
pub fn setnx(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    if db.contains(&argv[1]) {
        return Ok(Reply::Int(0));
    }
    db.set(argv[1].clone(), Object::string(argv[2].clone()));
    Ok(Reply::Int(1))
}

/// `SETEX key seconds value`
pub fn setex(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let secs = parse_i64(&argv[2])?;
    if secs <= 0 {
        return Err(CommandError::err("invalid expire time in SETEX"));
    }
    let db = srv.client_db(addr);
    db.set(
        argv[1].clone(),
        Object::string(argv[3].clone()).with_expiry(Some(now_secs() + secs as f64)),
    );
    Ok(Reply::ok())
}

/// `SETRANGE key offset value`
///
/// Preserves the prefix before `offset` and any suffix beyond the overlay;
/// a gap is padded with zero bytes. Returns the resulting length.
pub fn setrange(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = parse_i64(&argv[2])?;
    if offset < 0 {
        return Err(CommandError::err("offset is out of range"));
    }
    let offset = offset as usize;
    let value = &argv[3];

    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => {
                if b.len() < offset + value.len() {
                    b.resize(offset + value.len(), 0);
                }
                b[offset..offset + value.len()].copy_from_slice(value);
                Ok(Reply::Int(b.len() as i64))
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let mut b = vec![0u8; offset];
            b.extend_from_slice(value);
            let len = b.len() as i64;
            db.set(argv[1].clone(), Object::string(b));
            Ok(Reply::Int(len))
        }
    }
}

/// `GET key`
pub fn get(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Nil),
        Some(obj) => Ok(Reply::Bulk(str_payload(obj)?.clone())),
    }
}

/// `GETSET key value` — read then write in one step. Mutates the stored
/// object in place, so an existing expiry survives.
pub fn getset(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let bytes = store_bytes(srv.config.coerce_integers, &argv[2]);
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => Ok(Reply::Bulk(std::mem::replace(b, bytes))),
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            db.set(argv[1].clone(), Object::string(bytes));
            Ok(Reply::Nil)
        }
    }
}

/// `GETRANGE key start end` — inclusive on both ends, negative indices from
/// the end, clamped to the actual length.
pub fn getrange(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let start = parse_i64(&argv[2])?;
    let end = parse_i64(&argv[3])?;
    let db = srv.client_db(addr);
    let Some(obj) = db.get(&argv[1]) else {
        return Ok(Reply::Bulk(Vec::new()));
    };
    let b = str_payload(obj)?;
    let n = b.len() as i64;
    let mut s = if start < 0 { n + start } else { start };
    let mut e = if end < 0 { n + end } else { end };
    if s < 0 {
        s = 0;
    }
    if e >= n {
        e = n - 1;
    }
    if n == 0 || s > e {
        return Ok(Reply::Bulk(Vec::new()));
    }
    Ok(Reply::Bulk(b[s as usize..=e as usize].to_vec()))
}

/// `STRLEN key`
pub fn strlen(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => Ok(Reply::Int(str_payload(obj)?.len() as i64)),
    }
}

/// `APPEND key value` — on a missing key this is SET.
pub fn append(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let coerce = srv.config.coerce_integers;
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => {
                b.extend_from_slice(&argv[2]);
                Ok(Reply::Int(b.len() as i64))
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let len = argv[2].len() as i64;
            db.set(argv[1].clone(), Object::string(store_bytes(coerce, &argv[2])));
            Ok(Reply::Int(len))
        }
    }
}

/// Shared INCR/DECR/INCRBY/DECRBY body: a missing key starts from 0, the
/// stored payload must parse as a signed 64-bit integer, and overflow is a
/// reported error rather than a wrap.
fn arith<F>(
    srv: &mut Server,
    addr: &str,
    key: &[u8],
    apply: F,
) -> Result<Reply, CommandError>
where
    F: Fn(i64) -> Option<i64>,
{
    let overflow = || CommandError::err("increment or decrement would overflow");
    let db = srv.client_db(addr);
    match db.get_mut(key) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => {
                let cur = parse_i64(b)?;
                let next = apply(cur).ok_or_else(overflow)?;
                *b = next.to_string().into_bytes();
                Ok(Reply::Int(next))
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let next = apply(0).ok_or_else(overflow)?;
            db.set(key.to_vec(), Object::string(next.to_string().into_bytes()));
            Ok(Reply::Int(next))
        }
    }
}

/// `INCR key`
pub fn incr(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    arith(srv, addr, &argv[1], |v| v.checked_add(1))
}

/// `DECR key`
pub fn decr(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    arith(srv, addr, &argv[1], |v| v.checked_sub(1))
}

/// `INCRBY key increment`
pub fn incrby(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let n = parse_i64(&argv[2])?;
    arith(srv, addr, &argv[1], move |v| v.checked_add(n))
}

/// `DECRBY key decrement`
pub fn decrby(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let n = parse_i64(&argv[2])?;
    arith(srv, addr, &argv[1], move |v| v.checked_sub(n))
}

/// `INCRBYFLOAT key increment` — arbitrary-precision decimal addition; the
/// result is stored and returned as its decimal text.
pub fn incrbyfloat(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let delta = decimal(&argv[2])?;
    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => {
                let next = decimal(b)? + delta;
                *b = next.to_string().into_bytes();
                Ok(Reply::Bulk(b.clone()))
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let text = delta.to_string().into_bytes();
            db.set(argv[1].clone(), Object::string(text.clone()));
            Ok(Reply::Bulk(text))
        }
    }
}

fn decimal(bytes: &[u8]) -> Result<BigDecimal, CommandError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| BigDecimal::from_str(s.trim()).ok())
        .ok_or_else(|| CommandError::err("value is not a valid float"))
}

//
// Bitmap operations
//

/// Offsets address single bits, MSB of byte 0 first; the classic 512MB
/// string limit caps them below 2^32.
fn bit_offset(arg: &[u8]) -> Result<u64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|o| *o < (1u64 << 32))
        .ok_or_else(|| CommandError::err("bit offset is not an integer or out of range"))
}

/// `GETBIT key offset` — reads past the end (or a missing key) as 0.
pub fn getbit(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = bit_offset(&argv[2])?;
    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => {
            let b = str_payload(obj)?;
            let byte = (offset / 8) as usize;
            let shift = 7 - (offset % 8) as u32;
            Ok(Reply::Int(
                b.get(byte).map(|x| (x >> shift) & 1).unwrap_or(0) as i64,
            ))
        }
    }
}

/// `SETBIT key offset value` — grows the string with zero bytes to reach
/// the offset. Preserves an existing expiry.
pub fn setbit(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let offset = bit_offset(&argv[2])?;
    let bit = match std::str::from_utf8(&argv[3]).ok().and_then(|s| s.parse::<u8>().ok()) {
        Some(v @ (0 | 1)) => v,
        _ => return Err(CommandError::err("bit is not an integer or out of range")),
    };
    let byte = (offset / 8) as usize;
    let mask = 0x80u8 >> (offset % 8);

    let db = srv.client_db(addr);
    match db.get_mut(&argv[1]) {
        Some(obj) => match &mut obj.value {
            Value::Str(b) => {
                if b.len() <= byte {
                    b.resize(byte + 1, 0);
                }
                if bit == 1 {
                    b[byte] |= mask;
                } else {
                    b[byte] &= !mask;
                }
                Ok(Reply::ok())
            }
            _ => Err(CommandError::wrong_type()),
        },
        None => {
            let mut b = vec![0u8; byte + 1];
            if bit == 1 {
                b[byte] |= mask;
            }
            db.set(argv[1].clone(), Object::string(b));
            Ok(Reply::ok())
        }
    }
}

/// Byte-range selection shared by BITCOUNT: negative indices count from the
/// end, the bounds clamp to the payload.
fn byte_slice(b: &[u8], start: Option<i64>, end: Option<i64>) -> &[u8] {
    let n = b.len() as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { n + v } else { v };
        v.clamp(0, n)
    };
    let s = start.map_or(0, clamp);
    let e = end.map_or(n, clamp);
    if s >= e {
        &[]
    } else {
        &b[s as usize..e as usize]
    }
}

/// `BITCOUNT key [start end]` — population count over the optionally
/// byte-sliced value; a missing key counts 0.
pub fn bitcount(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() == 3 || argv.len() > 4 {
        return Err(CommandError::syntax());
    }
    let range = if argv.len() == 4 {
        Some((parse_i64(&argv[2])?, parse_i64(&argv[3])?))
    } else {
        None
    };

    let db = srv.client_db(addr);
    match db.get(&argv[1]) {
        None => Ok(Reply::Int(0)),
        Some(obj) => {
            let b = str_payload(obj)?;
            let slice = match range {
                None => &b[..],
                // an inclusive end of -1 means "through the last byte"
                Some((s, e)) => {
                    let end = if e == -1 { None } else { Some(e.saturating_add(1)) };
                    byte_slice(b, Some(s), end)
                }
            };
            Ok(Reply::Int(slice.iter().map(|x| x.count_ones() as i64).sum()))
        }
    }
}

/// First offset within `bytes` holding `bit`, counting from the MSB of
/// byte 0.
fn find_bit(bytes: &[u8], bit: u8) -> Option<usize> {
    for (i, &b) in bytes.iter().enumerate() {
        let candidate = if bit == 1 { b != 0x00 } else { b != 0xff };
        if candidate {
            for j in 0..8 {
                if (b >> (7 - j)) & 1 == bit {
                    return Some(i * 8 + j);
                }
            }
        }
    }
    None
}

/// `BITPOS key bit [start [end]]`
///
/// Positions are absolute even when a byte range is given. Looking for a
/// clear bit with no explicit end treats the value as right-padded with
/// zeros, so an all-ones string answers the first offset past it; with an
/// explicit end an exhausted range answers -1. A missing key is an empty
/// string: -1 for bit 1, 0 for bit 0.
pub fn bitpos(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    if argv.len() > 5 {
        return Err(CommandError::syntax());
    }
    let bit = match parse_i64(&argv[2])? {
        0 => 0u8,
        1 => 1u8,
        _ => return Err(CommandError::err("The bit argument must be 1 or 0.")),
    };
    let start = argv.get(3).map(|a| parse_i64(a)).transpose()?;
    let end = argv.get(4).map(|a| parse_i64(a)).transpose()?;

    let db = srv.client_db(addr);
    let Some(obj) = db.get(&argv[1]) else {
        return Ok(Reply::Int(if bit == 1 { -1 } else { 0 }));
    };
    let b = str_payload(obj)?;
    let n = b.len() as i64;

    let s = match start {
        None => 0,
        Some(v) => {
            let v = if v < 0 { n + v } else { v };
            v.clamp(0, n)
        }
    };
    let e = match end {
        None => n,
        Some(v) => {
            let v = if v < 0 { n + v } else { v };
            (v + 1).clamp(0, n)
        }
    };
    if s >= e {
        return Ok(Reply::Int(-1));
    }

    match find_bit(&b[s as usize..e as usize], bit) {
        Some(pos) => Ok(Reply::Int(s * 8 + pos as i64)),
        None if bit == 0 && end.is_none() => Ok(Reply::Int(e * 8)),
        None => Ok(Reply::Int(-1)),
    }
}

/// `BITOP AND|OR|XOR|NOT destkey srckey [srckey ...]`
///
/// Shorter inputs are zero-extended to the longest; the result is stored at
/// the destination and its byte length returned. NOT takes exactly one
/// source and, when that source is missing, stores nothing and answers 0.
pub fn bitop(srv: &mut Server, addr: &str, argv: &[Vec<u8>]) -> Result<Reply, CommandError> {
    let op = argv[1].to_ascii_uppercase();
    let dest = argv[2].clone();
    let sources = &argv[3..];

    if op == b"NOT" {
        if sources.len() != 1 {
            return Err(CommandError::err(
                "BITOP NOT must be called with a single source key.",
            ));
        }
        let db = srv.client_db(addr);
        let inverted: Vec<u8> = match db.get(&sources[0]) {
            None => return Ok(Reply::Int(0)),
            Some(obj) => str_payload(obj)?.iter().map(|x| !x).collect(),
        };
        let len = inverted.len() as i64;
        db.set(dest, Object::string(inverted));
        return Ok(Reply::Int(len));
    }

    let combine: fn(u8, u8) -> u8 = match op.as_slice() {
        b"AND" => |a, b| a & b,
        b"OR" => |a, b| a | b,
        b"XOR" => |a, b| a ^ b,
        _ => return Err(CommandError::err("Don't know what to do for \"bitop\"")),
    };

    let db = srv.client_db(addr);
    let mut acc: Vec<u8> = Vec::new();
    for (i, key) in sources.iter().enumerate() {
        let mut src: Vec<u8> = match db.get(key) {
            None => Vec::new(),
            Some(obj) => str_payload(obj)?.clone(),
        };
        if i == 0 {
            acc = src;
            continue;
        }
        if src.len() > acc.len() {
            acc.resize(src.len(), 0);
        } else if acc.len() > src.len() {
            src.resize(acc.len(), 0);
        }
        for (a, s) in acc.iter_mut().zip(src.iter()) {
            *a = combine(*a, *s);
        }
    }
    let len = acc.len() as i64;
    db.set(dest, Object::string(acc));
    Ok(Reply::Int(len))
}
