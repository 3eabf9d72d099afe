/*!
 * RESP wire codec
 *
 * Implements both request forms of the Redis Serialization Protocol: the
 * canonical array-of-bulk-strings form and the legacy inline form with
 * shell-like quoting, plus the typed `Reply` value and its encoder. The
 * request decoder is incremental: it reads from a growing buffer and
 * reports `Ok(None)` whenever a frame is not yet complete, so a connection
 * can suspend mid-request and resume when more bytes arrive.
 */

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Upper bound on `*<N>` element counts accepted from the wire.
const MAX_MULTIBULK: i64 = 1024 * 1024;
/// Upper bound on a single bulk payload (512MB, the classic string limit).
const MAX_BULK: i64 = 512 * 1024 * 1024;

/// Decoding failed; the connection answers `-ERR Protocol error: <detail>`
/// and closes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    fn new(detail: impl Into<String>) -> Self {
        ProtocolError(detail.into())
    }
}

/// Parse a single request from the front of `buf`.
///
/// The first byte selects the variant: `*` starts an array of bulk strings,
/// anything else is an inline command line. On success the consumed bytes
/// are advanced out of `buf` and the argument vector is returned; `Ok(None)`
/// means the buffer does not yet hold a complete request and nothing is
/// consumed.
pub fn parse_request(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == b'*' {
        parse_multibulk(buf)
    } else {
        parse_inline(buf)
    }
}

/// Locate the line beginning at `pos`; returns `(position after CRLF, line)`.
fn read_line(data: &[u8], pos: usize) -> Option<(usize, &[u8])> {
    let mut i = pos;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Some((i + 2, &data[pos..i]));
        }
        i += 1;
    }
    None
}

fn parse_line_int(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok()
}

/// Render a byte the way it should appear inside an error detail.
fn printable(b: u8) -> String {
    if b.is_ascii_graphic() {
        (b as char).to_string()
    } else {
        format!("\\x{b:02x}")
    }
}

fn parse_multibulk(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    let data: &[u8] = &buf[..];
    let Some((mut pos, header)) = read_line(data, 0) else {
        return Ok(None);
    };
    let count = parse_line_int(&header[1..])
        .filter(|n| *n <= MAX_MULTIBULK)
        .ok_or_else(|| ProtocolError::new("invalid multibulk length"))?;
    if count <= 0 {
        // "*0" and null arrays decode as an empty request
        buf.advance(pos);
        return Ok(Some(Vec::new()));
    }

    let mut argv: Vec<Vec<u8>> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some((next, line)) = read_line(data, pos) else {
            return Ok(None);
        };
        match line.first() {
            Some(&b'$') => {}
            Some(&other) => {
                return Err(ProtocolError::new(format!(
                    "expected '$', got '{}'",
                    printable(other)
                )));
            }
            None => return Err(ProtocolError::new("expected '$', got ''")),
        }
        let len = parse_line_int(&line[1..])
            .filter(|n| (0..=MAX_BULK).contains(n))
            .ok_or_else(|| ProtocolError::new("invalid bulk length"))?;
        pos = next;

        let need = len as usize + 2;
        if pos + need > data.len() {
            return Ok(None);
        }
        if data[pos + len as usize] != b'\r' || data[pos + len as usize + 1] != b'\n' {
            return Err(ProtocolError::new("bulk payload missing CRLF terminator"));
        }
        argv.push(data[pos..pos + len as usize].to_vec());
        pos += need;
    }

    buf.advance(pos);
    Ok(Some(argv))
}

fn parse_inline(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    let data: &[u8] = &buf[..];
    let Some(nl) = data.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let mut line = &data[..nl];
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    while line.ends_with(b" ") {
        line = &line[..line.len() - 1];
    }
    let unescaped = unescape_inline(line);
    let argv = tokenize_inline(&unescaped)?;
    buf.advance(nl + 1);
    Ok(Some(argv))
}

/// Resolve backslash escapes over the whole line before tokenization.
/// Unrecognized escapes keep both characters.
fn unescape_inline(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] != b'\\' || i + 1 == line.len() {
            out.push(line[i]);
            i += 1;
            continue;
        }
        let c = line[i + 1];
        i += 2;
        match c {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'x' => {
                let hex = line.get(i).copied().zip(line.get(i + 1).copied());
                match hex.and_then(|(hi, lo)| {
                    let hi = (hi as char).to_digit(16)?;
                    let lo = (lo as char).to_digit(16)?;
                    Some((hi * 16 + lo) as u8)
                }) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.extend_from_slice(b"\\x"),
                }
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    out
}

/// Split an unescaped inline line into arguments on space/tab, honoring
/// single- and double-quoted substrings.
fn tokenize_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut argv: Vec<Vec<u8>> = Vec::new();
    let mut cur: Vec<u8> = Vec::new();
    let mut quote: Option<u8> = None;

    for &c in line {
        match c {
            b' ' | b'\t' if quote.is_none() => {
                if !cur.is_empty() {
                    argv.push(std::mem::take(&mut cur));
                }
            }
            b'"' | b'\'' => {
                if quote == Some(c) {
                    quote = None;
                    argv.push(std::mem::take(&mut cur));
                } else if quote.is_none() {
                    quote = Some(c);
                } else {
                    cur.push(c);
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        argv.push(cur);
    }
    if quote.is_some() {
        return Err(ProtocolError::new("unbalanced quotes in request"));
    }
    Ok(argv)
}

//
// Typed replies and the RESP encoder
//

/// A reply value as produced by command handlers. `Nil` and an empty bulk
/// string are distinct and both round-trip through the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+S\r\n`
    Simple(String),
    /// `-KIND message\r\n`; carried as a value so EXEC can embed the
    /// failures of queued commands inside its array reply.
    Error { kind: String, message: String },
    /// `:n\r\n`
    Int(i64),
    /// `$len\r\n<bytes>\r\n`
    Bulk(Vec<u8>),
    /// `$-1\r\n`
    Nil,
    /// `*n\r\n` followed by each element
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn queued() -> Self {
        Reply::Simple("QUEUED".to_string())
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Reply::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Simple(s) => resp_simple(s),
            Reply::Error { kind, message } => resp_error(kind, message),
            Reply::Int(n) => resp_integer(*n),
            Reply::Bulk(b) => resp_bulk(b),
            Reply::Nil => resp_null(),
            Reply::Array(items) => {
                let mut out = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    out.extend_from_slice(&item.encode());
                }
                out
            }
        }
    }
}

/// Encode a simple string (`+OK\r\n`).
pub fn resp_simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

/// Encode an error reply (`-ERR message\r\n`).
pub fn resp_error(kind: &str, message: &str) -> Vec<u8> {
    format!("-{kind} {message}\r\n").into_bytes()
}

/// Encode an integer reply (`:n\r\n`).
pub fn resp_integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

/// Encode a bulk string (`$len\r\n<bytes>\r\n`).
pub fn resp_bulk(b: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", b.len()).into_bytes();
    out.extend_from_slice(b);
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode the nil bulk string (`$-1\r\n`).
pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Decode one complete reply. Exact inverse of [`Reply::encode`]:
/// `decode_reply(&r.encode()) == Ok(r)` for every reply shape. Trailing
/// bytes are rejected.
pub fn decode_reply(data: &[u8]) -> Result<Reply, ProtocolError> {
    let (reply, used) = decode_reply_at(data, 0)?;
    if used != data.len() {
        return Err(ProtocolError::new("trailing bytes after reply"));
    }
    Ok(reply)
}

fn decode_reply_at(data: &[u8], pos: usize) -> Result<(Reply, usize), ProtocolError> {
    let (next, line) =
        read_line(data, pos).ok_or_else(|| ProtocolError::new("truncated reply"))?;
    let Some((&tag, rest)) = line.split_first() else {
        return Err(ProtocolError::new("empty reply line"));
    };
    match tag {
        b'+' => Ok((
            Reply::Simple(String::from_utf8_lossy(rest).into_owned()),
            next,
        )),
        b'-' => {
            let text = String::from_utf8_lossy(rest);
            let (kind, message) = text.split_once(' ').unwrap_or((text.as_ref(), ""));
            Ok((Reply::error(kind, message), next))
        }
        b':' => {
            let n = parse_line_int(rest)
                .ok_or_else(|| ProtocolError::new("invalid integer reply"))?;
            Ok((Reply::Int(n), next))
        }
        b'$' => {
            let len = parse_line_int(rest)
                .ok_or_else(|| ProtocolError::new("invalid bulk length"))?;
            if len < 0 {
                return Ok((Reply::Nil, next));
            }
            let len = len as usize;
            if next + len + 2 > data.len() {
                return Err(ProtocolError::new("truncated bulk reply"));
            }
            if &data[next + len..next + len + 2] != b"\r\n" {
                return Err(ProtocolError::new("bulk reply missing CRLF terminator"));
            }
            Ok((Reply::Bulk(data[next..next + len].to_vec()), next + len + 2))
        }
        b'*' => {
            let n = parse_line_int(rest)
                .ok_or_else(|| ProtocolError::new("invalid array length"))?;
            let mut items = Vec::with_capacity(n.max(0) as usize);
            let mut cursor = next;
            for _ in 0..n {
                let (item, after) = decode_reply_at(data, cursor)?;
                items.push(item);
                cursor = after;
            }
            Ok((Reply::Array(items), cursor))
        }
        other => Err(ProtocolError::new(format!(
            "unexpected reply tag '{}'",
            printable(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_multibulk_consumes_nothing() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$5\r\nhel"[..]);
        let before = buf.len();
        assert_eq!(parse_request(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn inline_escapes_and_quotes() {
        let mut buf = BytesMut::from(&b"SET key \"\\x80\" \r\n"[..]);
        let argv = parse_request(&mut buf).unwrap().unwrap();
        assert_eq!(argv, vec![b"SET".to_vec(), b"key".to_vec(), vec![0x80]]);
        assert!(buf.is_empty());
    }

    #[test]
    fn inline_unbalanced_quote_is_rejected() {
        let mut buf = BytesMut::from(&b"SET key \"oops\r\n"[..]);
        let err = parse_request(&mut buf).unwrap_err();
        assert_eq!(err.0, "unbalanced quotes in request");
    }
}
