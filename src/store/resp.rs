//! RESP2 wire codec for talking to Redis endpoints.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{Error, Result};

/// Upper bound on a single bulk string, to reject garbage lengths early.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Value>>),
}

impl Value {
    /// Text content of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Simple(s) => Some(s),
            Value::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Integer content; Redis sends some numbers as bulk strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            other => other.as_str().and_then(|s| s.parse().ok()),
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(Some(items)) => Some(items),
            _ => None,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    dst.put_slice(args.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        dst.put_slice(arg.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg.as_bytes());
        dst.put_slice(b"\r\n");
    }
}

/// Parse one complete value from the front of `buf`, consuming it.
/// Returns Ok(None) if `buf` does not yet hold a complete value.
pub fn parse(buf: &mut BytesMut) -> Result<Option<Value>> {
    match parse_at(buf, 0)? {
        Some((value, end)) => {
            buf.advance(end);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Value, usize)>> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((Value::Simple(line_to_string(line)?), next))),
        b'-' => Ok(Some((Value::Error(line_to_string(line)?), next))),
        b':' => Ok(Some((Value::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Value::Bulk(None), next)));
            }
            if len > MAX_BULK_LEN {
                return Err(Error::Protocol(format!("bulk length {} too large", len)));
            }
            let end = next + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(Error::Protocol("bulk string not terminated by CRLF".into()));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Value::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Value::Array(None), next)));
            }
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            let mut pos = next;
            for _ in 0..len {
                match parse_at(buf, pos)? {
                    Some((item, end)) => {
                        items.push(item);
                        pos = end;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(Some(items)), pos)))
        }
        other => Err(Error::Protocol(format!(
            "unexpected type byte {:?}",
            other as char
        ))),
    }
}

/// Returns the line starting at `pos` (without CRLF) and the position after it.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

fn line_to_string(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec()).map_err(|_| Error::Protocol("invalid UTF-8 in reply".into()))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("invalid integer {:?}", String::from_utf8_lossy(line))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command() {
        let mut buf = BytesMut::new();
        encode_command(&["SLAVEOF", "NO", "ONE"], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$7\r\nSLAVEOF\r\n$2\r\nNO\r\n$3\r\nONE\r\n");
    }

    #[test]
    fn parses_master_role_reply() {
        let mut buf = BytesMut::from(
            &b"*3\r\n$6\r\nmaster\r\n:3129659\r\n*2\r\n*3\r\n$9\r\n127.0.0.1\r\n$4\r\n9001\r\n$7\r\n3129242\r\n*3\r\n$9\r\n127.0.0.1\r\n$4\r\n9002\r\n$7\r\n3129543\r\n"[..],
        );
        let value = parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());

        let items = value.as_array().unwrap();
        assert_eq!(items[0].as_str(), Some("master"));
        assert_eq!(items[1].as_i64(), Some(3129659));
        let replicas = items[2].as_array().unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[1].as_array().unwrap()[2].as_i64(), Some(3129543));
    }

    #[test]
    fn incomplete_input_is_not_consumed() {
        let full = b"*2\r\n+OK\r\n$5\r\nhello\r\n";
        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert_eq!(parse(&mut buf).unwrap(), None, "cut at {}", cut);
            assert_eq!(buf.len(), cut);
        }
        let mut buf = BytesMut::from(&full[..]);
        let value = parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            Value::Array(Some(vec![
                Value::Simple("OK".into()),
                Value::Bulk(Some(Bytes::from_static(b"hello"))),
            ]))
        );
    }

    #[test]
    fn parses_errors_and_nulls() {
        let mut buf = BytesMut::from(&b"-ERR unknown command\r\n$-1\r\n*-1\r\n"[..]);
        assert_eq!(parse(&mut buf).unwrap(), Some(Value::Error("ERR unknown command".into())));
        assert_eq!(parse(&mut buf).unwrap(), Some(Value::Bulk(None)));
        assert_eq!(parse(&mut buf).unwrap(), Some(Value::Array(None)));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_type() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(matches!(parse(&mut buf), Err(Error::Protocol(_))));
    }
}
