//! RESP2 framing.
//!
//! Requests arrive either as arrays of bulk strings (`*2\r\n$4\r\nPING\r\n...`)
//! or as inline commands (`PING hello\r\n`). Replies are simple strings,
//! errors, integers or bulk strings.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest accepted argument count for one request.
pub const MAX_ARGS: usize = 1024;
/// Largest accepted bulk string.
pub const MAX_BULK_LEN: usize = 64 * 1024;
/// Largest accepted inline request or header line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("expected '{expected}', got '{found}'")]
    UnexpectedByte { expected: char, found: char },

    #[error("invalid {what} length")]
    InvalidLength { what: &'static str },

    #[error("{what} too large ({len} > {max})")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },
}

/// One reply frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
}

impl Reply {
    pub const OK: Self = Self::Simple("OK");
    pub const PONG: Self = Self::Simple("PONG");

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }
}

/// A decoded request: the command name followed by its arguments. Empty for
/// an empty array.
pub type Request = Vec<Bytes>;

#[derive(Clone, Copy, Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(&first) = src.first() else {
                return Ok(None);
            };

            let parsed = if first == b'*' {
                parse_array(src)?
            } else {
                parse_inline(src)?
            };

            let Some((consumed, ranges)) = parsed else {
                return Ok(None);
            };

            let frame = src.split_to(consumed).freeze();
            // blank inline lines are skipped
            if first != b'*' && ranges.is_empty() {
                continue;
            }
            return Ok(Some(
                ranges.into_iter().map(|(s, e)| frame.slice(s..e)).collect(),
            ));
        }
    }
}

impl Encoder<Reply> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Reply::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Reply::Error(msg) => {
                // a bare CR or LF would end the frame early
                let msg = msg.replace(['\r', '\n'], " ");
                put_line(dst, b'-', msg.as_bytes());
            }
            Reply::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
            Reply::Bulk(data) => {
                put_line(dst, b'$', data.len().to_string().as_bytes());
                dst.reserve(data.len() + 2);
                dst.put_slice(&data);
                dst.put_slice(b"\r\n");
            }
        }
        Ok(())
    }
}

fn put_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

type Parsed = Option<(usize, Vec<(usize, usize)>)>;

/// Finds the `\r\n`-terminated line starting at `pos`. Returns the line
/// without its terminator and the offset just past it.
fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let rest = &buf[pos..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => Ok(Some((&rest[..end], pos + end + 2))),
        None if rest.len() > MAX_LINE_LEN => Err(ProtocolError::TooLarge {
            what: "line",
            len: rest.len(),
            max: MAX_LINE_LEN,
        }),
        None => Ok(None),
    }
}

fn parse_len(line: &[u8], what: &'static str) -> Result<i64, ProtocolError> {
    core::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ProtocolError::InvalidLength { what })
}

fn parse_array(buf: &[u8]) -> Result<Parsed, ProtocolError> {
    let Some((header, mut pos)) = read_line(buf, 0)? else {
        return Ok(None);
    };
    let count = parse_len(&header[1..], "multibulk")?;
    // `*0` and the null array `*-1` both carry no command
    if count <= 0 {
        return Ok(Some((pos, Vec::new())));
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(ProtocolError::TooLarge {
            what: "multibulk",
            len: count,
            max: MAX_ARGS,
        });
    }

    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        let Some((line, next)) = read_line(buf, pos)? else {
            return Ok(None);
        };
        match line.first() {
            Some(b'$') => {}
            Some(&other) => {
                return Err(ProtocolError::UnexpectedByte {
                    expected: '$',
                    found: other as char,
                });
            }
            None => return Err(ProtocolError::InvalidLength { what: "bulk" }),
        }
        let len = parse_len(&line[1..], "bulk")?;
        if len < 0 {
            return Err(ProtocolError::InvalidLength { what: "bulk" });
        }
        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::TooLarge {
                what: "bulk",
                len,
                max: MAX_BULK_LEN,
            });
        }

        let end = next + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::UnexpectedByte {
                expected: '\r',
                found: buf[end] as char,
            });
        }
        ranges.push((next, end));
        pos = end + 2;
    }

    Ok(Some((pos, ranges)))
}

fn parse_inline(buf: &[u8]) -> Result<Parsed, ProtocolError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LEN {
            return Err(ProtocolError::TooLarge {
                what: "inline request",
                len: buf.len(),
                max: MAX_LINE_LEN,
            });
        }
        return Ok(None);
    };

    let mut ranges = Vec::new();
    let mut start = None;
    for (i, b) in buf[..nl].iter().enumerate() {
        match (b.is_ascii_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                ranges.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push((s, nl));
    }
    if ranges.len() > MAX_ARGS {
        return Err(ProtocolError::TooLarge {
            what: "inline request",
            len: ranges.len(),
            max: MAX_ARGS,
        });
    }

    Ok(Some((nl + 1, ranges)))
}
