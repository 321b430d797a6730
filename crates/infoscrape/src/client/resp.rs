//! Minimal RESP2 codec: commands are encoded as arrays of bulk strings, replies are decoded
//! from a buffered async reader.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on a single bulk string; protects against corrupted length prefixes.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string, e.g. `+OK`.
    SimpleString(String),
    /// Error reply, e.g. `-ERR unknown command`.
    Error(String),
    /// Integer reply.
    Integer(i64),
    /// Bulk string.
    BulkString(Vec<u8>),
    /// Null bulk string or null array.
    Null,
    /// Array of nested values.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Returns a short description of the value type used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk string",
            Self::Null => "null",
            Self::Array(_) => "array",
        }
    }
}

/// Appends a command to `buf`.
pub fn encode_command(buf: &mut Vec<u8>, args: &[&[u8]]) {
    buf.push(b'*');
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid_data("RESP line is not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_length(content: &str) -> io::Result<Option<usize>> {
    let len: i64 = content
        .parse()
        .map_err(|_| invalid_data(format!("invalid length `{content}`")))?;
    if len < 0 {
        return Ok(None);
    }
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_BULK_LEN)
        .map(Some)
        .ok_or_else(|| invalid_data(format!("length {len} is too large")))
}

/// Reads a single reply. Nested arrays are decoded without recursion.
///
/// # Errors
///
/// Returns I/O errors, including [`io::ErrorKind::InvalidData`] for protocol violations.
pub async fn read_value<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<RespValue> {
    // Arrays being filled: (expected length, collected items).
    let mut stack: Vec<(usize, Vec<RespValue>)> = vec![];
    let mut line = Vec::with_capacity(64);

    loop {
        read_line(reader, &mut line).await?;
        let (&type_byte, content) = line
            .split_first()
            .ok_or_else(|| invalid_data("empty RESP line"))?;
        let content = std::str::from_utf8(content).map_err(|_| invalid_data("non-UTF-8 header"))?;

        let mut value = match type_byte {
            b'+' => RespValue::SimpleString(content.to_owned()),
            b'-' => RespValue::Error(content.to_owned()),
            b':' => RespValue::Integer(
                content
                    .parse()
                    .map_err(|_| invalid_data(format!("invalid integer `{content}`")))?,
            ),
            b'$' => match parse_length(content)? {
                None => RespValue::Null,
                Some(len) => {
                    let mut data = vec![0_u8; len + 2];
                    reader.read_exact(&mut data).await?;
                    if !data.ends_with(b"\r\n") {
                        return Err(invalid_data("bulk string is not terminated by CRLF"));
                    }
                    data.truncate(len);
                    RespValue::BulkString(data)
                }
            },
            b'*' => match parse_length(content)? {
                None => RespValue::Null,
                Some(0) => RespValue::Array(vec![]),
                Some(len) => {
                    stack.push((len, Vec::with_capacity(len.min(1_024))));
                    continue;
                }
            },
            other => {
                return Err(invalid_data(format!(
                    "unknown RESP type byte {:?}",
                    char::from(other)
                )))
            }
        };

        loop {
            let Some((expected_len, mut items)) = stack.pop() else {
                return Ok(value);
            };
            items.push(value);
            if items.len() < expected_len {
                stack.push((expected_len, items));
                break;
            }
            value = RespValue::Array(items);
        }
    }
}
