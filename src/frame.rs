// RESP wire format: https://redis.io/docs/reference/protocol-spec
//
// One extension on top of RESP2: a `$`-prefixed payload that is not
// terminated by CRLF and starts with the `REDIS` magic carries a binary
// snapshot (the full-resync transfer on a replication link).

use std::fmt;
use std::io::Cursor;
use std::string::FromUtf8Error;

use bytes::{Buf, Bytes};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Magic prefix of the binary snapshot format, shared with the snapshot
/// codec.
pub const SNAPSHOT_MAGIC: &[u8; 5] = b"REDIS";

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("{0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
    /// Length-delimited binary snapshot, sent without a trailing CRLF.
    Snapshot(Bytes),
}

impl Frame {
    /// Parses one frame out of `src`, leaving the cursor on the first byte
    /// after it. Returns `Error::Incomplete` when the buffer does not yet
    /// hold a full frame; callers may append bytes and retry.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        // The first byte in a RESP-serialized payload always identifies its
        // type. Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let bytes = get_line(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Simple(string))
            }
            DataType::SimpleError => {
                let bytes = get_line(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Error(string))
            }
            DataType::Integer => {
                let line = get_line(src)?;
                let integer = parse_decimal(line)?;
                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n, or a snapshot frame without the
            // trailing CRLF.
            DataType::BulkString => {
                let line = get_line(src)?;
                let length = parse_decimal(line)?;

                if length == -1 {
                    return Ok(Frame::Null);
                }

                let length = usize::try_from(length)
                    .map_err(|_| Error::Protocol(format!("invalid bulk length {length}")))?;

                let start = src.position() as usize;
                let end = start + length;
                if src.get_ref().len() < end {
                    return Err(Error::Incomplete);
                }

                let data = &src.get_ref()[start..end];
                let rest = &src.get_ref()[end..];

                if rest.len() >= 2 && &rest[..2] == CRLF {
                    let data = Bytes::copy_from_slice(data);
                    src.set_position((end + CRLF.len()) as u64);
                    return Ok(Frame::Bulk(data));
                }

                // Snapshot transfers reuse the bulk framing but carry no
                // trailing CRLF; the magic is the only discriminator.
                if data.starts_with(SNAPSHOT_MAGIC) {
                    let data = Bytes::copy_from_slice(data);
                    src.set_position(end as u64);
                    return Ok(Frame::Snapshot(data));
                }

                if rest.len() >= 2 {
                    return Err(Error::Protocol(
                        "expected CRLF after bulk payload".to_string(),
                    ));
                }

                Err(Error::Incomplete)
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let line = get_line(src)?;
                let length = parse_decimal(line)?;

                if length == -1 {
                    return Ok(Frame::Null);
                }

                let length = usize::try_from(length)
                    .map_err(|_| Error::Protocol(format!("invalid array length {length}")))?;

                let mut frames = Vec::with_capacity(length);
                for _ in 0..length {
                    frames.push(Self::parse(src)?);
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Integer(i) => {
                let repr = i.to_string();
                let mut bytes = Vec::with_capacity(1 + repr.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(repr.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(data) => {
                let length = data.len().to_string();
                let mut bytes =
                    Vec::with_capacity(1 + length.len() + CRLF.len() * 2 + data.len());
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(length.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(CRLF);
                bytes
            }
            // RESP2 null bulk.
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::Array(frames) => {
                let length = frames.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length.as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in frames {
                    bytes.extend(frame.serialize());
                }
                bytes
            }
            // No trailing CRLF after the payload.
            Frame::Snapshot(data) => {
                let length = data.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length.len() + CRLF.len() + data.len());
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(length.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes.extend_from_slice(data);
                bytes
            }
        }
    }

    /// Builds the array-of-bulk-strings form clients use to send commands.
    pub fn command(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}\r\n", arr.len())?;
                for frame in arr {
                    write!(f, "{}\r\n", frame)?;
                }
                Ok(())
            }
            Frame::Snapshot(bytes) => write!(f, "$<snapshot {} bytes>", bytes.len()),
        }
    }
}

/// Strict decimal parsing for integer and length fields: one optional
/// leading sign, then digits. Whitespace and repeated signs are protocol
/// errors.
fn parse_decimal(line: &[u8]) -> Result<i64, Error> {
    let invalid = || Error::Protocol(format!("invalid number {:?}", String::from_utf8_lossy(line)));

    let (negative, digits) = match line.first() {
        Some(b'-') => (true, &line[1..]),
        Some(b'+') => (false, &line[1..]),
        Some(_) => (false, line),
        None => return Err(invalid()),
    };

    if digits.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for byte in digits {
        if !byte.is_ascii_digit() {
            return Err(invalid());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(byte - b'0')))
            .ok_or_else(invalid)?;
    }

    Ok(if negative { -value } else { value })
}

fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let line_end = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..line_end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        Error::Protocol("invalid frame format".to_string())
    }
}
