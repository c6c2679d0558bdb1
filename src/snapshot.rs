// Binary snapshot codec. Format reference: https://rdb.fnordig.de/file_format.html
//
// Layout: `REDIS` magic, 4-digit version, any number of auxiliary fields
// (0xFA) and database sections (0xFE), a 0xFF terminator, then an 8-byte
// trailer. Only string values (type 0x00) exist in this format; streams
// are rebuilt from the replication stream instead.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::frame::SNAPSHOT_MAGIC;
use crate::store::{Database, StringEntry, Value};

const VERSION: &[u8; 4] = b"0011";

const OP_AUX: u8 = 0xFA;
const OP_RESIZE: u8 = 0xFB;
const OP_EXPIRY_MS: u8 = 0xFC;
const OP_EXPIRY_SECS: u8 = 0xFD;
const OP_SELECT_DB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0x00;

const ENC_INT8: u8 = 0xC0;
const ENC_INT16: u8 = 0xC1;
const ENC_INT32: u8 = 0xC2;
const ENC_LZF: u8 = 0xC3;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("expected magic string REDIS")]
    MissingMagic,
    #[error("snapshot ends mid-structure")]
    Truncated,
    #[error("LZF-compressed entries are not supported")]
    Lzf,
    #[error("unsupported value type {0:#04x}")]
    UnsupportedValueType(u8),
    #[error("unexpected byte {0:#04x}")]
    UnexpectedByte(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serializes every database. Expired entries and stream values are
/// omitted. Output is deterministic: databases and keys are emitted in
/// sorted order.
pub fn encode(databases: &HashMap<usize, Database>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(VERSION);

    write_aux(&mut out, "redis-ver", "7.2.4");

    let mut indexes: Vec<&usize> = databases.keys().collect();
    indexes.sort();

    for &index in indexes {
        let database = &databases[&index];

        let mut entries: Vec<(&String, &StringEntry)> = database
            .entries
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(entry) if !entry.is_expired() => Some((key, entry)),
                _ => None,
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        out.push(OP_SELECT_DB);
        write_length(&mut out, index);

        out.push(OP_RESIZE);
        write_length(&mut out, entries.len());
        write_length(
            &mut out,
            entries.iter().filter(|(_, e)| e.expires_at.is_some()).count(),
        );

        for (key, entry) in entries {
            if let Some(at) = entry.expires_at {
                let millis = at
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_millis() as u64;
                out.push(OP_EXPIRY_MS);
                out.extend_from_slice(&millis.to_le_bytes());
            }
            out.push(TYPE_STRING);
            write_string(&mut out, key.as_bytes());
            write_string(&mut out, &entry.value);
        }
    }

    out.push(OP_EOF);
    // Checksum-disabled trailer; loaders ignore it.
    out.extend_from_slice(&0u64.to_le_bytes());
    out
}

/// Parses a snapshot back into databases. Entries already expired at load
/// time are dropped. The trailer after 0xFF is not verified.
pub fn decode(bytes: &[u8]) -> Result<HashMap<usize, Database>, Error> {
    let mut reader = Reader::new(bytes);

    if reader.read_exact(SNAPSHOT_MAGIC.len())? != *SNAPSHOT_MAGIC {
        return Err(Error::MissingMagic);
    }
    // 4-digit version; its value does not affect what this loader accepts.
    reader.read_exact(VERSION.len())?;

    let mut databases = HashMap::new();

    loop {
        match reader.peek_u8()? {
            OP_AUX => {
                reader.read_u8()?;
                read_string(&mut reader)?;
                read_string(&mut reader)?;
            }
            OP_SELECT_DB => {
                let (index, database) = read_database_section(&mut reader)?;
                databases.insert(index, database);
            }
            OP_EOF => return Ok(databases),
            byte => return Err(Error::UnexpectedByte(byte)),
        }
    }
}

fn read_database_section(reader: &mut Reader) -> Result<(usize, Database), Error> {
    reader.read_u8()?; // OP_SELECT_DB
    let index = read_length(reader)?;
    let mut database = Database::default();

    loop {
        match reader.peek_u8()? {
            OP_EOF | OP_SELECT_DB => return Ok((index, database)),
            OP_RESIZE => {
                reader.read_u8()?;
                // Hash table sizing hints; nothing to preallocate here.
                read_length(reader)?;
                read_length(reader)?;
            }
            _ => {
                let (key, entry) = read_entry(reader)?;
                if !entry.is_expired() {
                    database.entries.insert(key, Value::String(entry));
                }
            }
        }
    }
}

fn read_entry(reader: &mut Reader) -> Result<(String, StringEntry), Error> {
    let expires_at = match reader.peek_u8()? {
        OP_EXPIRY_SECS => {
            reader.read_u8()?;
            let secs = u32::from_le_bytes(read_array(reader)?);
            Some(UNIX_EPOCH + Duration::from_secs(u64::from(secs)))
        }
        OP_EXPIRY_MS => {
            reader.read_u8()?;
            let millis = u64::from_le_bytes(read_array(reader)?);
            Some(UNIX_EPOCH + Duration::from_millis(millis))
        }
        _ => None,
    };

    let value_type = reader.read_u8()?;
    if value_type != TYPE_STRING {
        return Err(Error::UnsupportedValueType(value_type));
    }

    let key = String::from_utf8_lossy(&read_string(reader)?).into_owned();
    let value = Bytes::from(read_string(reader)?);

    Ok((key, StringEntry { value, expires_at }))
}

/// Length prefix: the top two bits of the first byte pick the width.
fn read_length(reader: &mut Reader) -> Result<usize, Error> {
    let first = reader.read_u8()?;
    match first >> 6 {
        0b00 => Ok(usize::from(first & 0x3F)),
        0b01 => {
            let next = reader.read_u8()?;
            Ok(usize::from(first & 0x3F) << 8 | usize::from(next))
        }
        0b10 => Ok(u32::from_be_bytes(read_array(reader)?) as usize),
        _ => Err(Error::UnexpectedByte(first)),
    }
}

/// A string payload: either a length-prefixed blob or one of the special
/// integer encodings rendered back to decimal text.
fn read_string(reader: &mut Reader) -> Result<Vec<u8>, Error> {
    match reader.peek_u8()? {
        ENC_INT8 => {
            reader.read_u8()?;
            let value = reader.read_u8()? as i8;
            Ok(value.to_string().into_bytes())
        }
        ENC_INT16 => {
            reader.read_u8()?;
            Ok(i16::from_le_bytes(read_array(reader)?).to_string().into_bytes())
        }
        ENC_INT32 => {
            reader.read_u8()?;
            Ok(i32::from_le_bytes(read_array(reader)?).to_string().into_bytes())
        }
        ENC_LZF => Err(Error::Lzf),
        _ => {
            let length = read_length(reader)?;
            Ok(reader.read_exact(length)?.to_vec())
        }
    }
}

fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 1 << 6 {
        out.push(length as u8);
    } else if length < 1 << 14 {
        out.push(0x40 | (length >> 8) as u8);
        out.push(length as u8);
    } else {
        out.push(0x80);
        out.extend_from_slice(&(length as u32).to_be_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, bytes: &[u8]) {
    write_length(out, bytes.len());
    out.extend_from_slice(bytes);
}

fn write_aux(out: &mut Vec<u8>, key: &str, value: &str) {
    out.push(OP_AUX);
    write_string(out, key.as_bytes());
    write_string(out, value.as_bytes());
}

fn read_array<const N: usize>(reader: &mut Reader) -> Result<[u8; N], Error> {
    let slice = reader.read_exact(N)?;
    Ok(slice.try_into().expect("read_exact returned N bytes"))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn peek_u8(&self) -> Result<u8, Error> {
        self.bytes.get(self.pos).copied().ok_or(Error::Truncated)
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(count).ok_or(Error::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(Error::Truncated)?;
        self.pos = end;
        Ok(slice)
    }
}
