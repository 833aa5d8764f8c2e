//! Binary record format of the [`FileLog`](super::FileLog) journal.
//!
//! The journal is a sequence of length-prefixed frames:
//!
//! ```text
//! | len (u32 BE) | version (u8) | type (u8) | ... record-specific fields ... |
//! ```
//!
//! `len` covers everything after itself. Strings and byte fields are written
//! as `| len (u32 BE) | bytes |`, entry ids as `u64 BE`.
//!
//! # Record Types
//!
//! - `Append` (0x01): stream, key, value
//! - `CreateGroup` (0x02): stream, group, cursor the group delivers after
//! - `Deliver` (0x03): stream, group, consumer, entry id
//! - `Ack` (0x04): stream, group, entry id

use super::LogError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame format version (currently 0x01)
pub const JOURNAL_VERSION: u8 = 0x01;

const LEN_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Append = 0x01,
    CreateGroup = 0x02,
    Deliver = 0x03,
    Ack = 0x04,
}

impl RecordType {
    fn from_id(id: u8) -> Result<Self, LogError> {
        match id {
            0x01 => Ok(Self::Append),
            0x02 => Ok(Self::CreateGroup),
            0x03 => Ok(Self::Deliver),
            0x04 => Ok(Self::Ack),
            _ => Err(corrupt(format!("invalid record type: 0x{id:02x}"))),
        }
    }
}

/// One state change of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    Append {
        stream: String,
        key: Bytes,
        value: Bytes,
    },
    CreateGroup {
        stream: String,
        group: String,
        last_delivered: u64,
    },
    Deliver {
        stream: String,
        group: String,
        consumer: String,
        id: u64,
    },
    Ack {
        stream: String,
        group: String,
        id: u64,
    },
}

impl JournalRecord {
    /// Appends this record as one frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        body.put_u8(JOURNAL_VERSION);
        match self {
            Self::Append { stream, key, value } => {
                body.put_u8(RecordType::Append as u8);
                put_field(&mut body, stream.as_bytes());
                put_field(&mut body, key);
                put_field(&mut body, value);
            }
            Self::CreateGroup {
                stream,
                group,
                last_delivered,
            } => {
                body.put_u8(RecordType::CreateGroup as u8);
                put_field(&mut body, stream.as_bytes());
                put_field(&mut body, group.as_bytes());
                body.put_u64(*last_delivered);
            }
            Self::Deliver {
                stream,
                group,
                consumer,
                id,
            } => {
                body.put_u8(RecordType::Deliver as u8);
                put_field(&mut body, stream.as_bytes());
                put_field(&mut body, group.as_bytes());
                put_field(&mut body, consumer.as_bytes());
                body.put_u64(*id);
            }
            Self::Ack { stream, group, id } => {
                body.put_u8(RecordType::Ack as u8);
                put_field(&mut body, stream.as_bytes());
                put_field(&mut body, group.as_bytes());
                body.put_u64(*id);
            }
        }

        buf.reserve(LEN_PREFIX + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
    }

    /// Decodes the frame at the front of `data`.
    ///
    /// Returns the record and the number of bytes it occupied, or `None` if
    /// `data` ends before the frame does (a write torn by a crash).
    ///
    /// # Errors
    ///
    /// [`LogError::Storage`] if a complete frame is malformed.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, LogError> {
        if data.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut buf = data;
        let len = buf.get_u32() as usize;
        if buf.len() < len {
            return Ok(None);
        }
        let mut body = &buf[..len];

        if body.remaining() < 2 {
            return Err(corrupt("frame too short".into()));
        }
        let version = body.get_u8();
        if version != JOURNAL_VERSION {
            return Err(corrupt(format!(
                "invalid journal version: expected 0x{JOURNAL_VERSION:02x}, got 0x{version:02x}"
            )));
        }

        let record = match RecordType::from_id(body.get_u8())? {
            RecordType::Append => Self::Append {
                stream: get_string(&mut body)?,
                key: get_field(&mut body)?,
                value: get_field(&mut body)?,
            },
            RecordType::CreateGroup => Self::CreateGroup {
                stream: get_string(&mut body)?,
                group: get_string(&mut body)?,
                last_delivered: get_u64(&mut body)?,
            },
            RecordType::Deliver => Self::Deliver {
                stream: get_string(&mut body)?,
                group: get_string(&mut body)?,
                consumer: get_string(&mut body)?,
                id: get_u64(&mut body)?,
            },
            RecordType::Ack => Self::Ack {
                stream: get_string(&mut body)?,
                group: get_string(&mut body)?,
                id: get_u64(&mut body)?,
            },
        };

        if body.has_remaining() {
            return Err(corrupt(format!(
                "{} trailing bytes in frame",
                body.remaining()
            )));
        }
        Ok(Some((record, LEN_PREFIX + len)))
    }
}

fn put_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);
}

fn get_field(buf: &mut &[u8]) -> Result<Bytes, LogError> {
    if buf.remaining() < LEN_PREFIX {
        return Err(corrupt("truncated field length".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(corrupt("truncated field".into()));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut &[u8]) -> Result<String, LogError> {
    let field = get_field(buf)?;
    String::from_utf8(field.to_vec()).map_err(|e| corrupt(e.to_string()))
}

fn get_u64(buf: &mut &[u8]) -> Result<u64, LogError> {
    if buf.remaining() < 8 {
        return Err(corrupt("truncated entry id".into()));
    }
    Ok(buf.get_u64())
}

fn corrupt(reason: String) -> LogError {
    LogError::Storage(format!("corrupt journal: {reason}"))
}
