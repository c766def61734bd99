// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlobDB payloads.
//!
//! Phone-initiated commands (insert, delete, clear) and their responses, plus
//! watch-initiated writes and the phone's answers to them. All integers are
//! little-endian.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use uuid::Uuid;

use super::{check_len, read_bytes, PacketDecodeError, PacketEncodeError};

mod opcode {
    pub const INSERT: u8 = 0x01;
    pub const DELETE: u8 = 0x04;
    pub const CLEAR: u8 = 0x05;
    pub const WRITE: u8 = 0x08;
    pub const WRITE_BACK: u8 = 0x09;
    pub const RESPONSE_FLAG: u8 = 0x80;
}

const MAX_KEY_LEN: usize = u8::MAX as usize;
const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Databases exposed by the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlobDatabase {
    Test = 0,
    Pin = 1,
    App = 2,
    Reminder = 3,
    Notification = 4,
    Weather = 5,
    NotificationPrefs = 6,
    HealthParams = 7,
    Contacts = 8,
    AppConfigs = 9,
    HealthStats = 10,
    AppGlance = 11,
}

impl BlobDatabase {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        use BlobDatabase::*;
        Some(match id {
            0 => Test,
            1 => Pin,
            2 => App,
            3 => Reminder,
            4 => Notification,
            5 => Weather,
            6 => NotificationPrefs,
            7 => HealthParams,
            8 => Contacts,
            9 => AppConfigs,
            10 => HealthStats,
            11 => AppGlance,
            _ => return None,
        })
    }
}

/// Status byte returned by either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStatus {
    Success,
    GeneralFailure,
    InvalidOperation,
    InvalidDatabaseId,
    InvalidData,
    KeyDoesNotExist,
    DatabaseFull,
    DataStale,
    NotSupported,
    Locked,
    TryLater,
    Unknown(u8),
}

impl BlobStatus {
    pub fn from_byte(value: u8) -> Self {
        use BlobStatus::*;
        match value {
            0x01 => Success,
            0x02 => GeneralFailure,
            0x03 => InvalidOperation,
            0x04 => InvalidDatabaseId,
            0x05 => InvalidData,
            0x06 => KeyDoesNotExist,
            0x07 => DatabaseFull,
            0x08 => DataStale,
            0x09 => NotSupported,
            0x0A => Locked,
            0x0B => TryLater,
            other => Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        use BlobStatus::*;
        match self {
            Success => 0x01,
            GeneralFailure => 0x02,
            InvalidOperation => 0x03,
            InvalidDatabaseId => 0x04,
            InvalidData => 0x05,
            KeyDoesNotExist => 0x06,
            DatabaseFull => 0x07,
            DataStale => 0x08,
            NotSupported => 0x09,
            Locked => 0x0A,
            TryLater => 0x0B,
            Unknown(other) => other,
        }
    }

    pub fn is_success(self) -> bool {
        self == BlobStatus::Success
    }
}

/// Key bytes for databases keyed by UUID (apps, pins).
pub fn uuid_key(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

/// Key bytes for databases keyed by a string (notification preferences).
pub fn string_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// A command sent from the phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobCommand {
    Insert {
        token: u16,
        database: BlobDatabase,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        token: u16,
        database: BlobDatabase,
        key: Vec<u8>,
    },
    Clear {
        token: u16,
        database: BlobDatabase,
    },
}

impl BlobCommand {
    pub fn token(&self) -> u16 {
        match self {
            BlobCommand::Insert { token, .. }
            | BlobCommand::Delete { token, .. }
            | BlobCommand::Clear { token, .. } => *token,
        }
    }

    pub fn database(&self) -> BlobDatabase {
        match self {
            BlobCommand::Insert { database, .. }
            | BlobCommand::Delete { database, .. }
            | BlobCommand::Clear { database, .. } => *database,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketEncodeError> {
        let mut buf = Vec::new();
        let (op, token, database) = match self {
            BlobCommand::Insert {
                token, database, ..
            } => (opcode::INSERT, token, database),
            BlobCommand::Delete {
                token, database, ..
            } => (opcode::DELETE, token, database),
            BlobCommand::Clear { token, database } => (opcode::CLEAR, token, database),
        };
        buf.push(op);
        buf.extend_from_slice(&token.to_le_bytes());
        buf.push(database.id());

        match self {
            BlobCommand::Insert { key, value, .. } => {
                check_len("key", key, MAX_KEY_LEN)?;
                check_len("value", value, MAX_VALUE_LEN)?;
                buf.push(key.len() as u8);
                buf.extend_from_slice(key);
                buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
                buf.extend_from_slice(value);
            }
            BlobCommand::Delete { key, .. } => {
                check_len("key", key, MAX_KEY_LEN)?;
                buf.push(key.len() as u8);
                buf.extend_from_slice(key);
            }
            BlobCommand::Clear { .. } => {}
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let op = cursor.read_u8()?;
        let token = cursor.read_u16::<LittleEndian>()?;
        let database = read_database(&mut cursor)?;

        match op {
            opcode::INSERT => {
                let key_len = cursor.read_u8()? as usize;
                let key = read_bytes(&mut cursor, key_len)?;
                let value_len = cursor.read_u16::<LittleEndian>()? as usize;
                let value = read_bytes(&mut cursor, value_len)?;
                Ok(BlobCommand::Insert {
                    token,
                    database,
                    key,
                    value,
                })
            }
            opcode::DELETE => {
                let key_len = cursor.read_u8()? as usize;
                let key = read_bytes(&mut cursor, key_len)?;
                Ok(BlobCommand::Delete {
                    token,
                    database,
                    key,
                })
            }
            opcode::CLEAR => Ok(BlobCommand::Clear { token, database }),
            other => Err(PacketDecodeError::UnknownCommand(other)),
        }
    }
}

/// The watch's answer to a [`BlobCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobResponse {
    pub token: u16,
    pub status: BlobStatus,
}

impl BlobResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.extend_from_slice(&self.token.to_le_bytes());
        buf.push(self.status.as_byte());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let token = cursor.read_u16::<LittleEndian>()?;
        let status = BlobStatus::from_byte(cursor.read_u8()?);
        Ok(Self { token, status })
    }
}

/// Whether the watch expects a write to be echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Write,
    WriteBack,
}

impl WriteKind {
    fn opcode(self) -> u8 {
        match self {
            WriteKind::Write => opcode::WRITE,
            WriteKind::WriteBack => opcode::WRITE_BACK,
        }
    }
}

/// A record written by the watch into one of its databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchWrite {
    pub kind: WriteKind,
    pub token: u16,
    pub database: BlobDatabase,
    /// Seconds since the epoch; only plain writes carry one.
    pub timestamp: Option<u32>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WatchWrite {
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let kind = match cursor.read_u8()? {
            opcode::WRITE => WriteKind::Write,
            opcode::WRITE_BACK => WriteKind::WriteBack,
            other => return Err(PacketDecodeError::UnknownCommand(other)),
        };
        let token = cursor.read_u16::<LittleEndian>()?;
        let database = read_database(&mut cursor)?;
        let timestamp = match kind {
            WriteKind::Write => Some(cursor.read_u32::<LittleEndian>()?),
            WriteKind::WriteBack => None,
        };
        let key_len = cursor.read_u8()? as usize;
        let key = read_bytes(&mut cursor, key_len)?;
        let value_len = cursor.read_u16::<LittleEndian>()? as usize;
        let value = read_bytes(&mut cursor, value_len)?;

        Ok(Self {
            kind,
            token,
            database,
            timestamp,
            key,
            value,
        })
    }

    /// Kind and token of a write whose body may be malformed, so that it can
    /// still be answered.
    pub fn peek_header(bytes: &[u8]) -> Option<(WriteKind, u16)> {
        match bytes {
            [op, lo, hi, ..] => {
                let kind = match *op {
                    opcode::WRITE => WriteKind::Write,
                    opcode::WRITE_BACK => WriteKind::WriteBack,
                    _ => return None,
                };
                Some((kind, u16::from_le_bytes([*lo, *hi])))
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketEncodeError> {
        check_len("key", &self.key, MAX_KEY_LEN)?;
        check_len("value", &self.value, MAX_VALUE_LEN)?;

        let mut buf = vec![self.kind.opcode()];
        buf.extend_from_slice(&self.token.to_le_bytes());
        buf.push(self.database.id());
        if self.kind == WriteKind::Write {
            buf.extend_from_slice(&self.timestamp.unwrap_or_default().to_le_bytes());
        }
        buf.push(self.key.len() as u8);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }

    /// The response that acknowledges this write with `status`.
    pub fn response(&self, status: BlobStatus) -> WriteResponse {
        WriteResponse {
            kind: self.kind,
            token: self.token,
            status,
        }
    }
}

/// Phone's answer to a [`WatchWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub kind: WriteKind,
    pub token: u16,
    pub status: BlobStatus,
}

impl WriteResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.kind.opcode() | opcode::RESPONSE_FLAG];
        buf.extend_from_slice(&self.token.to_le_bytes());
        buf.push(self.status.as_byte());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let kind = match cursor.read_u8()? {
            op if op == opcode::WRITE | opcode::RESPONSE_FLAG => WriteKind::Write,
            op if op == opcode::WRITE_BACK | opcode::RESPONSE_FLAG => WriteKind::WriteBack,
            other => return Err(PacketDecodeError::UnknownCommand(other)),
        };
        let token = cursor.read_u16::<LittleEndian>()?;
        let status = BlobStatus::from_byte(cursor.read_u8()?);
        Ok(Self {
            kind,
            token,
            status,
        })
    }
}

fn read_database(cursor: &mut Cursor<&[u8]>) -> Result<BlobDatabase, PacketDecodeError> {
    let id = cursor.read_u8()?;
    BlobDatabase::from_id(id).ok_or(PacketDecodeError::UnknownDatabase(id))
}
