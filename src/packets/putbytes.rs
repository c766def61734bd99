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

//! PutBytes payloads. All integers are big-endian.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::{read_bytes, PacketDecodeError};

mod opcode {
    pub const INIT: u8 = 0x01;
    pub const PUT: u8 = 0x02;
    pub const COMMIT: u8 = 0x03;
    pub const ABORT: u8 = 0x04;
    pub const INSTALL: u8 = 0x05;
}

/// Set on the object type byte of an `AppInit`.
const APP_INIT_FLAG: u8 = 0x80;

/// Kind of object being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Firmware = 1,
    Recovery = 2,
    SystemResources = 3,
    AppResources = 4,
    AppExecutable = 5,
    File = 6,
    Worker = 7,
}

impl ObjectType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        use ObjectType::*;
        Some(match value {
            1 => Firmware,
            2 => Recovery,
            3 => SystemResources,
            4 => AppResources,
            5 => AppExecutable,
            6 => File,
            7 => Worker,
            _ => return None,
        })
    }
}

/// A request sent to the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutBytesRequest {
    Init {
        size: u32,
        object_type: ObjectType,
        bank: u8,
        filename: String,
    },
    AppInit {
        size: u32,
        object_type: ObjectType,
        app_id: u32,
    },
    Put {
        cookie: u32,
        data: Vec<u8>,
    },
    Commit {
        cookie: u32,
        crc: u32,
    },
    Abort {
        cookie: u32,
    },
    Install {
        cookie: u32,
    },
}

impl PutBytesRequest {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            PutBytesRequest::Init { .. } => "Init",
            PutBytesRequest::AppInit { .. } => "AppInit",
            PutBytesRequest::Put { .. } => "Put",
            PutBytesRequest::Commit { .. } => "Commit",
            PutBytesRequest::Abort { .. } => "Abort",
            PutBytesRequest::Install { .. } => "Install",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            PutBytesRequest::Init {
                size,
                object_type,
                bank,
                filename,
            } => {
                buf.push(opcode::INIT);
                buf.extend_from_slice(&size.to_be_bytes());
                buf.push(object_type.as_byte());
                buf.push(*bank);
                buf.extend_from_slice(filename.as_bytes());
                buf.push(0);
            }
            PutBytesRequest::AppInit {
                size,
                object_type,
                app_id,
            } => {
                buf.push(opcode::INIT);
                buf.extend_from_slice(&size.to_be_bytes());
                buf.push(object_type.as_byte() | APP_INIT_FLAG);
                buf.extend_from_slice(&app_id.to_be_bytes());
            }
            PutBytesRequest::Put { cookie, data } => {
                buf.push(opcode::PUT);
                buf.extend_from_slice(&cookie.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
            }
            PutBytesRequest::Commit { cookie, crc } => {
                buf.push(opcode::COMMIT);
                buf.extend_from_slice(&cookie.to_be_bytes());
                buf.extend_from_slice(&crc.to_be_bytes());
            }
            PutBytesRequest::Abort { cookie } => {
                buf.push(opcode::ABORT);
                buf.extend_from_slice(&cookie.to_be_bytes());
            }
            PutBytesRequest::Install { cookie } => {
                buf.push(opcode::INSTALL);
                buf.extend_from_slice(&cookie.to_be_bytes());
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        match cursor.read_u8()? {
            opcode::INIT => {
                let size = cursor.read_u32::<BigEndian>()?;
                let raw_type = cursor.read_u8()?;
                let object_type = ObjectType::from_byte(raw_type & !APP_INIT_FLAG)
                    .ok_or(PacketDecodeError::UnknownObjectType(raw_type))?;
                if raw_type & APP_INIT_FLAG != 0 {
                    let app_id = cursor.read_u32::<BigEndian>()?;
                    Ok(PutBytesRequest::AppInit {
                        size,
                        object_type,
                        app_id,
                    })
                } else {
                    let bank = cursor.read_u8()?;
                    let mut rest = Vec::new();
                    cursor.read_to_end(&mut rest)?;
                    let end = rest
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or(PacketDecodeError::Invalid("filename is not terminated"))?;
                    let filename = String::from_utf8(rest[..end].to_vec())
                        .map_err(|_| PacketDecodeError::Invalid("filename is not UTF-8"))?;
                    Ok(PutBytesRequest::Init {
                        size,
                        object_type,
                        bank,
                        filename,
                    })
                }
            }
            opcode::PUT => {
                let cookie = cursor.read_u32::<BigEndian>()?;
                let len = cursor.read_u32::<BigEndian>()? as usize;
                let data = read_bytes(&mut cursor, len)?;
                Ok(PutBytesRequest::Put { cookie, data })
            }
            opcode::COMMIT => {
                let cookie = cursor.read_u32::<BigEndian>()?;
                let crc = cursor.read_u32::<BigEndian>()?;
                Ok(PutBytesRequest::Commit { cookie, crc })
            }
            opcode::ABORT => Ok(PutBytesRequest::Abort {
                cookie: cursor.read_u32::<BigEndian>()?,
            }),
            opcode::INSTALL => Ok(PutBytesRequest::Install {
                cookie: cursor.read_u32::<BigEndian>()?,
            }),
            other => Err(PacketDecodeError::UnknownCommand(other)),
        }
    }
}

/// Ack or nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutBytesResult {
    Ack,
    Nack,
}

/// The watch's answer to every [`PutBytesRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutBytesResponse {
    pub result: PutBytesResult,
    pub cookie: u32,
}

impl PutBytesResponse {
    pub fn ack(cookie: u32) -> Self {
        Self {
            result: PutBytesResult::Ack,
            cookie,
        }
    }

    pub fn nack(cookie: u32) -> Self {
        Self {
            result: PutBytesResult::Nack,
            cookie,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.result == PutBytesResult::Ack
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.push(match self.result {
            PutBytesResult::Ack => 1,
            PutBytesResult::Nack => 2,
        });
        buf.extend_from_slice(&self.cookie.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let result = match cursor.read_u8()? {
            1 => PutBytesResult::Ack,
            2 => PutBytesResult::Nack,
            other => return Err(PacketDecodeError::UnknownResult(other)),
        };
        let cookie = cursor.read_u32::<BigEndian>()?;
        Ok(Self { result, cookie })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_layout() {
        let init = PutBytesRequest::Init {
            size: 0x0102_0304,
            object_type: ObjectType::File,
            bank: 2,
            filename: "res".to_string(),
        };
        let bytes = init.encode();
        assert_eq!(bytes, vec![0x01, 1, 2, 3, 4, 6, 2, b'r', b'e', b's', 0]);
        assert_eq!(PutBytesRequest::decode(&bytes), Ok(init));
    }

    #[test]
    fn test_app_init_sets_flag() {
        let init = PutBytesRequest::AppInit {
            size: 10,
            object_type: ObjectType::AppExecutable,
            app_id: 7,
        };
        let bytes = init.encode();
        assert_eq!(bytes, vec![0x01, 0, 0, 0, 10, 0x85, 0, 0, 0, 7]);
        assert_eq!(PutBytesRequest::decode(&bytes), Ok(init));
    }

    #[test]
    fn test_put_commit_abort_install_layout() {
        let put = PutBytesRequest::Put {
            cookie: 0xAABBCCDD,
            data: vec![9, 9],
        };
        assert_eq!(
            put.encode(),
            vec![0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0, 0, 0, 2, 9, 9]
        );
        assert_eq!(
            PutBytesRequest::Commit { cookie: 1, crc: 2 }.encode(),
            vec![0x03, 0, 0, 0, 1, 0, 0, 0, 2]
        );
        assert_eq!(
            PutBytesRequest::Abort { cookie: 1 }.encode(),
            vec![0x04, 0, 0, 0, 1]
        );
        assert_eq!(
            PutBytesRequest::Install { cookie: 1 }.encode(),
            vec![0x05, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_response_decoding() {
        assert_eq!(
            PutBytesResponse::decode(&[1, 0, 0, 0x10, 0x01]),
            Ok(PutBytesResponse::ack(0x1001))
        );
        assert_eq!(
            PutBytesResponse::decode(&[2, 0, 0, 0, 5]),
            Ok(PutBytesResponse::nack(5))
        );
        assert_eq!(
            PutBytesResponse::decode(&[3, 0, 0, 0, 5]),
            Err(PacketDecodeError::UnknownResult(3))
        );
        assert_eq!(
            PutBytesResponse::decode(&[1, 0]),
            Err(PacketDecodeError::Truncated)
        );
    }

    #[test]
    fn test_unterminated_filename() {
        assert_eq!(
            PutBytesRequest::decode(&[0x01, 0, 0, 0, 1, 6, 0, b'x']),
            Err(PacketDecodeError::Invalid("filename is not terminated"))
        );
    }
}
