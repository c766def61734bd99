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

//! Payload codecs for the messages carried over the reliable pipe.
//!
//! Endpoint framing lives outside this crate; these types only cover the
//! payload bytes of each endpoint.

pub mod blobdb;
pub mod notification_app;
pub mod putbytes;

use std::io::{Cursor, Read};

use thiserror::Error;

/// Errors produced while decoding a payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketDecodeError {
    #[error("payload truncated")]
    Truncated,
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("unknown database id {0}")]
    UnknownDatabase(u8),
    #[error("unknown object type {0}")]
    UnknownObjectType(u8),
    #[error("unknown result code {0}")]
    UnknownResult(u8),
    #[error("invalid field: {0}")]
    Invalid(&'static str),
}

impl From<std::io::Error> for PacketDecodeError {
    fn from(_: std::io::Error) -> Self {
        // Reading from an in-memory cursor can only run out of bytes.
        PacketDecodeError::Truncated
    }
}

/// Errors produced while encoding a payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketEncodeError {
    #[error("field {field} is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

pub(crate) fn read_bytes(
    cursor: &mut Cursor<&[u8]>,
    len: usize,
) -> Result<Vec<u8>, PacketDecodeError> {
    let mut bytes = vec![0; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

pub(crate) fn check_len(
    field: &'static str,
    bytes: &[u8],
    max: usize,
) -> Result<(), PacketEncodeError> {
    if bytes.len() > max {
        return Err(PacketEncodeError::TooLong {
            field,
            len: bytes.len(),
            max,
        });
    }
    Ok(())
}
