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

//! PPoG frame codec.
//!
//! Every frame starts with a header byte: bits `[7:3]` carry the sequence,
//! bits `[2:0]` the frame type.

use thiserror::Error;

use super::sequence::Sequence;

const SEQUENCE_MASK: u8 = 0b1111_1000;
const TYPE_MASK: u8 = 0b0000_0111;

/// Bytes reserved per data frame for the header (and GATT overhead).
pub const DATA_HEADER_OVERHEAD: usize = 4;

/// Largest window either side may advertise.
pub const MAX_SUPPORTED_WINDOW_SIZE: u8 = 25;

/// Window assumed when a peer does not negotiate one.
pub const LEGACY_WINDOW_SIZE: u8 = 4;

/// Frame type discriminants.
mod frame_type {
    pub const DATA: u8 = 0b000;
    pub const ACK: u8 = 0b001;
    pub const RESET_REQUEST: u8 = 0b010;
    pub const RESET_COMPLETE: u8 = 0b011;
}

/// Protocol version negotiated during reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpogVersion {
    V0,
    V1,
}

impl PpogVersion {
    pub fn as_byte(self) -> u8 {
        match self {
            PpogVersion::V0 => 0,
            PpogVersion::V1 => 1,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(PpogVersion::V0),
            1 => Some(PpogVersion::V1),
            _ => None,
        }
    }

    /// Whether `ResetComplete` carries window sizes.
    pub fn supports_window_negotiation(self) -> bool {
        matches!(self, PpogVersion::V1)
    }

    /// Whether acks may acknowledge several data frames at once.
    pub fn supports_coalesced_acking(self) -> bool {
        matches!(self, PpogVersion::V1)
    }
}

/// A single PPoG frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        sequence: Sequence,
        payload: Vec<u8>,
    },
    Ack {
        sequence: Sequence,
    },
    ResetRequest {
        sequence: Sequence,
        version: PpogVersion,
    },
    ResetComplete {
        sequence: Sequence,
        rx_window: u8,
        tx_window: u8,
    },
}

/// Errors produced while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame type {0:#05b}")]
    UnknownType(u8),
    #[error("reset request without a version byte")]
    MissingVersion,
    #[error("unsupported protocol version {0}")]
    UnknownVersion(u8),
}

impl Frame {
    pub fn sequence(&self) -> Sequence {
        match self {
            Frame::Data { sequence, .. }
            | Frame::Ack { sequence }
            | Frame::ResetRequest { sequence, .. }
            | Frame::ResetComplete { sequence, .. } => *sequence,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "Data",
            Frame::Ack { .. } => "Ack",
            Frame::ResetRequest { .. } => "ResetRequest",
            Frame::ResetComplete { .. } => "ResetComplete",
        }
    }

    /// Serialize the frame.
    ///
    /// `version` only matters for `ResetComplete`, whose window fields are
    /// written when the version supports window negotiation.
    pub fn encode(&self, version: PpogVersion) -> Vec<u8> {
        let header = |ty: u8| (self.sequence().value() << 3) | ty;
        match self {
            Frame::Data { payload, .. } => {
                let mut bytes = Vec::with_capacity(payload.len() + 1);
                bytes.push(header(frame_type::DATA));
                bytes.extend_from_slice(payload);
                bytes
            }
            Frame::Ack { .. } => vec![header(frame_type::ACK)],
            Frame::ResetRequest { version, .. } => {
                vec![header(frame_type::RESET_REQUEST), version.as_byte()]
            }
            Frame::ResetComplete {
                rx_window,
                tx_window,
                ..
            } => {
                if version.supports_window_negotiation() {
                    vec![header(frame_type::RESET_COMPLETE), *rx_window, *tx_window]
                } else {
                    vec![header(frame_type::RESET_COMPLETE)]
                }
            }
        }
    }

    /// Parse a raw frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&first, rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let sequence = Sequence::new((first & SEQUENCE_MASK) >> 3);

        match first & TYPE_MASK {
            frame_type::DATA => Ok(Frame::Data {
                sequence,
                payload: rest.to_vec(),
            }),
            frame_type::ACK => Ok(Frame::Ack { sequence }),
            frame_type::RESET_REQUEST => {
                let raw = *rest.first().ok_or(DecodeError::MissingVersion)?;
                let version =
                    PpogVersion::from_byte(raw).ok_or(DecodeError::UnknownVersion(raw))?;
                Ok(Frame::ResetRequest { sequence, version })
            }
            frame_type::RESET_COMPLETE => {
                let (rx_window, tx_window) = match rest {
                    [rx, tx, ..] => (*rx, *tx),
                    _ => (LEGACY_WINDOW_SIZE, LEGACY_WINDOW_SIZE),
                };
                Ok(Frame::ResetComplete {
                    sequence,
                    rx_window,
                    tx_window,
                })
            }
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}
