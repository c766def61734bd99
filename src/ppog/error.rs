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

//! Errors that end a PPoG connection.

use thiserror::Error;

use super::packet::DecodeError;
use super::sequence::Sequence;

/// Fatal transport errors. The caller tears the connection down and
/// reconnects; PPoG has no in-session recovery.
#[derive(Debug, Error)]
pub enum PpogError {
    #[error("reset handshake timed out")]
    HandshakeTimeout,

    #[error("expected {expected} during handshake but received {received}")]
    UnexpectedFrame {
        expected: &'static str,
        received: &'static str,
    },

    #[error("received {0} after the connection was established")]
    ResetDuringSession(&'static str),

    #[error("frame {sequence} still unacknowledged after {attempt} attempts")]
    RetriesExhausted { sequence: Sequence, attempt: u32 },

    #[error("packet sender rejected a frame")]
    SendFailed,

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("mtu cannot shrink from {current} to {requested}")]
    MtuDecrease { current: usize, requested: usize },

    #[error("mtu {0} leaves no room for data")]
    MtuTooSmall(usize),

    #[error("inbound frame source closed")]
    TransportClosed,

    #[error("inbound byte sink closed")]
    SinkClosed,
}
