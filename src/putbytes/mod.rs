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

//! PutBytes: stop-and-wait transfer of apps, resources and firmware.

mod crc;
mod service;
mod session;

use thiserror::Error;

pub use crc::Stm32Crc;
pub use service::PutBytesService;
pub use session::{PutBytesSession, SessionState};

#[derive(Debug, Error)]
pub enum PutBytesError {
    #[error("watch answered {stage} with NACK")]
    Nack {
        stage: &'static str,
        cookie: Option<u32>,
    },

    #[error("no answer to {stage}")]
    Timeout {
        stage: &'static str,
        cookie: Option<u32>,
    },

    #[error("watch rejected commit of session {cookie:#010x} after {bytes_transferred} bytes")]
    CommitRejected { cookie: u32, bytes_transferred: u32 },

    #[error("a transfer is already running")]
    AlreadyActive,

    #[error("response for session {got:#010x}, expected {expected:#010x}")]
    CookieMismatch { expected: u32, got: u32 },

    #[error("could not read transfer source: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Disconnected,
}
