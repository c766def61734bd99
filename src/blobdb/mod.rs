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

//! BlobDB synchronization.
//!
//! A [`BlobDbService`] per connection correlates commands with responses and
//! routes watch writes. A [`BlobDb`] per (database, watch) pushes locally
//! staged items to the watch and answers the watch's own writes through a
//! [`WriteHandler`].

mod handlers;
mod service;
mod sync;

use std::time::Duration;

use thiserror::Error;

use crate::packets::blobdb::BlobStatus;
use crate::packets::PacketEncodeError;

pub use handlers::{NotSupported, NotificationPrefs, WriteHandler};
pub use service::BlobDbService;
pub use sync::{BlobDb, SyncReport};

#[derive(Debug, Error)]
pub enum BlobDbError {
    #[error("no response to token {token} within {timeout:?}")]
    Timeout { token: u16, timeout: Duration },

    #[error("watch rejected command: {0:?}")]
    Rejected(BlobStatus),

    #[error("connection closed")]
    Disconnected,

    #[error("could not encode command: {0}")]
    Encode(#[from] PacketEncodeError),
}
