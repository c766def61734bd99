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

//! Pebble Protocol over GATT.
//!
//! A sliding-window ARQ transport that turns a lossy, MTU-limited GATT
//! characteristic into a reliable, ordered byte pipe.

mod engine;
mod error;
mod link;
mod packet;
mod sender;
mod sequence;
mod window;

pub use engine::{PpogEngine, PpogHandle};
pub use error::PpogError;
pub use link::{Action, ConnectionParams, Link};
pub use packet::{
    DecodeError, Frame, PpogVersion, DATA_HEADER_OVERHEAD, LEGACY_WINDOW_SIZE,
    MAX_SUPPORTED_WINDOW_SIZE,
};
pub use sender::{ChannelPacketSender, PacketSender};
pub use sequence::Sequence;
pub use window::{QueuedFrame, SendWindow};
