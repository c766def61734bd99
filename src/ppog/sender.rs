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

//! Capability used by the engine to put raw frames on the wire.

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;

/// Outbound half of the GATT transport, implemented per platform.
pub trait PacketSender: Send + Sync {
    /// Write one raw frame. Returns `false` if the transport refused it.
    fn send_packet(&self, packet: Vec<u8>) -> BoxFuture<'_, bool>;

    /// Whether the transport was restored by the OS with the peer already
    /// subscribed. Such a peer will not start a reset on its own.
    fn was_restored_with_subscribed_peer(&self) -> bool {
        false
    }
}

/// Packet sender backed by a channel.
///
/// The receiving end is typically a GATT writer task, or another engine's
/// inbound frame source when two engines are wired back to back.
#[derive(Debug, Clone)]
pub struct ChannelPacketSender {
    tx: mpsc::Sender<Vec<u8>>,
    restored_with_subscription: bool,
}

impl ChannelPacketSender {
    /// Create a sender writing into `tx`.
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx,
            restored_with_subscription: false,
        }
    }

    /// Mark the transport as restored with a subscribed peer.
    pub fn restored_with_subscription(mut self, restored: bool) -> Self {
        self.restored_with_subscription = restored;
        self
    }
}

impl PacketSender for ChannelPacketSender {
    fn send_packet(&self, packet: Vec<u8>) -> BoxFuture<'_, bool> {
        async move { self.tx.send(packet).await.is_ok() }.boxed()
    }

    fn was_restored_with_subscribed_peer(&self) -> bool {
        self.restored_with_subscription
    }
}
