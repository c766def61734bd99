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

//! Boundary between the services and the message framing layer.
//!
//! Services hand payloads for an endpoint to a [`ProtocolHandler`]; the
//! framing layer drains them from the matching [`ProtocolPort`], frames them
//! onto the PPoG byte stream, and publishes decoded inbound messages back
//! through the port.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// Endpoints served by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    BlobDb,
    BlobDb2,
    PutBytes,
}

impl Endpoint {
    pub fn id(self) -> u16 {
        match self {
            Endpoint::BlobDb => 0xB1DB,
            Endpoint::BlobDb2 => 0xB2DB,
            Endpoint::PutBytes => 0xBEEF,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0xB1DB => Some(Endpoint::BlobDb),
            0xB2DB => Some(Endpoint::BlobDb2),
            0xBEEF => Some(Endpoint::PutBytes),
            _ => None,
        }
    }
}

/// One payload addressed to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub endpoint: Endpoint,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    pub fn new(endpoint: Endpoint, payload: Vec<u8>) -> Self {
        Self { endpoint, payload }
    }
}

/// The framing layer is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("protocol channel closed")]
pub struct ProtocolClosed;

/// Service-side handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    outbound: mpsc::Sender<ProtocolMessage>,
    inbound: broadcast::Sender<ProtocolMessage>,
}

/// Framing-side handle.
#[derive(Debug)]
pub struct ProtocolPort {
    pub outbound: mpsc::Receiver<ProtocolMessage>,
    inbound: broadcast::Sender<ProtocolMessage>,
}

impl ProtocolHandler {
    /// Create a connected handler and port.
    pub fn new(capacity: usize) -> (Self, ProtocolPort) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, _) = broadcast::channel(capacity);
        let handler = Self {
            outbound: outbound_tx,
            inbound: inbound_tx.clone(),
        };
        let port = ProtocolPort {
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        (handler, port)
    }

    /// Queue a payload for the framing layer.
    pub async fn send(&self, endpoint: Endpoint, payload: Vec<u8>) -> Result<(), ProtocolClosed> {
        trace!("Sending {} bytes to {:?}", payload.len(), endpoint);
        self.outbound
            .send(ProtocolMessage::new(endpoint, payload))
            .await
            .map_err(|_| ProtocolClosed)
    }

    /// Receive every inbound message from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolMessage> {
        self.inbound.subscribe()
    }
}

impl ProtocolPort {
    /// Publish a decoded inbound message. Returns how many services saw it.
    pub fn deliver(&self, message: ProtocolMessage) -> usize {
        self.inbound.send(message).unwrap_or(0)
    }
}
