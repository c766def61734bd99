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

//! BlobDB endpoint service: correlates commands with responses by token and
//! routes watch writes to the database that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::BlobDbError;
use crate::packets::blobdb::{
    BlobCommand, BlobDatabase, BlobResponse, BlobStatus, WatchWrite, WriteResponse,
};
use crate::protocol::{Endpoint, ProtocolHandler, ProtocolMessage};

const WRITE_QUEUE: usize = 16;

/// Shared per connection by every database.
pub struct BlobDbService {
    protocol: ProtocolHandler,
    pending: Mutex<HashMap<u16, oneshot::Sender<BlobStatus>>>,
    writers: Mutex<HashMap<BlobDatabase, mpsc::Sender<WatchWrite>>>,
}

impl BlobDbService {
    /// Create a new service on top of `protocol`.
    pub fn new(protocol: ProtocolHandler) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            pending: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Start routing inbound BlobDB messages.
    pub fn spawn(self: &Arc<Self>, tasks: &mut JoinSet<()>) {
        // Subscribe before spawning so nothing sent in between is missed.
        let inbound = self.protocol.subscribe();
        let guard = PendingGuard(Arc::clone(self));
        tasks.spawn(async move {
            guard.0.dispatch(inbound).await;
            drop(guard);
        });
    }

    async fn dispatch(&self, mut inbound: broadcast::Receiver<ProtocolMessage>) {
        loop {
            let message = match inbound.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("BlobDB dispatcher lagged, {} message(s) dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match message.endpoint {
                Endpoint::BlobDb => match BlobResponse::decode(&message.payload) {
                    Ok(response) => self.complete(response),
                    Err(e) => warn!("Malformed BlobDB response: {}", e),
                },
                Endpoint::BlobDb2 => self.route_write(&message.payload).await,
                Endpoint::PutBytes => {}
            }
        }
        debug!("BlobDB dispatcher stopped");
    }

    fn complete(&self, response: BlobResponse) {
        match self.pending.lock().remove(&response.token) {
            Some(waiter) => {
                let _ = waiter.send(response.status);
            }
            None => warn!("BlobDB response for unknown token {}", response.token),
        }
    }

    async fn route_write(&self, payload: &[u8]) {
        let write = match WatchWrite::decode(payload) {
            Ok(write) => write,
            Err(e) => {
                warn!("Malformed BlobDB write: {}", e);
                if let Some((kind, token)) = WatchWrite::peek_header(payload) {
                    self.respond_or_log(WriteResponse {
                        kind,
                        token,
                        status: BlobStatus::InvalidData,
                    })
                    .await;
                }
                return;
            }
        };

        let writer = self.writers.lock().get(&write.database).cloned();
        let unrouted = match writer {
            Some(writer) => writer.send(write).await.err().map(|e| e.0),
            None => Some(write),
        };
        if let Some(write) = unrouted {
            debug!("No handler for writes to {:?}", write.database);
            self.respond_or_log(write.response(BlobStatus::NotSupported))
                .await;
        }
    }

    /// Receive every watch write aimed at `database`.
    pub fn register_writes(&self, database: BlobDatabase) -> mpsc::Receiver<WatchWrite> {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE);
        if self.writers.lock().insert(database, tx).is_some() {
            warn!("Replacing write handler for {:?}", database);
        }
        rx
    }

    /// Send a command and wait for the watch's status.
    ///
    /// `build` receives the token allocated for this command.
    pub async fn send(
        &self,
        build: impl FnOnce(u16) -> BlobCommand,
        response_timeout: Duration,
    ) -> Result<BlobStatus, BlobDbError> {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut pending = self.pending.lock();
            let token = loop {
                let candidate: u16 = rand::random();
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };
            pending.insert(token, tx);
            token
        };

        let command = build(token);
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.lock().remove(&token);
                return Err(e.into());
            }
        };
        if self.protocol.send(Endpoint::BlobDb, payload).await.is_err() {
            self.pending.lock().remove(&token);
            return Err(BlobDbError::Disconnected);
        }

        match timeout(response_timeout, rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(BlobDbError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&token);
                Err(BlobDbError::Timeout {
                    token,
                    timeout: response_timeout,
                })
            }
        }
    }

    /// Answer a watch write.
    pub async fn respond(&self, response: WriteResponse) -> Result<(), BlobDbError> {
        self.protocol
            .send(Endpoint::BlobDb2, response.encode())
            .await
            .map_err(|_| BlobDbError::Disconnected)
    }

    async fn respond_or_log(&self, response: WriteResponse) {
        if let Err(e) = self.respond(response).await {
            warn!("Could not answer BlobDB write {}: {}", response.token, e);
        }
    }

    /// Fail every command still waiting for a response.
    pub fn cancel_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        if !pending.is_empty() {
            info!("Cancelling {} pending BlobDB command(s)", pending.len());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Fails outstanding commands when the dispatcher goes away.
struct PendingGuard(Arc<BlobDbService>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.cancel_pending();
    }
}
