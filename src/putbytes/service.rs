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

//! PutBytes request/response round trips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::PutBytesError;
use crate::packets::putbytes::{ObjectType, PutBytesRequest, PutBytesResponse};
use crate::protocol::{Endpoint, ProtocolHandler};

const RESPONSE_QUEUE: usize = 8;

pub struct PutBytesService {
    protocol: ProtocolHandler,
    responses: Mutex<mpsc::Receiver<PutBytesResponse>>,
    last_cookie: parking_lot::Mutex<Option<u32>>,
    response_timeout: Duration,
}

impl PutBytesService {
    /// Create the service and start collecting responses.
    pub fn spawn(
        protocol: ProtocolHandler,
        response_timeout: Duration,
        tasks: &mut JoinSet<()>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
        let mut inbound = protocol.subscribe();

        tasks.spawn(async move {
            loop {
                let message = match inbound.recv().await {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("PutBytes dispatcher lagged, {} message(s) dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if message.endpoint != Endpoint::PutBytes {
                    continue;
                }
                match PutBytesResponse::decode(&message.payload) {
                    Ok(response) => {
                        if tx.try_send(response).is_err() {
                            warn!("Dropping unsolicited PutBytes response {:?}", response);
                        }
                    }
                    Err(e) => warn!("Malformed PutBytes response: {}", e),
                }
            }
        });

        Arc::new(Self {
            protocol,
            responses: Mutex::new(rx),
            last_cookie: parking_lot::Mutex::new(None),
            response_timeout,
        })
    }

    /// Open a file or firmware session. Returns the session cookie.
    pub async fn init(
        &self,
        size: u32,
        object_type: ObjectType,
        bank: u8,
        filename: &str,
    ) -> Result<u32, PutBytesError> {
        let response = self
            .request(
                PutBytesRequest::Init {
                    size,
                    object_type,
                    bank,
                    filename: filename.to_string(),
                },
                None,
            )
            .await?;
        *self.last_cookie.lock() = Some(response.cookie);
        Ok(response.cookie)
    }

    /// Open a session for part of an installed app. Returns the session cookie.
    pub async fn app_init(
        &self,
        size: u32,
        object_type: ObjectType,
        app_id: u32,
    ) -> Result<u32, PutBytesError> {
        let response = self
            .request(
                PutBytesRequest::AppInit {
                    size,
                    object_type,
                    app_id,
                },
                None,
            )
            .await?;
        *self.last_cookie.lock() = Some(response.cookie);
        Ok(response.cookie)
    }

    pub async fn put(&self, cookie: u32, data: Vec<u8>) -> Result<(), PutBytesError> {
        self.request(PutBytesRequest::Put { cookie, data }, Some(cookie))
            .await
            .map(|_| ())
    }

    pub async fn commit(&self, cookie: u32, crc: u32) -> Result<(), PutBytesError> {
        self.request(PutBytesRequest::Commit { cookie, crc }, Some(cookie))
            .await
            .map(|_| ())
    }

    pub async fn install(&self, cookie: u32) -> Result<(), PutBytesError> {
        self.request(PutBytesRequest::Install { cookie }, Some(cookie))
            .await
            .map(|_| ())
    }

    /// Tell the watch to drop the session. Does not wait for an answer.
    pub async fn abort(&self, cookie: u32) -> Result<(), PutBytesError> {
        *self.last_cookie.lock() = None;
        debug!("Aborting PutBytes session {:#010x}", cookie);
        self.protocol
            .send(Endpoint::PutBytes, PutBytesRequest::Abort { cookie }.encode())
            .await
            .map_err(|_| PutBytesError::Disconnected)
    }

    /// Cookie of the most recently opened session, until it is aborted.
    pub fn last_cookie(&self) -> Option<u32> {
        *self.last_cookie.lock()
    }

    async fn request(
        &self,
        request: PutBytesRequest,
        expected_cookie: Option<u32>,
    ) -> Result<PutBytesResponse, PutBytesError> {
        let stage = request.name();
        let mut responses = self.responses.lock().await;

        // Answers to earlier requests that timed out.
        while let Ok(stale) = responses.try_recv() {
            debug!("Discarding stale PutBytes response {:?}", stale);
        }

        self.protocol
            .send(Endpoint::PutBytes, request.encode())
            .await
            .map_err(|_| PutBytesError::Disconnected)?;

        let response = match timeout(self.response_timeout, responses.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => return Err(PutBytesError::Disconnected),
            Err(_) => {
                warn!("PutBytes {} timed out after {:?}", stage, self.response_timeout);
                return Err(PutBytesError::Timeout {
                    stage,
                    cookie: expected_cookie,
                });
            }
        };

        if !response.is_ack() {
            warn!("Watch answered PutBytes {} with NACK", stage);
            return Err(PutBytesError::Nack {
                stage,
                cookie: expected_cookie,
            });
        }
        if let Some(expected) = expected_cookie {
            if response.cookie != expected {
                return Err(PutBytesError::CookieMismatch {
                    expected,
                    got: response.cookie,
                });
            }
        }
        Ok(response)
    }
}
