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

//! One transfer at a time: init, put every chunk, commit, and optionally
//! install.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{PutBytesError, PutBytesService, Stm32Crc};
use crate::packets::putbytes::ObjectType;

/// Progress of a transfer, reported as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open { cookie: u32 },
    Sending { cookie: u32, bytes_sent: u32, total: u32 },
    Committed { cookie: u32 },
    Installed { cookie: u32 },
    Aborted { cookie: Option<u32> },
}

enum Target<'a> {
    File {
        object_type: ObjectType,
        bank: u8,
        filename: &'a str,
    },
    App {
        object_type: ObjectType,
        app_id: u32,
    },
}

pub struct PutBytesSession {
    service: Arc<PutBytesService>,
    chunk_size: usize,
    active: Mutex<()>,
    state: parking_lot::Mutex<SessionState>,
}

impl PutBytesSession {
    pub fn new(service: Arc<PutBytesService>, chunk_size: usize) -> Self {
        Self {
            service,
            chunk_size: chunk_size.max(1),
            active: Mutex::new(()),
            state: parking_lot::Mutex::new(SessionState::Idle),
        }
    }

    /// Where the latest transfer stands.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Send a file or firmware image. Returns the session cookie, which is
    /// needed to install the object afterwards.
    pub async fn begin_session<R, F>(
        &self,
        size: u32,
        object_type: ObjectType,
        bank: u8,
        filename: &str,
        source: R,
        progress: F,
    ) -> Result<u32, PutBytesError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(SessionState) + Send,
    {
        let target = Target::File {
            object_type,
            bank,
            filename,
        };
        self.transfer(target, size, source, progress).await
    }

    /// Send one part (binary, resources, worker) of an app.
    pub async fn begin_app_session<R, F>(
        &self,
        app_id: u32,
        size: u32,
        object_type: ObjectType,
        source: R,
        progress: F,
    ) -> Result<u32, PutBytesError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(SessionState) + Send,
    {
        let target = Target::App {
            object_type,
            app_id,
        };
        self.transfer(target, size, source, progress).await
    }

    /// Activate a committed object.
    pub async fn install(&self, cookie: u32) -> Result<(), PutBytesError> {
        let _active = self
            .active
            .try_lock()
            .map_err(|_| PutBytesError::AlreadyActive)?;
        if let Err(e) = self.service.install(cookie).await {
            self.abort(cookie).await;
            *self.state.lock() = SessionState::Aborted {
                cookie: Some(cookie),
            };
            return Err(e);
        }
        *self.state.lock() = SessionState::Installed { cookie };
        info!("Installed PutBytes object {:#010x}", cookie);
        Ok(())
    }

    async fn transfer<R, F>(
        &self,
        target: Target<'_>,
        size: u32,
        mut source: R,
        mut progress: F,
    ) -> Result<u32, PutBytesError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(SessionState) + Send,
    {
        let _active = self
            .active
            .try_lock()
            .map_err(|_| PutBytesError::AlreadyActive)?;

        let opened = match target {
            Target::File {
                object_type,
                bank,
                filename,
            } => self.service.init(size, object_type, bank, filename).await,
            Target::App {
                object_type,
                app_id,
            } => self.service.app_init(size, object_type, app_id).await,
        };
        let cookie = match opened {
            Ok(cookie) => cookie,
            Err(e) => {
                self.advance(&mut progress, SessionState::Aborted { cookie: None });
                return Err(e);
            }
        };
        self.advance(&mut progress, SessionState::Open { cookie });

        match self.send_all(cookie, size, &mut source, &mut progress).await {
            Ok(()) => {
                self.advance(&mut progress, SessionState::Committed { cookie });
                info!("PutBytes session {:#010x} committed {} bytes", cookie, size);
                Ok(cookie)
            }
            Err(e) => {
                warn!("PutBytes session {:#010x} failed: {}", cookie, e);
                if !matches!(e, PutBytesError::Disconnected) {
                    self.abort(cookie).await;
                }
                self.advance(&mut progress, SessionState::Aborted {
                    cookie: Some(cookie),
                });
                Err(e)
            }
        }
    }

    async fn send_all<R, F>(
        &self,
        cookie: u32,
        size: u32,
        source: &mut R,
        progress: &mut F,
    ) -> Result<(), PutBytesError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(SessionState) + Send,
    {
        let mut crc = Stm32Crc::new();
        let mut sent: u32 = 0;
        let mut buffer = vec![0u8; self.chunk_size];
        self.advance(progress, SessionState::Sending {
            cookie,
            bytes_sent: 0,
            total: size,
        });

        while sent < size {
            let want = self.chunk_size.min((size - sent) as usize);
            let read = fill(source, &mut buffer[..want]).await?;
            if read == 0 {
                warn!("Source ended after {} of {} bytes", sent, size);
                return Err(PutBytesError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", sent, size),
                )));
            }

            let chunk = &buffer[..read];
            crc.update(chunk);
            self.service.put(cookie, chunk.to_vec()).await?;
            sent += read as u32;
            self.advance(progress, SessionState::Sending {
                cookie,
                bytes_sent: sent,
                total: size,
            });
        }

        match self.service.commit(cookie, crc.finalize()).await {
            Ok(()) => Ok(()),
            Err(PutBytesError::Nack { .. } | PutBytesError::Timeout { .. }) => {
                Err(PutBytesError::CommitRejected {
                    cookie,
                    bytes_transferred: sent,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn advance(&self, progress: &mut impl FnMut(SessionState), state: SessionState) {
        *self.state.lock() = state;
        progress(state);
    }

    async fn abort(&self, cookie: u32) {
        if let Err(e) = self.service.abort(cookie).await {
            warn!("Could not abort PutBytes session {:#010x}: {}", cookie, e);
        }
    }
}

/// Read until `buffer` is full or the source ends.
async fn fill<R: AsyncRead + Unpin>(source: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = source.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
