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

//! Per-database sync engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{BlobDbError, BlobDbService, WriteHandler};
use crate::packets::blobdb::{BlobCommand, BlobDatabase, WatchWrite};
use crate::storage::{BlobDbItem, ItemStore, SyncStatus};

/// Outcome of one pass over the pending items.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    /// Acknowledged, but staged again while the command was in flight.
    pub superseded: usize,
}

/// Keeps one watch database in step with the local item store.
pub struct BlobDb {
    database: BlobDatabase,
    watch_identifier: String,
    service: Arc<BlobDbService>,
    store: ItemStore,
    response_timeout: Duration,
    /// One command in flight per database.
    command_lock: Mutex<()>,
}

impl BlobDb {
    pub fn new(
        database: BlobDatabase,
        watch_identifier: &str,
        service: Arc<BlobDbService>,
        store: ItemStore,
        response_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            database,
            watch_identifier: watch_identifier.to_string(),
            service,
            store,
            response_timeout,
            command_lock: Mutex::new(()),
        })
    }

    pub fn database(&self) -> BlobDatabase {
        self.database
    }

    /// Start syncing staged items and answering watch writes.
    pub fn spawn(self: &Arc<Self>, handler: Arc<dyn WriteHandler>, tasks: &mut JoinSet<()>) {
        let writes = self.service.register_writes(self.database);
        tasks.spawn(Arc::clone(self).run_writes(writes, handler));
        tasks.spawn(Arc::clone(self).run_sync());
    }

    async fn run_sync(self: Arc<Self>) {
        let mut changes = self.store.subscribe();
        info!("Syncing {:?} for {}", self.database, self.watch_identifier);

        loop {
            let _ = changes.borrow_and_update();
            let report = self.sync_pending().await;
            if report.failed > 0 {
                warn!(
                    "{:?}: {} item(s) left pending until the next change",
                    self.database, report.failed
                );
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
        debug!("Sync loop for {:?} stopped", self.database);
    }

    async fn run_writes(
        self: Arc<Self>,
        mut writes: mpsc::Receiver<WatchWrite>,
        handler: Arc<dyn WriteHandler>,
    ) {
        while let Some(write) = writes.recv().await {
            let status = handler.handle_write(&write);
            debug!(
                "Watch write {} to {:?} answered {:?}",
                write.token, self.database, status
            );
            if let Err(e) = self.service.respond(write.response(status)).await {
                warn!("Could not answer watch write {}: {}", write.token, e);
                break;
            }
        }
    }

    /// Push every pending item to the watch, one command at a time.
    ///
    /// Failures leave the item pending; they are never retried within a pass.
    pub async fn sync_pending(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let pending = match self.store.pending_for(self.database, &self.watch_identifier) {
            Ok(pending) => pending,
            Err(e) => {
                error!("Could not read pending items for {:?}: {}", self.database, e);
                return report;
            }
        };

        for item in pending {
            let result = match item.sync_status {
                SyncStatus::PendingWrite => self.insert(&item.key, &item.value).await,
                SyncStatus::PendingDelete => self.delete(&item.key).await,
                SyncStatus::SyncedToWatch => continue,
            };

            match result {
                Ok(()) => match self.store.mark_synced(&item) {
                    Ok(true) => report.synced += 1,
                    Ok(false) => report.superseded += 1,
                    Err(e) => {
                        error!("Could not mark item synced: {}", e);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!("{}: {}", describe(&item), e);
                    report.failed += 1;
                    if matches!(e, BlobDbError::Disconnected) {
                        break;
                    }
                }
            }
        }

        if report != SyncReport::default() {
            debug!("{:?} sync pass: {:?}", self.database, report);
        }
        report
    }

    pub async fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), BlobDbError> {
        let database = self.database;
        self.command(|token| BlobCommand::Insert {
            token,
            database,
            key: key.to_vec(),
            value: value.to_vec(),
        })
        .await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<(), BlobDbError> {
        let database = self.database;
        self.command(|token| BlobCommand::Delete {
            token,
            database,
            key: key.to_vec(),
        })
        .await
    }

    /// Wipe the watch database. Everything stored locally is resent.
    pub async fn clear(&self) -> Result<(), BlobDbError> {
        let database = self.database;
        self.command(|token| BlobCommand::Clear { token, database })
            .await?;

        match self.store.mark_all_pending(self.database, &self.watch_identifier) {
            Ok(count) => info!("Cleared {:?}, {} item(s) to resend", self.database, count),
            Err(e) => error!("Could not requeue items after clearing {:?}: {}", self.database, e),
        }
        Ok(())
    }

    async fn command(&self, build: impl FnOnce(u16) -> BlobCommand) -> Result<(), BlobDbError> {
        let _guard = self.command_lock.lock().await;
        let status = self.service.send(build, self.response_timeout).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(BlobDbError::Rejected(status))
        }
    }
}

fn describe(item: &BlobDbItem) -> String {
    let action = match item.sync_status {
        SyncStatus::PendingDelete => "delete",
        _ => "insert",
    };
    format!(
        "Failed to {} {} byte key in {:?}",
        action,
        item.key.len(),
        item.database
    )
}
