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

//! BlobDB item storage using SQLite.
//!
//! The application layer stages changes here; the sync engine reads pending
//! items and marks them synced once the watch acknowledges them.

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::packets::blobdb::BlobDatabase;

/// Where an item stands relative to the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    PendingWrite,
    PendingDelete,
    SyncedToWatch,
}

impl SyncStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::PendingWrite => "PENDING_WRITE",
            SyncStatus::PendingDelete => "PENDING_DELETE",
            SyncStatus::SyncedToWatch => "SYNCED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_WRITE" => Some(SyncStatus::PendingWrite),
            "PENDING_DELETE" => Some(SyncStatus::PendingDelete),
            "SYNCED" => Some(SyncStatus::SyncedToWatch),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncStatus::SyncedToWatch)
    }
}

/// One record of one watch database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDbItem {
    pub database: BlobDatabase,
    pub watch_identifier: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub sync_status: SyncStatus,
    /// Bumped on every staged change.
    pub revision: i64,
}

/// Persistent item store with a change feed.
#[derive(Clone)]
pub struct ItemStore {
    conn: Arc<Mutex<Connection>>,
    changes: Arc<watch::Sender<u64>>,
}

const SELECT_COLUMNS: &str =
    "SELECT database_id, watch_identifier, item_key, value, sync_status, revision FROM blobdb_items";

impl ItemStore {
    /// Create or open the item database.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("items.db");
        info!("Opening item database: {:?}", db_path);

        Self::with_connection(Connection::open(&db_path)?)
    }

    /// Open a throwaway in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobdb_items (
                database_id INTEGER NOT NULL,
                watch_identifier TEXT NOT NULL,
                item_key BLOB NOT NULL,
                value BLOB NOT NULL,
                sync_status TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (database_id, watch_identifier, item_key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_status
             ON blobdb_items(database_id, watch_identifier, sync_status)",
            [],
        )?;

        let (changes, _) = watch::channel(0);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes: Arc::new(changes),
        })
    }

    /// Stage a new or changed value for the watch.
    pub fn stage_write(
        &self,
        database: BlobDatabase,
        watch_identifier: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO blobdb_items
                    (database_id, watch_identifier, item_key, value, sync_status, revision, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                 ON CONFLICT(database_id, watch_identifier, item_key) DO UPDATE SET
                    value = excluded.value,
                    sync_status = excluded.sync_status,
                    revision = revision + 1,
                    updated_at = excluded.updated_at",
                params![
                    database.id(),
                    watch_identifier,
                    key,
                    value,
                    SyncStatus::PendingWrite.as_str(),
                    Utc::now().timestamp()
                ],
            )?;
        }
        debug!("Staged write of {} bytes to {:?}", value.len(), database);
        self.notify();
        Ok(())
    }

    /// Stage removal of a key from the watch. The row stays until the watch
    /// acknowledges the delete.
    pub fn stage_delete(&self, database: BlobDatabase, watch_identifier: &str, key: &[u8]) -> Result<()> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO blobdb_items
                    (database_id, watch_identifier, item_key, value, sync_status, revision, updated_at)
                 VALUES (?1, ?2, ?3, X'', ?4, 1, ?5)
                 ON CONFLICT(database_id, watch_identifier, item_key) DO UPDATE SET
                    sync_status = excluded.sync_status,
                    revision = revision + 1,
                    updated_at = excluded.updated_at",
                params![
                    database.id(),
                    watch_identifier,
                    key,
                    SyncStatus::PendingDelete.as_str(),
                    Utc::now().timestamp()
                ],
            )?;
        }
        debug!("Staged delete in {:?}", database);
        self.notify();
        Ok(())
    }

    /// Record a value the watch already holds, replacing anything staged for
    /// that key. An in-flight command for an older revision can no longer
    /// mark the row synced.
    pub fn store_synced(
        &self,
        database: BlobDatabase,
        watch_identifier: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blobdb_items
                (database_id, watch_identifier, item_key, value, sync_status, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(database_id, watch_identifier, item_key) DO UPDATE SET
                value = excluded.value,
                sync_status = excluded.sync_status,
                revision = revision + 1,
                updated_at = excluded.updated_at",
            params![
                database.id(),
                watch_identifier,
                key,
                value,
                SyncStatus::SyncedToWatch.as_str(),
                Utc::now().timestamp()
            ],
        )?;
        debug!("Stored watch value for {:?}", database);
        Ok(())
    }

    /// Items of one (database, watch) that still need a command, oldest first.
    pub fn pending_for(&self, database: BlobDatabase, watch_identifier: &str) -> Result<Vec<BlobDbItem>> {
        self.query(
            &format!(
                "{} WHERE database_id = ?1 AND watch_identifier = ?2 AND sync_status != ?3
                 ORDER BY updated_at, rowid",
                SELECT_COLUMNS
            ),
            params![database.id(), watch_identifier, SyncStatus::SyncedToWatch.as_str()],
        )
    }

    /// Every item of one (database, watch).
    pub fn items_for(&self, database: BlobDatabase, watch_identifier: &str) -> Result<Vec<BlobDbItem>> {
        self.query(
            &format!(
                "{} WHERE database_id = ?1 AND watch_identifier = ?2 ORDER BY updated_at, rowid",
                SELECT_COLUMNS
            ),
            params![database.id(), watch_identifier],
        )
    }

    pub fn get(
        &self,
        database: BlobDatabase,
        watch_identifier: &str,
        key: &[u8],
    ) -> Result<Option<BlobDbItem>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!(
                    "{} WHERE database_id = ?1 AND watch_identifier = ?2 AND item_key = ?3",
                    SELECT_COLUMNS
                ),
                params![database.id(), watch_identifier, key],
                RawItem::from_row,
            )
            .optional()?;
        raw.map(RawItem::into_item).transpose()
    }

    /// Record that the watch acknowledged `item`.
    ///
    /// Only applies if the row has not been staged again since `item` was
    /// read; acknowledged deletes remove the row. Returns whether anything
    /// changed.
    pub fn mark_synced(&self, item: &BlobDbItem) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = match item.sync_status {
            SyncStatus::PendingWrite => conn.execute(
                "UPDATE blobdb_items SET sync_status = ?1
                 WHERE database_id = ?2 AND watch_identifier = ?3 AND item_key = ?4 AND revision = ?5",
                params![
                    SyncStatus::SyncedToWatch.as_str(),
                    item.database.id(),
                    item.watch_identifier,
                    item.key,
                    item.revision
                ],
            )?,
            SyncStatus::PendingDelete => conn.execute(
                "DELETE FROM blobdb_items
                 WHERE database_id = ?1 AND watch_identifier = ?2 AND item_key = ?3 AND revision = ?4",
                params![
                    item.database.id(),
                    item.watch_identifier,
                    item.key,
                    item.revision
                ],
            )?,
            SyncStatus::SyncedToWatch => 0,
        };
        Ok(changed > 0)
    }

    /// Mark everything of one (database, watch) as unsynced after the watch
    /// database was cleared.
    pub fn mark_all_pending(&self, database: BlobDatabase, watch_identifier: &str) -> Result<usize> {
        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE blobdb_items SET sync_status = ?1, revision = revision + 1
                 WHERE database_id = ?2 AND watch_identifier = ?3 AND sync_status = ?4",
                params![
                    SyncStatus::PendingWrite.as_str(),
                    database.id(),
                    watch_identifier,
                    SyncStatus::SyncedToWatch.as_str()
                ],
            )?
        };
        if changed > 0 {
            self.notify();
        }
        Ok(changed)
    }

    /// Change feed: the value changes whenever something is staged.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<BlobDbItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, RawItem::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawItem::into_item).collect()
    }
}

/// Row as stored, before the database id is validated.
struct RawItem {
    database_id: u8,
    watch_identifier: String,
    key: Vec<u8>,
    value: Vec<u8>,
    sync_status: String,
    revision: i64,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            database_id: row.get(0)?,
            watch_identifier: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
            sync_status: row.get(4)?,
            revision: row.get(5)?,
        })
    }

    fn into_item(self) -> Result<BlobDbItem> {
        let database = BlobDatabase::from_id(self.database_id)
            .ok_or_else(|| anyhow!("Unknown database id {} in store", self.database_id))?;
        let sync_status = SyncStatus::parse(&self.sync_status)
            .ok_or_else(|| anyhow!("Unknown sync status {:?} in store", self.sync_status))?;
        Ok(BlobDbItem {
            database,
            watch_identifier: self.watch_identifier,
            key: self.key,
            value: self.value,
            sync_status,
            revision: self.revision,
        })
    }
}
