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

//! Per-app notification preferences using SQLite.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::packets::notification_app::MuteState;

/// Notification preferences of one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAppRecord {
    pub package_name: String,
    pub name: String,
    pub mute_state: MuteState,
    /// When the mute state last changed, on either side.
    pub state_updated: DateTime<Utc>,
}

/// Notification preference database.
#[derive(Clone)]
pub struct NotificationAppStore {
    conn: Arc<Mutex<Connection>>,
}

impl NotificationAppStore {
    /// Create or open the preference database.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("notification_apps.db");
        info!("Opening notification app database: {:?}", db_path);

        Self::with_connection(Connection::open(&db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS notification_apps (
                package_name TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mute_state INTEGER NOT NULL,
                state_updated INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get(&self, package_name: &str) -> Result<Option<NotificationAppRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT package_name, name, mute_state, state_updated
                 FROM notification_apps WHERE package_name = ?1",
                [package_name],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All apps ordered by name.
    pub fn all(&self) -> Result<Vec<NotificationAppRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT package_name, name, mute_state, state_updated
             FROM notification_apps ORDER BY name, package_name",
        )?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Store a local change unconditionally.
    pub fn upsert(&self, record: &NotificationAppRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO notification_apps (package_name, name, mute_state, state_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(package_name) DO UPDATE SET
                name = excluded.name,
                mute_state = excluded.mute_state,
                state_updated = excluded.state_updated",
            params![
                record.package_name,
                record.name,
                record.mute_state.as_byte(),
                record.state_updated.timestamp()
            ],
        )?;
        Ok(())
    }

    /// Apply a record written by the watch.
    ///
    /// Unknown apps are inserted. Known apps only take the watch's values if
    /// the watch's change is strictly newer than ours. Returns whether the
    /// record was stored.
    pub fn update_from_watch(&self, record: &NotificationAppRecord) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT state_updated FROM notification_apps WHERE package_name = ?1",
                [&record.package_name],
                |row| row.get(0),
            )
            .optional()?;

        let incoming = record.state_updated.timestamp();
        let accept = match stored {
            None => true,
            Some(current) => incoming > current,
        };

        if accept {
            tx.execute(
                "INSERT INTO notification_apps (package_name, name, mute_state, state_updated)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(package_name) DO UPDATE SET
                    name = excluded.name,
                    mute_state = excluded.mute_state,
                    state_updated = excluded.state_updated",
                params![
                    record.package_name,
                    record.name,
                    record.mute_state.as_byte(),
                    incoming
                ],
            )?;
        } else {
            debug!(
                "Ignoring stale watch update for {} ({} <= {:?})",
                record.package_name, incoming, stored
            );
        }

        tx.commit()?;
        Ok(accept)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationAppRecord> {
    let mute: u8 = row.get(2)?;
    let updated_secs: i64 = row.get(3)?;
    Ok(NotificationAppRecord {
        package_name: row.get(0)?,
        name: row.get(1)?,
        mute_state: MuteState::from_byte(mute),
        state_updated: Utc
            .timestamp_opt(updated_secs, 0)
            .single()
            .unwrap_or_default(),
    })
}

/// Convert epoch seconds carried on the wire.
pub fn timestamp_from_secs(secs: u32) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(i64::from(secs), 0)
        .single()
        .ok_or_else(|| anyhow!("Invalid timestamp {}", secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(mute_state: MuteState, secs: u32) -> NotificationAppRecord {
        NotificationAppRecord {
            package_name: "com.google.Gmail".to_string(),
            name: "Gmail".to_string(),
            mute_state,
            state_updated: timestamp_from_secs(secs).unwrap(),
        }
    }

    #[test]
    fn test_watch_update_inserts_unknown_app() {
        let store = NotificationAppStore::in_memory().unwrap();
        assert!(store.update_from_watch(&record(MuteState::Always, 100)).unwrap());

        let stored = store.get("com.google.Gmail").unwrap().unwrap();
        assert_eq!(stored.mute_state, MuteState::Always);
        assert_eq!(stored.state_updated.timestamp(), 100);
    }

    #[test]
    fn test_last_writer_wins() {
        let store = NotificationAppStore::in_memory().unwrap();
        store.upsert(&record(MuteState::Weekends, 200)).unwrap();

        assert!(!store.update_from_watch(&record(MuteState::Always, 150)).unwrap());
        assert!(!store.update_from_watch(&record(MuteState::Always, 200)).unwrap());
        assert_eq!(
            store.get("com.google.Gmail").unwrap().unwrap().mute_state,
            MuteState::Weekends
        );

        assert!(store.update_from_watch(&record(MuteState::Weekdays, 201)).unwrap());
        assert_eq!(
            store.get("com.google.Gmail").unwrap().unwrap().mute_state,
            MuteState::Weekdays
        );
    }

    #[test]
    fn test_all_is_sorted_and_persistent() {
        let dir = tempdir().unwrap();
        {
            let store = NotificationAppStore::open(dir.path()).unwrap();
            store.upsert(&record(MuteState::Never, 1)).unwrap();
            let mut other = record(MuteState::Always, 2);
            other.package_name = "org.example.chat".to_string();
            other.name = "Chat".to_string();
            store.upsert(&other).unwrap();
        }
        let store = NotificationAppStore::open(dir.path()).unwrap();
        let names: Vec<String> = store.all().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Chat".to_string(), "Gmail".to_string()]);
    }
}
