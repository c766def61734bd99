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

//! Handlers for records the watch writes into its databases.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::packets::blobdb::{string_key, BlobDatabase, BlobStatus, WatchWrite};
use crate::packets::notification_app::{MuteState, NotificationAppItem};
use crate::storage::{timestamp_from_secs, ItemStore, NotificationAppRecord, NotificationAppStore};

/// Applies a watch write to local state and decides the status to answer with.
///
/// Handlers never fail: every problem is reported through the status.
pub trait WriteHandler: Send + Sync {
    fn handle_write(&self, _write: &WatchWrite) -> BlobStatus {
        BlobStatus::NotSupported
    }
}

/// Rejects every write.
pub struct NotSupported;

impl WriteHandler for NotSupported {}

/// Notification preferences, kept in sync in both directions.
///
/// Watch writes are merged last-writer-wins on the record's update
/// timestamp. Local changes are stored and staged for the watch.
#[derive(Clone)]
pub struct NotificationPrefs {
    apps: NotificationAppStore,
    items: ItemStore,
    watch_identifier: String,
}

impl NotificationPrefs {
    pub fn new(apps: NotificationAppStore, items: ItemStore, watch_identifier: &str) -> Self {
        Self {
            apps,
            items,
            watch_identifier: watch_identifier.to_string(),
        }
    }

    /// Change an app's mute state from the phone side.
    pub fn set_mute_state(&self, package_name: &str, name: &str, mute_state: MuteState) -> Result<()> {
        let now = Utc::now();
        let record = NotificationAppRecord {
            package_name: package_name.to_string(),
            name: name.to_string(),
            mute_state,
            state_updated: now,
        };
        self.apps.upsert(&record)?;
        self.stage(&record)?;
        info!("Muting {} is now {:?}", package_name, mute_state);
        Ok(())
    }

    /// Queue the local record for the watch.
    fn stage(&self, record: &NotificationAppRecord) -> Result<()> {
        self.items.stage_write(
            BlobDatabase::NotificationPrefs,
            &self.watch_identifier,
            &string_key(&record.package_name),
            &encode_record(record)?,
        )
    }

    /// Apply a write to both stores. Returns whether the watch's value won.
    fn merge(&self, record: &NotificationAppRecord) -> Result<bool> {
        if self.apps.update_from_watch(record)? {
            // The watch already holds this value; drop anything older we queued.
            self.items.store_synced(
                BlobDatabase::NotificationPrefs,
                &self.watch_identifier,
                &string_key(&record.package_name),
                &encode_record(record)?,
            )?;
            return Ok(true);
        }

        // Ours is newer: send it back so the watch converges.
        if let Some(local) = self.apps.get(&record.package_name)? {
            self.stage(&local)?;
        }
        Ok(false)
    }

    fn parse(&self, write: &WatchWrite) -> Option<NotificationAppRecord> {
        let package_name = match std::str::from_utf8(&write.key) {
            Ok(key) => key.to_string(),
            Err(_) => {
                warn!("Notification app key is not UTF-8");
                return None;
            }
        };
        let item = match NotificationAppItem::decode(&write.value) {
            Ok(item) => item,
            Err(e) => {
                warn!("Malformed notification app record for {}: {}", package_name, e);
                return None;
            }
        };

        let name = item.app_name()?;
        let mute_state = item.mute_state()?;
        let secs = item.last_updated().or(write.timestamp)?;
        let state_updated: DateTime<Utc> = timestamp_from_secs(secs).ok()?;

        Some(NotificationAppRecord {
            package_name,
            name,
            mute_state,
            state_updated,
        })
    }
}

impl WriteHandler for NotificationPrefs {
    fn handle_write(&self, write: &WatchWrite) -> BlobStatus {
        let Some(record) = self.parse(write) else {
            return BlobStatus::InvalidData;
        };

        match self.merge(&record) {
            Ok(true) => {
                info!(
                    "Watch set {} to {:?}",
                    record.package_name, record.mute_state
                );
                BlobStatus::Success
            }
            Ok(false) => {
                debug!("Kept newer local state for {}, resending it", record.package_name);
                BlobStatus::Success
            }
            Err(e) => {
                warn!("Could not store notification app {}: {}", record.package_name, e);
                BlobStatus::TryLater
            }
        }
    }
}

fn encode_record(record: &NotificationAppRecord) -> Result<Vec<u8>> {
    let secs = u32::try_from(record.state_updated.timestamp()).unwrap_or(u32::MAX);
    Ok(NotificationAppItem::new(&record.name, record.mute_state, secs).encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::blobdb::WriteKind;
    use crate::storage::{BlobDbItem, SyncStatus};

    fn prefs() -> NotificationPrefs {
        NotificationPrefs::new(
            NotificationAppStore::in_memory().unwrap(),
            ItemStore::in_memory().unwrap(),
            "watch-1",
        )
    }

    fn write(key: &[u8], value: Vec<u8>, timestamp: Option<u32>) -> WatchWrite {
        WatchWrite {
            kind: WriteKind::Write,
            token: 3,
            database: BlobDatabase::NotificationPrefs,
            timestamp,
            key: key.to_vec(),
            value,
        }
    }

    #[test]
    fn test_watch_write_is_stored() {
        let prefs = prefs();
        let value = NotificationAppItem::new("Gmail", MuteState::Always, 1_000)
            .encode()
            .unwrap();

        let status = prefs.handle_write(&write(b"com.google.Gmail", value, Some(5)));
        assert_eq!(status, BlobStatus::Success);

        let stored = prefs.apps.get("com.google.Gmail").unwrap().unwrap();
        assert_eq!(stored.name, "Gmail");
        assert_eq!(stored.mute_state, MuteState::Always);
        assert_eq!(stored.state_updated.timestamp(), 1_000);
    }

    #[test]
    fn test_older_watch_write_keeps_local_state() {
        let prefs = prefs();
        prefs
            .apps
            .upsert(&NotificationAppRecord {
                package_name: "com.google.Gmail".to_string(),
                name: "Gmail".to_string(),
                mute_state: MuteState::Weekdays,
                state_updated: timestamp_from_secs(2_000).unwrap(),
            })
            .unwrap();

        let value = NotificationAppItem::new("Gmail", MuteState::Always, 1_999)
            .encode()
            .unwrap();
        let status = prefs.handle_write(&write(b"com.google.Gmail", value, None));
        assert_eq!(status, BlobStatus::Success);
        assert_eq!(
            prefs.apps.get("com.google.Gmail").unwrap().unwrap().mute_state,
            MuteState::Weekdays
        );
    }

    #[test]
    fn test_header_timestamp_is_fallback() {
        let prefs = prefs();
        let mut item = NotificationAppItem::new("Chat", MuteState::Weekends, 0);
        item.attributes.retain(|attr| attr.id != 0x0E);

        let status = prefs.handle_write(&write(b"org.chat", item.encode().unwrap(), Some(42)));
        assert_eq!(status, BlobStatus::Success);
        assert_eq!(
            prefs.apps.get("org.chat").unwrap().unwrap().state_updated.timestamp(),
            42
        );
    }

    #[test]
    fn test_malformed_writes_are_invalid_data() {
        let prefs = prefs();
        assert_eq!(
            prefs.handle_write(&write(b"org.chat", vec![0x00, 0x01], Some(1))),
            BlobStatus::InvalidData
        );
        assert_eq!(
            prefs.handle_write(&write(&[0xFF, 0xFE], vec![], Some(1))),
            BlobStatus::InvalidData
        );

        let mut nameless = NotificationAppItem::new("Chat", MuteState::Never, 10);
        nameless.attributes.retain(|attr| attr.id != 0x1E);
        assert_eq!(
            prefs.handle_write(&write(b"org.chat", nameless.encode().unwrap(), Some(1))),
            BlobStatus::InvalidData
        );
        assert!(prefs.apps.all().unwrap().is_empty());
    }

    #[test]
    fn test_local_change_is_staged() {
        let prefs = prefs();
        prefs
            .set_mute_state("org.chat", "Chat", MuteState::Always)
            .unwrap();

        let pending = prefs
            .items
            .pending_for(BlobDatabase::NotificationPrefs, "watch-1")
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, b"org.chat".to_vec());
        assert_eq!(pending[0].sync_status, SyncStatus::PendingWrite);

        let item = NotificationAppItem::decode(&pending[0].value).unwrap();
        assert_eq!(item.app_name().as_deref(), Some("Chat"));
        assert_eq!(item.mute_state(), Some(MuteState::Always));
    }

    fn queued(prefs: &NotificationPrefs, key: &[u8]) -> BlobDbItem {
        prefs
            .items
            .get(BlobDatabase::NotificationPrefs, "watch-1", key)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_newer_watch_write_replaces_queued_change() {
        let prefs = prefs();
        prefs
            .set_mute_state("org.chat", "Chat", MuteState::Always)
            .unwrap();
        let local = prefs.apps.get("org.chat").unwrap().unwrap();

        let newer = u32::try_from(local.state_updated.timestamp()).unwrap() + 60;
        let value = NotificationAppItem::new("Chat", MuteState::Never, newer)
            .encode()
            .unwrap();
        assert_eq!(
            prefs.handle_write(&write(b"org.chat", value, Some(newer))),
            BlobStatus::Success
        );

        assert_eq!(
            prefs.apps.get("org.chat").unwrap().unwrap().mute_state,
            MuteState::Never
        );
        assert!(prefs
            .items
            .pending_for(BlobDatabase::NotificationPrefs, "watch-1")
            .unwrap()
            .is_empty());
        let item = queued(&prefs, b"org.chat");
        assert_eq!(item.sync_status, SyncStatus::SyncedToWatch);
        assert_eq!(
            NotificationAppItem::decode(&item.value).unwrap().mute_state(),
            Some(MuteState::Never)
        );
    }

    #[test]
    fn test_stale_watch_write_resends_local_state() {
        let prefs = prefs();
        prefs
            .set_mute_state("org.chat", "Chat", MuteState::Weekdays)
            .unwrap();
        let staged = queued(&prefs, b"org.chat");
        assert!(prefs.items.mark_synced(&staged).unwrap());

        let value = NotificationAppItem::new("Chat", MuteState::Always, 1_000)
            .encode()
            .unwrap();
        assert_eq!(
            prefs.handle_write(&write(b"org.chat", value, Some(1_000))),
            BlobStatus::Success
        );

        let pending = prefs
            .items
            .pending_for(BlobDatabase::NotificationPrefs, "watch-1")
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sync_status, SyncStatus::PendingWrite);
        assert_eq!(
            NotificationAppItem::decode(&pending[0].value).unwrap().mute_state(),
            Some(MuteState::Weekdays)
        );
    }

    #[test]
    fn test_default_handler_is_not_supported() {
        assert_eq!(
            NotSupported.handle_write(&write(b"k", vec![], None)),
            BlobStatus::NotSupported
        );
    }
}
