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

//! Everything that lives exactly as long as one watch connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::blobdb::{BlobDb, BlobDbService, NotSupported, NotificationPrefs, WriteHandler};
use crate::config::Config;
use crate::packets::blobdb::BlobDatabase;
use crate::ppog::{PacketSender, PpogEngine, PpogError, PpogHandle};
use crate::protocol::{ProtocolHandler, ProtocolPort};
use crate::putbytes::{PutBytesService, PutBytesSession};
use crate::storage::{ItemStore, NotificationAppStore};

/// Capacity of the message channels between services and framing.
const PROTOCOL_CAPACITY: usize = 64;

/// Databases kept in sync on every connection.
const SYNCED_DATABASES: [BlobDatabase; 6] = [
    BlobDatabase::App,
    BlobDatabase::Pin,
    BlobDatabase::Reminder,
    BlobDatabase::Notification,
    BlobDatabase::Weather,
    BlobDatabase::NotificationPrefs,
];

/// Local stores shared by every connection.
#[derive(Clone)]
pub struct Stores {
    pub items: ItemStore,
    pub notification_apps: NotificationAppStore,
}

/// Endpoints handed to the layers around the connection.
pub struct ConnectionIo {
    /// Raw frames received from the GATT layer go here.
    pub frames: mpsc::Sender<Vec<u8>>,
    /// Reliable bytes from the watch, for the message framing layer.
    pub inbound_bytes: mpsc::Receiver<Vec<u8>>,
    /// Framed bytes for the watch.
    pub outbound_bytes: mpsc::Sender<Vec<u8>>,
    /// Typed messages to and from the services.
    pub port: ProtocolPort,
}

/// Per-connection scope: owns the transport engine and every service task.
///
/// Closing or dropping the connection stops all of them and fails any
/// BlobDB or PutBytes wait still riding on it.
pub struct WatchConnection {
    watch_identifier: String,
    ppog: PpogHandle,
    engine: Option<JoinHandle<Result<(), PpogError>>>,
    blobdb: Arc<BlobDbService>,
    databases: HashMap<BlobDatabase, Arc<BlobDb>>,
    notification_prefs: NotificationPrefs,
    putbytes: PutBytesSession,
    tasks: JoinSet<()>,
}

impl WatchConnection {
    /// Start the engine and all services for one watch.
    pub fn open(
        sender: Arc<dyn PacketSender>,
        config: &Config,
        stores: &Stores,
        watch_identifier: &str,
    ) -> (Self, ConnectionIo) {
        info!("Opening connection to {}", watch_identifier);

        let (engine, ppog, inbound_bytes) = PpogEngine::new(sender, config.link.clone());
        let engine = tokio::spawn(engine.run());

        let (protocol, port) = ProtocolHandler::new(PROTOCOL_CAPACITY);
        let mut tasks = JoinSet::new();

        let blobdb = BlobDbService::new(protocol.clone());
        blobdb.spawn(&mut tasks);

        let notification_prefs = NotificationPrefs::new(
            stores.notification_apps.clone(),
            stores.items.clone(),
            watch_identifier,
        );

        let mut databases = HashMap::new();
        for database in SYNCED_DATABASES {
            let db = BlobDb::new(
                database,
                watch_identifier,
                Arc::clone(&blobdb),
                stores.items.clone(),
                config.blobdb.response_timeout(),
            );
            let handler: Arc<dyn WriteHandler> = match database {
                BlobDatabase::NotificationPrefs => Arc::new(notification_prefs.clone()),
                _ => Arc::new(NotSupported),
            };
            db.spawn(handler, &mut tasks);
            databases.insert(database, db);
        }

        let putbytes_service =
            PutBytesService::spawn(protocol, config.putbytes.response_timeout(), &mut tasks);
        let putbytes = PutBytesSession::new(putbytes_service, config.putbytes.chunk_size);

        let io = ConnectionIo {
            frames: ppog.frame_sink(),
            inbound_bytes,
            outbound_bytes: ppog.byte_sink(),
            port,
        };
        let connection = Self {
            watch_identifier: watch_identifier.to_string(),
            ppog,
            engine: Some(engine),
            blobdb,
            databases,
            notification_prefs,
            putbytes,
            tasks,
        };
        (connection, io)
    }

    pub fn watch_identifier(&self) -> &str {
        &self.watch_identifier
    }

    pub fn ppog(&self) -> &PpogHandle {
        &self.ppog
    }

    pub fn blobdb(&self, database: BlobDatabase) -> Option<&Arc<BlobDb>> {
        self.databases.get(&database)
    }

    pub fn notification_prefs(&self) -> &NotificationPrefs {
        &self.notification_prefs
    }

    pub fn putbytes(&self) -> &PutBytesSession {
        &self.putbytes
    }

    /// Wait for the transport to end, then stop every service.
    ///
    /// Returns the engine's failure, if it failed.
    pub async fn wait(&mut self) -> Result<(), PpogError> {
        let result = match self.engine.take() {
            Some(engine) => match engine.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => {
                    error!("PPoG engine task panicked: {}", e);
                    Err(PpogError::TransportClosed)
                }
            },
            None => Ok(()),
        };
        self.shutdown();
        result
    }

    /// Reset the peer and stop everything.
    pub async fn close(&mut self) {
        self.ppog.close().await;
        if let Some(engine) = self.engine.take() {
            match engine.await {
                Ok(Err(e)) => warn!("PPoG engine ended with error: {}", e),
                Err(e) if !e.is_cancelled() => error!("PPoG engine task panicked: {}", e),
                _ => {}
            }
        }
        self.shutdown();
        info!("Connection to {} closed", self.watch_identifier);
    }

    fn shutdown(&mut self) {
        self.tasks.abort_all();
        self.blobdb.cancel_pending();
    }
}

impl Drop for WatchConnection {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.abort();
        }
        self.shutdown();
    }
}
