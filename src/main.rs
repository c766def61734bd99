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

//! Pebble Link loopback self-test

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, ensure, Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pebble_link::config::Config;
use pebble_link::connection::{Stores, WatchConnection};
use pebble_link::ppog::{ChannelPacketSender, PpogEngine};
use pebble_link::storage::{ItemStore, NotificationAppStore};

const DEFAULT_PAYLOAD: usize = 4096;
const LOOPBACK_WATCH: &str = "loopback";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pebble_link=info".parse()?),
        )
        .init();

    info!("Starting Pebble Link v{}...", env!("CARGO_PKG_VERSION"));

    let size = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("Invalid payload size: {}", arg))?,
        None => DEFAULT_PAYLOAD,
    };

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize storage
    let stores = Stores {
        items: ItemStore::open(&config.data_dir)?,
        notification_apps: NotificationAppStore::open(&config.data_dir)?,
    };
    info!("Item storage initialized");

    tokio::select! {
        result = loopback(&config, &stores, size) => {
            if let Err(e) = &result {
                error!("Loopback failed: {:#}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Pebble Link stopped");
    Ok(())
}

/// Connect a phone-side connection to a watch-side engine in memory and
/// push `size` bytes through in both directions.
async fn loopback(config: &Config, stores: &Stores, size: usize) -> Result<()> {
    let (phone_wire_tx, phone_wire_rx) = mpsc::channel(64);
    let (watch_wire_tx, watch_wire_rx) = mpsc::channel(64);

    let phone_sender = Arc::new(ChannelPacketSender::new(phone_wire_tx));
    let (mut phone, mut io) = WatchConnection::open(phone_sender, config, stores, LOOPBACK_WATCH);

    // A watch that was already subscribed resets the link itself.
    let watch_sender =
        Arc::new(ChannelPacketSender::new(watch_wire_tx).restored_with_subscription(true));
    let (watch_engine, watch, mut watch_inbound) = PpogEngine::new(watch_sender, config.link.clone());
    let watch_task = tokio::spawn(watch_engine.run());

    tokio::spawn(forward(phone_wire_rx, watch.frame_sink()));
    tokio::spawn(forward(watch_wire_rx, io.frames.clone()));

    let params = phone
        .ppog()
        .established()
        .await
        .ok_or_else(|| anyhow!("Handshake did not complete"))?;
    info!(
        "Loopback link up: version {:?}, tx window {}, rx window {}",
        params.version, params.tx_window, params.rx_window
    );

    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let started = Instant::now();

    io.outbound_bytes
        .send(payload.clone())
        .await
        .map_err(|_| anyhow!("Phone engine stopped"))?;
    watch.send(payload.clone()).await?;

    let (at_watch, at_phone) = tokio::try_join!(
        collect(&mut watch_inbound, size),
        collect(&mut io.inbound_bytes, size)
    )?;
    ensure!(at_watch == payload, "Watch received corrupted data");
    ensure!(at_phone == payload, "Phone received corrupted data");

    info!(
        "Exchanged {} bytes each way in {:?}",
        size,
        started.elapsed()
    );

    // The simulated watch just goes away; the phone side resets as usual.
    watch_task.abort();
    phone.close().await;
    Ok(())
}

async fn forward(mut from: mpsc::Receiver<Vec<u8>>, to: mpsc::Sender<Vec<u8>>) {
    while let Some(frame) = from.recv().await {
        if to.send(frame).await.is_err() {
            break;
        }
    }
}

async fn collect(rx: &mut mpsc::Receiver<Vec<u8>>, size: usize) -> Result<Vec<u8>> {
    let mut received = Vec::with_capacity(size);
    while received.len() < size {
        match rx.recv().await {
            Some(chunk) => received.extend_from_slice(&chunk),
            None => bail!("Stream ended after {} of {} bytes", received.len(), size),
        }
    }
    Ok(received)
}
