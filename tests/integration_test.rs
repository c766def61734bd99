//! Integration tests for the full data plane.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pebble_link::blobdb::BlobDbError;
use pebble_link::config::{Config, LinkConfig};
use pebble_link::connection::{ConnectionIo, Stores, WatchConnection};
use pebble_link::packets::blobdb::{
    BlobCommand, BlobDatabase, BlobResponse, BlobStatus, WatchWrite, WriteKind, WriteResponse,
};
use pebble_link::packets::notification_app::{MuteState, NotificationAppItem};
use pebble_link::packets::putbytes::{ObjectType, PutBytesRequest, PutBytesResponse};
use pebble_link::ppog::{ChannelPacketSender, PpogEngine, PpogError, PpogHandle, PpogVersion};
use pebble_link::protocol::{Endpoint, ProtocolMessage};
use pebble_link::putbytes::{PutBytesError, Stm32Crc};
use pebble_link::storage::{ItemStore, NotificationAppStore, SyncStatus};

const WATCH: &str = "watch-1";

fn stores() -> Stores {
    Stores {
        items: ItemStore::in_memory().unwrap(),
        notification_apps: NotificationAppStore::in_memory().unwrap(),
    }
}

/// Forward frames, dropping the ones whose position is listed.
fn lossy_forward(
    mut from: mpsc::Receiver<Vec<u8>>,
    to: mpsc::Sender<Vec<u8>>,
    drop_at: Vec<usize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut index = 0;
        while let Some(frame) = from.recv().await {
            let dropped = drop_at.contains(&index);
            index += 1;
            if dropped {
                continue;
            }
            if to.send(frame).await.is_err() {
                break;
            }
        }
    })
}

struct Pair {
    phone: WatchConnection,
    io: ConnectionIo,
    watch: PpogHandle,
    watch_inbound: mpsc::Receiver<Vec<u8>>,
    watch_task: JoinHandle<Result<(), PpogError>>,
}

fn connect(phone_link: LinkConfig, watch_link: LinkConfig, drop_to_watch: Vec<usize>) -> Pair {
    let (phone_wire_tx, phone_wire_rx) = mpsc::channel(64);
    let (watch_wire_tx, watch_wire_rx) = mpsc::channel(64);

    let mut config = Config::default();
    config.link = phone_link;
    let stores = stores();
    let (phone, io) = WatchConnection::open(
        Arc::new(ChannelPacketSender::new(phone_wire_tx)),
        &config,
        &stores,
        WATCH,
    );

    let watch_sender =
        Arc::new(ChannelPacketSender::new(watch_wire_tx).restored_with_subscription(true));
    let (engine, watch, watch_inbound) = PpogEngine::new(watch_sender, watch_link);
    let watch_task = tokio::spawn(engine.run());

    lossy_forward(phone_wire_rx, watch.frame_sink(), drop_to_watch);
    lossy_forward(watch_wire_rx, io.frames.clone(), Vec::new());

    Pair {
        phone,
        io,
        watch,
        watch_inbound,
        watch_task,
    }
}

async fn collect(rx: &mut mpsc::Receiver<Vec<u8>>, size: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(size);
    while received.len() < size {
        received.extend(rx.recv().await.expect("stream ended early"));
    }
    received
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 256) as u8).collect()
}

#[tokio::test(start_paused = true)]
async fn test_engines_negotiate_windows() {
    let phone_link = LinkConfig {
        desired_rx_window: 19,
        desired_tx_window: 20,
        ..LinkConfig::default()
    };
    let pair = connect(phone_link, LinkConfig::default(), Vec::new());

    let phone = pair.phone.ppog().established().await.unwrap();
    let watch = pair.watch.established().await.unwrap();

    assert_eq!(phone.version, PpogVersion::V1);
    assert_eq!((phone.tx_window, phone.rx_window), (19, 20));
    assert_eq!(watch.version, PpogVersion::V1);
    assert_eq!((watch.tx_window, watch.rx_window), (19, 20));
}

#[tokio::test(start_paused = true)]
async fn test_bytes_cross_in_both_directions() {
    let mut pair = connect(LinkConfig::default(), LinkConfig::default(), Vec::new());
    let data = payload(3000);

    pair.io.outbound_bytes.send(data.clone()).await.unwrap();
    pair.watch.send(data.clone()).await.unwrap();

    let (at_watch, at_phone) = tokio::join!(
        collect(&mut pair.watch_inbound, data.len()),
        collect(&mut pair.io.inbound_bytes, data.len())
    );
    assert_eq!(at_watch, data);
    assert_eq!(at_phone, data);
}

#[tokio::test(start_paused = true)]
async fn test_lost_frames_are_recovered() {
    let small_window = LinkConfig {
        desired_rx_window: 2,
        desired_tx_window: 2,
        ..LinkConfig::default()
    };
    let mut pair = connect(small_window.clone(), small_window, vec![4, 11]);
    let data = payload(800);

    pair.io.outbound_bytes.send(data.clone()).await.unwrap();
    pair.watch.send(data.clone()).await.unwrap();

    let (at_watch, at_phone) = tokio::join!(
        collect(&mut pair.watch_inbound, data.len()),
        collect(&mut pair.io.inbound_bytes, data.len())
    );
    assert_eq!(at_watch, data);
    assert_eq!(at_phone, data);
    assert!(!pair.watch_task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_dead_peer_fails_the_connection() {
    let mut pair = connect(LinkConfig::default(), LinkConfig::default(), Vec::new());
    pair.phone.ppog().established().await.unwrap();

    pair.watch_task.abort();
    pair.io.outbound_bytes.send(vec![1, 2, 3]).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(120), pair.phone.wait())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(PpogError::RetriesExhausted { .. }) | Err(PpogError::SendFailed)
    ));
}

#[tokio::test]
async fn test_blobdb_round_trip_through_connection() {
    let stores = stores();
    let (wire_tx, _wire) = mpsc::channel(16);
    let (connection, mut io) = WatchConnection::open(
        Arc::new(ChannelPacketSender::new(wire_tx)),
        &Config::default(),
        &stores,
        WATCH,
    );

    // A local mute change goes to the watch.
    connection
        .notification_prefs()
        .set_mute_state("com.google.Gmail", "Gmail", MuteState::Weekends)
        .unwrap();
    let sent = io.port.outbound.recv().await.unwrap();
    let command = BlobCommand::decode(&sent.payload).unwrap();
    let BlobCommand::Insert {
        token,
        database,
        key,
        value,
    } = command
    else {
        panic!("expected insert, got {:?}", command);
    };
    assert_eq!(database, BlobDatabase::NotificationPrefs);
    assert_eq!(key, b"com.google.Gmail".to_vec());
    let item = NotificationAppItem::decode(&value).unwrap();
    assert_eq!(item.mute_state(), Some(MuteState::Weekends));

    io.port.deliver(ProtocolMessage::new(
        Endpoint::BlobDb,
        BlobResponse {
            token,
            status: BlobStatus::Success,
        }
        .encode(),
    ));

    let mut synced = false;
    for _ in 0..100 {
        let item = stores
            .items
            .get(BlobDatabase::NotificationPrefs, WATCH, b"com.google.Gmail")
            .unwrap()
            .unwrap();
        if item.sync_status == SyncStatus::SyncedToWatch {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced);

    // A later change made on the watch wins.
    let newer = item.last_updated().unwrap() + 60;
    let write = WatchWrite {
        kind: WriteKind::Write,
        token: 0x4242,
        database: BlobDatabase::NotificationPrefs,
        timestamp: Some(newer),
        key: b"com.google.Gmail".to_vec(),
        value: NotificationAppItem::new("Gmail", MuteState::Always, newer)
            .encode()
            .unwrap(),
    };
    io.port
        .deliver(ProtocolMessage::new(Endpoint::BlobDb2, write.encode().unwrap()));

    let reply = io.port.outbound.recv().await.unwrap();
    assert_eq!(reply.endpoint, Endpoint::BlobDb2);
    assert_eq!(
        WriteResponse::decode(&reply.payload).unwrap(),
        write.response(BlobStatus::Success)
    );
    assert_eq!(
        stores
            .notification_apps
            .get("com.google.Gmail")
            .unwrap()
            .unwrap()
            .mute_state,
        MuteState::Always
    );
}

#[tokio::test]
async fn test_putbytes_crc_mismatch_through_connection() {
    let stores = stores();
    let (wire_tx, _wire) = mpsc::channel(16);
    let mut config = Config::default();
    config.putbytes.chunk_size = 100;
    let (connection, mut io) = WatchConnection::open(
        Arc::new(ChannelPacketSender::new(wire_tx)),
        &config,
        &stores,
        WATCH,
    );
    let data = payload(250);

    let watch = async {
        let mut received: Vec<u8> = Vec::new();
        let mut requests = Vec::new();
        loop {
            let message = io.port.outbound.recv().await.unwrap();
            let request = PutBytesRequest::decode(&message.payload).unwrap();
            let response = match &request {
                PutBytesRequest::Init { .. } => Some(PutBytesResponse::ack(77)),
                PutBytesRequest::Put { cookie, data } => {
                    // One byte flips in transit.
                    let mut data = data.clone();
                    if received.is_empty() {
                        data[0] ^= 0xFF;
                    }
                    received.extend(data);
                    Some(PutBytesResponse::ack(*cookie))
                }
                PutBytesRequest::Commit { cookie, crc } => {
                    if *crc == Stm32Crc::checksum(&received) {
                        Some(PutBytesResponse::ack(*cookie))
                    } else {
                        Some(PutBytesResponse::nack(*cookie))
                    }
                }
                _ => None,
            };
            if let Some(response) = response {
                io.port
                    .deliver(ProtocolMessage::new(Endpoint::PutBytes, response.encode()));
            }
            let done = matches!(request, PutBytesRequest::Abort { .. });
            requests.push(request);
            if done {
                return requests;
            }
        }
    };
    let transfer = connection.putbytes().begin_session(
        250,
        ObjectType::Firmware,
        0,
        "firmware.bin",
        data.as_slice(),
        |_| {},
    );

    let (result, requests) = tokio::join!(transfer, watch);
    assert!(matches!(
        result,
        Err(PutBytesError::CommitRejected {
            cookie: 77,
            bytes_transferred: 250
        })
    ));
    assert_eq!(requests.last(), Some(&PutBytesRequest::Abort { cookie: 77 }));
    assert!(!requests
        .iter()
        .any(|r| matches!(r, PutBytesRequest::Install { .. })));
}

#[tokio::test]
async fn test_closing_fails_pending_commands() {
    let stores = stores();
    let (wire_tx, _wire) = mpsc::channel(16);
    let (mut connection, mut io) = WatchConnection::open(
        Arc::new(ChannelPacketSender::new(wire_tx)),
        &Config::default(),
        &stores,
        WATCH,
    );

    let db = Arc::clone(connection.blobdb(BlobDatabase::Pin).unwrap());
    let pending = tokio::spawn(async move { db.delete(b"pin").await });
    io.port.outbound.recv().await.unwrap();

    connection.close().await;
    assert!(matches!(
        pending.await.unwrap(),
        Err(BlobDbError::Disconnected)
    ));
}
