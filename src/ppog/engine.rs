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

//! PPoG engine task.
//!
//! One engine runs per connection and owns every piece of transport state.
//! It negotiates connection parameters with a reset handshake, then runs a
//! single select loop over inbound frames, outbound application bytes and
//! the retransmission timer.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant, Sleep};
use tracing::{debug, error, info, trace, warn};

use super::error::PpogError;
use super::link::{Action, ConnectionParams, Link};
use super::packet::{Frame, PpogVersion, DATA_HEADER_OVERHEAD, MAX_SUPPORTED_WINDOW_SIZE};
use super::sender::PacketSender;
use super::sequence::Sequence;
use crate::config::LinkConfig;

/// Capacity of the frame and byte channels around the engine.
const CHANNEL_CAPACITY: usize = 64;

/// Owner-side controls for a running engine.
pub struct PpogHandle {
    frames: mpsc::Sender<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
    mtu: watch::Sender<usize>,
    closed: watch::Sender<bool>,
    params: watch::Receiver<Option<ConnectionParams>>,
    sender: Arc<dyn PacketSender>,
}

/// The engine itself. Consumed by [`PpogEngine::run`].
pub struct PpogEngine {
    sender: Arc<dyn PacketSender>,
    config: LinkConfig,
    frames: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Receiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    mtu: watch::Receiver<usize>,
    closed: watch::Receiver<bool>,
    params: watch::Sender<Option<ConnectionParams>>,
}

impl PpogEngine {
    /// Create an engine, its control handle and the receiver of reliable
    /// inbound application bytes.
    pub fn new(
        sender: Arc<dyn PacketSender>,
        config: LinkConfig,
    ) -> (Self, PpogHandle, mpsc::Receiver<Vec<u8>>) {
        let (frames_tx, frames_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (mtu_tx, mtu_rx) = watch::channel(config.initial_mtu.max(DATA_HEADER_OVERHEAD + 1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let (params_tx, params_rx) = watch::channel(None);

        let engine = Self {
            sender: Arc::clone(&sender),
            config,
            frames: frames_rx,
            outbound: outbound_rx,
            inbound: inbound_tx,
            mtu: mtu_rx,
            closed: closed_rx,
            params: params_tx,
        };
        let handle = PpogHandle {
            frames: frames_tx,
            outbound: outbound_tx,
            mtu: mtu_tx,
            closed: closed_tx,
            params: params_rx,
            sender,
        };
        (engine, handle, inbound_rx)
    }

    /// Negotiate and then serve the connection until it is closed or fails.
    pub async fn run(mut self) -> Result<(), PpogError> {
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return Ok(());
        }

        let params = tokio::select! {
            result = self.negotiate() => result?,
            _ = closed.changed() => {
                info!("PPoG closed during handshake");
                return Ok(());
            }
        };
        info!(
            "PPoG established: version {:?}, tx window {}, rx window {}",
            params.version, params.tx_window, params.rx_window
        );
        self.params.send_replace(Some(params));

        let result = self.serve(Link::new(params, self.config.max_retries)).await;
        if let Err(e) = &result {
            error!("PPoG connection failed: {}", e);
        }
        result
    }

    async fn negotiate(&mut self) -> Result<ConnectionParams, PpogError> {
        if self.sender.was_restored_with_subscribed_peer() {
            info!("Transport restored with a subscribed peer, sending reset ourselves");
        } else {
            match timeout(self.config.passive_reset_timeout(), self.passive_handshake()).await {
                Ok(result) => return result,
                Err(_) if self.config.reversed_ppog => {
                    warn!("No reset request from peer, falling back to active reset");
                }
                Err(_) => {
                    error!("Timed out waiting for reset request");
                    return Err(PpogError::HandshakeTimeout);
                }
            }
        }

        match timeout(self.config.active_reset_timeout(), self.active_handshake()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Timed out waiting for reset complete");
                Err(PpogError::HandshakeTimeout)
            }
        }
    }

    /// Peer sends `ResetRequest`, we answer with our windows, peer confirms.
    async fn passive_handshake(&mut self) -> Result<ConnectionParams, PpogError> {
        let version = loop {
            match self.next_frame().await? {
                Frame::ResetRequest { version, .. } => break version,
                other => warn!("Ignoring {} while waiting for ResetRequest", other.kind()),
            }
        };
        debug!("Reset requested by peer, version {:?}", version);

        let reply = Frame::ResetComplete {
            sequence: Sequence::ZERO,
            rx_window: self.config.desired_rx_window.min(MAX_SUPPORTED_WINDOW_SIZE),
            tx_window: self.config.desired_tx_window.min(MAX_SUPPORTED_WINDOW_SIZE),
        };
        self.transmit(&reply, version).await?;

        match self.next_frame().await? {
            Frame::ResetComplete {
                rx_window,
                tx_window,
                ..
            } => Ok(negotiated(rx_window, tx_window, version)),
            other => Err(PpogError::UnexpectedFrame {
                expected: "ResetComplete",
                received: other.kind(),
            }),
        }
    }

    /// We send `ResetRequest`, peer answers, we reflect its answer back.
    async fn active_handshake(&mut self) -> Result<ConnectionParams, PpogError> {
        let version = PpogVersion::V1;
        let request = Frame::ResetRequest {
            sequence: Sequence::ZERO,
            version,
        };
        self.transmit(&request, version).await?;

        loop {
            match self.next_frame().await? {
                Frame::ResetComplete {
                    sequence,
                    rx_window,
                    tx_window,
                } => {
                    let confirm = Frame::ResetComplete {
                        sequence,
                        rx_window,
                        tx_window,
                    };
                    self.transmit(&confirm, version).await?;
                    return Ok(negotiated(rx_window, tx_window, version));
                }
                other => warn!("Ignoring {} while waiting for ResetComplete", other.kind()),
            }
        }
    }

    async fn serve(&mut self, mut link: Link) -> Result<(), PpogError> {
        let version = link.params().version;
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);
        let mut timer_armed = false;
        let mut outbound_open = true;

        loop {
            if *self.closed.borrow() {
                return Ok(());
            }

            let actions = tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        debug!("PPoG handle dropped, stopping engine");
                    }
                    return Ok(());
                }
                () = &mut timer, if timer_armed => {
                    timer_armed = false;
                    link.handle_timeout()?
                }
                frame = self.frames.recv() => {
                    let bytes = frame.ok_or(PpogError::TransportClosed)?;
                    let frame = Frame::decode(&bytes)?;
                    self.log_frame("<-", &frame);
                    link.handle_frame(frame)?
                }
                bytes = self.outbound.recv(), if outbound_open => match bytes {
                    Some(bytes) => link.queue_outbound(&bytes, self.max_payload()),
                    None => {
                        debug!("Outbound byte source closed");
                        outbound_open = false;
                        continue;
                    }
                },
            };

            self.apply(actions, version, timer.as_mut(), &mut timer_armed)
                .await?;
        }
    }

    async fn apply(
        &mut self,
        actions: Vec<Action>,
        version: PpogVersion,
        mut timer: Pin<&mut Sleep>,
        timer_armed: &mut bool,
    ) -> Result<(), PpogError> {
        for action in actions {
            if *self.closed.borrow() {
                return Ok(());
            }
            match action {
                Action::Transmit(frame) => self.transmit(&frame, version).await?,
                Action::Deliver(bytes) => {
                    self.inbound
                        .send(bytes)
                        .await
                        .map_err(|_| PpogError::SinkClosed)?;
                }
                Action::RestartTimer => {
                    timer
                        .as_mut()
                        .reset(Instant::now() + self.config.retransmit_timeout());
                    *timer_armed = true;
                }
                Action::CancelTimer => *timer_armed = false,
            }
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, PpogError> {
        let bytes = self.frames.recv().await.ok_or(PpogError::TransportClosed)?;
        let frame = Frame::decode(&bytes)?;
        self.log_frame("<-", &frame);
        Ok(frame)
    }

    async fn transmit(&self, frame: &Frame, version: PpogVersion) -> Result<(), PpogError> {
        self.log_frame("->", frame);
        if self.sender.send_packet(frame.encode(version)).await {
            Ok(())
        } else {
            error!("Failed to send {} frame {}", frame.kind(), frame.sequence());
            Err(PpogError::SendFailed)
        }
    }

    fn max_payload(&self) -> usize {
        self.mtu.borrow().saturating_sub(DATA_HEADER_OVERHEAD)
    }

    fn log_frame(&self, direction: &str, frame: &Frame) {
        if self.config.verbose_logging {
            debug!("{} {:?}", direction, frame);
        } else {
            trace!("{} {:?}", direction, frame);
        }
    }
}

/// The peer advertises its own windows; ours are the mirror image.
fn negotiated(peer_rx: u8, peer_tx: u8, version: PpogVersion) -> ConnectionParams {
    ConnectionParams {
        rx_window: peer_tx.clamp(1, MAX_SUPPORTED_WINDOW_SIZE),
        tx_window: peer_rx.clamp(1, MAX_SUPPORTED_WINDOW_SIZE),
        version,
    }
}

impl PpogHandle {
    /// Sender for raw frames arriving from the GATT layer.
    pub fn frame_sink(&self) -> mpsc::Sender<Vec<u8>> {
        self.frames.clone()
    }

    /// Sender for application bytes to deliver to the peer.
    pub fn byte_sink(&self) -> mpsc::Sender<Vec<u8>> {
        self.outbound.clone()
    }

    /// Queue application bytes for delivery.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), PpogError> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| PpogError::TransportClosed)
    }

    /// Parameters of the established connection, if the handshake finished.
    pub fn connection_params(&self) -> Option<ConnectionParams> {
        *self.params.borrow()
    }

    /// Wait for the handshake to finish.
    pub async fn established(&self) -> Option<ConnectionParams> {
        let mut params = self.params.clone();
        let established = params.wait_for(Option::is_some).await.map(|params| *params);
        established.ok().flatten()
    }

    pub fn mtu(&self) -> usize {
        *self.mtu.borrow()
    }

    /// Raise the MTU after link renegotiation. The MTU never shrinks.
    pub fn update_mtu(&self, mtu: usize) -> Result<(), PpogError> {
        if mtu <= DATA_HEADER_OVERHEAD {
            return Err(PpogError::MtuTooSmall(mtu));
        }
        let mut result = Ok(());
        self.mtu.send_if_modified(|current| {
            if mtu < *current {
                result = Err(PpogError::MtuDecrease {
                    current: *current,
                    requested: mtu,
                });
                false
            } else if mtu == *current {
                false
            } else {
                info!("PPoG mtu raised from {} to {}", current, mtu);
                *current = mtu;
                true
            }
        });
        result
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Tell the peer to reset and stop the engine.
    ///
    /// The reset request goes out immediately and nothing waits for a reply,
    /// so a peer that cannot see the transport drop still resets.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let reset = Frame::ResetRequest {
            sequence: Sequence::ZERO,
            version: PpogVersion::V1,
        };
        if !self.sender.send_packet(reset.encode(PpogVersion::V1)).await {
            warn!("Could not send reset request while closing");
        }
        self.closed.send_replace(true);
        info!("PPoG closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppog::sender::ChannelPacketSender;
    use tokio::task::JoinHandle;

    struct Harness {
        handle: PpogHandle,
        frames: mpsc::Sender<Vec<u8>>,
        wire: mpsc::Receiver<Vec<u8>>,
        inbound: mpsc::Receiver<Vec<u8>>,
        task: JoinHandle<Result<(), PpogError>>,
    }

    fn test_config() -> LinkConfig {
        LinkConfig {
            initial_mtu: 23,
            desired_tx_window: 20,
            desired_rx_window: 19,
            ..LinkConfig::default()
        }
    }

    fn start(config: LinkConfig, restored: bool) -> Harness {
        let (wire_tx, wire) = mpsc::channel(64);
        let sender = ChannelPacketSender::new(wire_tx).restored_with_subscription(restored);
        let (engine, handle, inbound) = PpogEngine::new(Arc::new(sender), config);
        let frames = handle.frame_sink();
        let task = tokio::spawn(engine.run());
        Harness {
            handle,
            frames,
            wire,
            inbound,
            task,
        }
    }

    async fn establish(h: &mut Harness, peer_rx: u8, peer_tx: u8) {
        h.frames.send(vec![0x02, 0x01]).await.unwrap();
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x03, 19, 20]);
        h.frames.send(vec![0x03, peer_rx, peer_tx]).await.unwrap();
        h.handle.established().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_handshake_swaps_windows() {
        let mut h = start(test_config(), false);
        establish(&mut h, 7, 9).await;

        let params = h.handle.connection_params().unwrap();
        assert_eq!(params.tx_window, 7);
        assert_eq!(params.rx_window, 9);
        assert_eq!(params.version, PpogVersion::V1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_handshake_ignores_stale_frames() {
        let mut h = start(test_config(), false);
        h.frames.send(vec![0x01]).await.unwrap();
        establish(&mut h, 25, 25).await;
        assert!(h.handle.connection_params().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_handshake_v0_uses_legacy_window() {
        let mut h = start(test_config(), false);
        h.frames.send(vec![0x02, 0x00]).await.unwrap();
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x03]);
        h.frames.send(vec![0x03]).await.unwrap();

        let params = h.handle.established().await.unwrap();
        assert_eq!(params.tx_window, 4);
        assert_eq!(params.version, PpogVersion::V0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_frame_after_reply_is_fatal() {
        let mut h = start(test_config(), false);
        h.frames.send(vec![0x02, 0x01]).await.unwrap();
        h.wire.recv().await.unwrap();
        h.frames.send(vec![0x00, 1, 2]).await.unwrap();

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(PpogError::UnexpectedFrame { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out() {
        let h = start(test_config(), false);
        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(PpogError::HandshakeTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversed_falls_back_to_active_reset() {
        let config = LinkConfig {
            reversed_ppog: true,
            ..test_config()
        };
        let mut h = start(config, false);

        let started = Instant::now();
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x02, 0x01]);
        assert!(started.elapsed() >= Duration::from_secs(12));

        h.frames.send(vec![0x03, 6, 8]).await.unwrap();
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x03, 6, 8]);
        let params = h.handle.established().await.unwrap();
        assert_eq!(params.tx_window, 6);
        assert_eq!(params.rx_window, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_transport_resets_immediately() {
        let mut h = start(test_config(), true);
        let started = Instant::now();
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x02, 0x01]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_is_delivered_and_acked() {
        let mut h = start(test_config(), false);
        establish(&mut h, 25, 25).await;

        h.frames.send(vec![0x00, b'o', b'k']).await.unwrap();
        assert_eq!(h.inbound.recv().await.unwrap(), b"ok".to_vec());
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x01]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_bytes_are_chunked_by_mtu() {
        let mut h = start(test_config(), false);
        establish(&mut h, 25, 25).await;

        h.handle.send(vec![7u8; 40]).await.unwrap();
        let first = h.wire.recv().await.unwrap();
        let second = h.wire.recv().await.unwrap();
        assert_eq!(first.len(), 1 + 19);
        assert_eq!(second[0], 0x08);
        assert_eq!(second.len(), 1 + 19);
        assert_eq!(h.wire.recv().await.unwrap().len(), 1 + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_of_two_waits_for_ack() {
        let mut h = start(test_config(), false);
        establish(&mut h, 2, 25).await;

        h.handle.send(vec![1u8; 40]).await.unwrap();
        assert_eq!(h.wire.recv().await.unwrap()[0], 0x00);
        assert_eq!(h.wire.recv().await.unwrap()[0], 0x08);
        assert!(h.wire.try_recv().is_err());

        h.frames.send(vec![0x01]).await.unwrap();
        assert_eq!(h.wire.recv().await.unwrap()[0], 0x10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmits_then_fails() {
        let mut h = start(test_config(), false);
        establish(&mut h, 25, 25).await;

        h.handle.send(vec![9]).await.unwrap();
        let original = h.wire.recv().await.unwrap();
        let started = Instant::now();

        assert_eq!(h.wire.recv().await.unwrap(), original);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.wire.recv().await.unwrap(), original);

        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(PpogError::RetriesExhausted { attempt: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mid_session_is_fatal() {
        let mut h = start(test_config(), false);
        establish(&mut h, 25, 25).await;

        h.frames.send(vec![0x02, 0x01]).await.unwrap();
        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(PpogError::ResetDuringSession(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sends_reset_and_stops() {
        let mut h = start(test_config(), false);
        establish(&mut h, 25, 25).await;

        h.handle.close().await;
        assert_eq!(h.wire.recv().await.unwrap(), vec![0x02, 0x01]);
        assert!(h.task.await.unwrap().is_ok());

        h.handle.close().await;
        assert!(h.wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mtu_only_grows() {
        let h = start(test_config(), false);
        assert_eq!(h.handle.mtu(), 23);
        h.handle.update_mtu(185).unwrap();
        assert_eq!(h.handle.mtu(), 185);
        assert!(matches!(
            h.handle.update_mtu(100),
            Err(PpogError::MtuDecrease {
                current: 185,
                requested: 100
            })
        ));
        assert!(matches!(h.handle.update_mtu(4), Err(PpogError::MtuTooSmall(4))));
    }
}
