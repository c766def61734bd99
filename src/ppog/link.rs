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

//! Steady-state PPoG state machine.
//!
//! The link never touches I/O. The engine feeds it one event at a time and
//! performs the returned [`Action`]s in order.

use tracing::{debug, trace, warn};

use super::error::PpogError;
use super::packet::{Frame, PpogVersion};
use super::sequence::Sequence;
use super::window::{QueuedFrame, SendWindow};

/// Parameters fixed by the reset handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub rx_window: u8,
    pub tx_window: u8,
    pub version: PpogVersion,
}

/// Side effects requested by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a frame to the peer.
    Transmit(Frame),
    /// Hand in-order payload bytes to the application.
    Deliver(Vec<u8>),
    /// (Re)arm the retransmission timer.
    RestartTimer,
    /// Nothing left in flight.
    CancelTimer,
}

/// Sequence counters and send window of an established connection.
#[derive(Debug)]
pub struct Link {
    params: ConnectionParams,
    window: SendWindow,
    next_outbound: Sequence,
    expected_inbound: Sequence,
    last_sent_ack: Option<Sequence>,
    last_received_ack: Option<Sequence>,
}

impl Link {
    /// Create a link for freshly negotiated parameters.
    pub fn new(params: ConnectionParams, max_retries: u32) -> Self {
        Self {
            params,
            window: SendWindow::new(params.tx_window, max_retries),
            next_outbound: Sequence::ZERO,
            expected_inbound: Sequence::ZERO,
            last_sent_ack: None,
            last_received_ack: None,
        }
    }

    pub fn params(&self) -> ConnectionParams {
        self.params
    }

    pub fn in_flight_len(&self) -> usize {
        self.window.in_flight_len()
    }

    pub fn pending_len(&self) -> usize {
        self.window.pending_len()
    }

    /// Split application bytes into data frames of at most `max_payload`
    /// bytes and send as many as the window allows.
    pub fn queue_outbound(&mut self, bytes: &[u8], max_payload: usize) -> Vec<Action> {
        for chunk in bytes.chunks(max_payload.max(1)) {
            let sequence = self.next_outbound;
            self.next_outbound = sequence.next();
            trace!("Queued data frame {} ({} bytes)", sequence, chunk.len());
            self.window.enqueue(QueuedFrame::new(sequence, chunk.to_vec()));
        }

        let mut actions = Vec::new();
        self.fill_window(&mut actions);
        actions
    }

    /// Handle one frame received from the peer.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Vec<Action>, PpogError> {
        let kind = frame.kind();
        let mut actions = Vec::new();
        match frame {
            Frame::Ack { sequence } => self.handle_ack(sequence, &mut actions)?,
            Frame::Data { sequence, payload } => self.handle_data(sequence, payload, &mut actions),
            Frame::ResetRequest { .. } | Frame::ResetComplete { .. } => {
                return Err(PpogError::ResetDuringSession(kind));
            }
        }
        self.fill_window(&mut actions);
        Ok(actions)
    }

    /// The retransmission timer fired: resend everything in flight.
    pub fn handle_timeout(&mut self) -> Result<Vec<Action>, PpogError> {
        let resent = self.requeue_in_flight()?;
        debug!("Retransmission timeout, resending {} frame(s)", resent);

        let mut actions = Vec::new();
        self.fill_window(&mut actions);
        Ok(actions)
    }

    fn handle_ack(&mut self, sequence: Sequence, actions: &mut Vec<Action>) -> Result<(), PpogError> {
        let dropped = self.window.drop_resends_through(sequence);
        if dropped > 0 {
            trace!("Ack {} made {} queued resend(s) obsolete", sequence, dropped);
        }

        let duplicate = self.last_received_ack == Some(sequence);
        if duplicate {
            // The peer missed something after `sequence`.
            let resent = self.requeue_in_flight()?;
            debug!("Duplicate ack {}, resending {} frame(s)", sequence, resent);
        }

        let released = self.window.acknowledge(sequence);
        if released == 0 && !duplicate {
            warn!("Ack {} does not match any frame in flight", sequence);
        }
        if self.window.in_flight_len() == 0 {
            actions.push(Action::CancelTimer);
        }
        self.last_received_ack = Some(sequence);
        Ok(())
    }

    fn handle_data(&mut self, sequence: Sequence, payload: Vec<u8>, actions: &mut Vec<Action>) {
        if sequence != self.expected_inbound {
            warn!(
                "Out of sequence data frame {} (expected {})",
                sequence, self.expected_inbound
            );
            match self.last_sent_ack {
                Some(ack) => actions.push(Action::Transmit(Frame::Ack { sequence: ack })),
                None => debug!("No ack sent yet, nothing to repeat"),
            }
            return;
        }

        if !payload.is_empty() {
            actions.push(Action::Deliver(payload));
        }
        self.expected_inbound = sequence.next();
        actions.push(Action::Transmit(Frame::Ack { sequence }));
        self.last_sent_ack = Some(sequence);
    }

    fn requeue_in_flight(&mut self) -> Result<usize, PpogError> {
        self.window
            .requeue_in_flight()
            .map_err(|exhausted| PpogError::RetriesExhausted {
                sequence: exhausted.sequence,
                attempt: exhausted.attempt,
            })
    }

    fn fill_window(&mut self, actions: &mut Vec<Action>) {
        let mut sent = false;
        while let Some(frame) = self.window.promote_next() {
            if frame.attempt > 0 {
                debug!("Resending frame {} (attempt {})", frame.sequence, frame.attempt);
            }
            actions.push(Action::Transmit(Frame::Data {
                sequence: frame.sequence,
                payload: frame.payload,
            }));
            sent = true;
        }
        if sent {
            actions.push(Action::RestartTimer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tx_window: u8) -> ConnectionParams {
        ConnectionParams {
            rx_window: 25,
            tx_window,
            version: PpogVersion::V1,
        }
    }

    fn data_sequences(actions: &[Action]) -> Vec<u8> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Transmit(Frame::Data { sequence, .. }) => Some(sequence.value()),
                _ => None,
            })
            .collect()
    }

    fn ack(seq: u8) -> Frame {
        Frame::Ack {
            sequence: Sequence::new(seq),
        }
    }

    fn data(seq: u8, payload: &[u8]) -> Frame {
        Frame::Data {
            sequence: Sequence::new(seq),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_300_bytes_at_mtu_50() {
        let mut link = Link::new(params(25), 2);
        let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();

        let actions = link.queue_outbound(&payload, 50 - 4);
        assert_eq!(data_sequences(&actions), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(actions.last(), Some(&Action::RestartTimer));

        let sizes: Vec<usize> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit(Frame::Data { payload, .. }) => Some(payload.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![46, 46, 46, 46, 46, 46, 24]);

        let mut last = Vec::new();
        for seq in 0..7 {
            last = link.handle_frame(ack(seq)).unwrap();
        }
        assert_eq!(link.in_flight_len(), 0);
        assert_eq!(last, vec![Action::CancelTimer]);
    }

    #[test]
    fn test_sequence_is_frame_index_mod_32() {
        let mut link = Link::new(params(25), 2);
        let mut seen = Vec::new();
        for n in 0..70u32 {
            let actions = link.queue_outbound(&[n as u8], 10);
            seen.extend(data_sequences(&actions));
            let acked = link.handle_frame(ack((n % 32) as u8)).unwrap();
            seen.extend(data_sequences(&acked));
        }
        let expected: Vec<u8> = (0..70u32).map(|n| (n % 32) as u8).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_in_flight_never_exceeds_window() {
        let mut link = Link::new(params(2), 2);
        let actions = link.queue_outbound(&[0u8; 30], 10);
        assert_eq!(data_sequences(&actions), vec![0, 1]);
        assert_eq!(link.in_flight_len(), 2);

        let actions = link.handle_frame(ack(0)).unwrap();
        assert_eq!(data_sequences(&actions), vec![2]);
        assert_eq!(link.in_flight_len(), 2);
    }

    #[test]
    fn test_in_order_data_is_delivered_and_acked() {
        let mut link = Link::new(params(25), 2);
        let actions = link.handle_frame(data(0, b"hi")).unwrap();
        assert_eq!(
            actions,
            vec![Action::Deliver(b"hi".to_vec()), Action::Transmit(ack(0))]
        );
    }

    #[test]
    fn test_out_of_order_data_repeats_last_ack() {
        let mut link = Link::new(params(25), 2);
        link.handle_frame(data(0, b"a")).unwrap();

        let actions = link.handle_frame(data(2, b"c")).unwrap();
        assert_eq!(actions, vec![Action::Transmit(ack(0))]);

        // a duplicate of an already delivered frame is not delivered again
        let actions = link.handle_frame(data(0, b"a")).unwrap();
        assert_eq!(actions, vec![Action::Transmit(ack(0))]);
    }

    #[test]
    fn test_out_of_order_before_any_ack_sends_nothing() {
        let mut link = Link::new(params(25), 2);
        let actions = link.handle_frame(data(3, b"x")).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_duplicate_ack_resends_window_once() {
        let mut link = Link::new(params(25), 2);
        link.queue_outbound(&[1, 2, 3], 1);
        link.handle_frame(ack(0)).unwrap();

        let actions = link.handle_frame(ack(0)).unwrap();
        assert_eq!(data_sequences(&actions), vec![1, 2]);
        assert_eq!(link.in_flight_len(), 2);

        let actions = link.handle_frame(ack(2)).unwrap();
        assert_eq!(actions, vec![Action::CancelTimer]);
        assert_eq!(link.in_flight_len(), 0);
    }

    #[test]
    fn test_timeout_resend_then_ack_moves_on() {
        let mut link = Link::new(params(1), 2);
        link.queue_outbound(&[1, 2], 1);
        // frame 0 in flight, frame 1 pending
        link.handle_timeout().unwrap();
        assert_eq!(link.in_flight_len(), 1);

        let actions = link.handle_frame(ack(0)).unwrap();
        assert_eq!(data_sequences(&actions), vec![1]);
    }

    #[test]
    fn test_timeout_gives_up_after_two_retries() {
        let mut link = Link::new(params(19), 2);
        link.queue_outbound(&[1, 2, 3], 1);
        link.handle_frame(ack(0)).unwrap();

        let first = link.handle_timeout().unwrap();
        assert_eq!(data_sequences(&first), vec![1, 2]);
        let second = link.handle_timeout().unwrap();
        assert_eq!(data_sequences(&second), vec![1, 2]);

        let err = link.handle_timeout().unwrap_err();
        assert!(matches!(err, PpogError::RetriesExhausted { attempt: 3, .. }));
    }

    #[test]
    fn test_reset_mid_session_is_fatal() {
        let mut link = Link::new(params(25), 2);
        let err = link
            .handle_frame(Frame::ResetRequest {
                sequence: Sequence::ZERO,
                version: PpogVersion::V1,
            })
            .unwrap_err();
        assert!(matches!(err, PpogError::ResetDuringSession("ResetRequest")));
    }
}
