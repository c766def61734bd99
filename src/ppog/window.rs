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

//! Outbound send window: pending queue plus in-flight set.

use std::collections::VecDeque;

use super::sequence::Sequence;

/// A data frame waiting to be sent, or sent and awaiting its ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub sequence: Sequence,
    pub payload: Vec<u8>,
    /// Number of times this frame has been resent.
    pub attempt: u32,
}

impl QueuedFrame {
    pub fn new(sequence: Sequence, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            payload,
            attempt: 0,
        }
    }
}

/// A frame was resent more often than allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub sequence: Sequence,
    pub attempt: u32,
}

/// Pending-send queue and in-flight set for one connection.
///
/// Frames move from the front of `pending` to the back of `in_flight`;
/// `in_flight` never holds more than `tx_window` entries.
#[derive(Debug)]
pub struct SendWindow {
    pending: VecDeque<QueuedFrame>,
    in_flight: VecDeque<QueuedFrame>,
    tx_window: usize,
    max_retries: u32,
}

impl SendWindow {
    /// Create an empty window.
    pub fn new(tx_window: u8, max_retries: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: VecDeque::with_capacity(tx_window as usize),
            tx_window: tx_window.max(1) as usize,
            max_retries,
        }
    }

    pub fn enqueue(&mut self, frame: QueuedFrame) {
        self.pending.push_back(frame);
    }

    /// Move the next pending frame into flight if the window has room.
    ///
    /// Returns a copy of the frame to transmit.
    pub fn promote_next(&mut self) -> Option<QueuedFrame> {
        if self.in_flight.len() >= self.tx_window {
            return None;
        }
        let frame = self.pending.pop_front()?;
        self.in_flight.push_back(frame.clone());
        Some(frame)
    }

    /// Drop queued resends made obsolete by an ack for `ack`.
    ///
    /// Resends always sit at the front of the pending queue in sequence
    /// order, so everything up to and including `ack` can go.
    pub fn drop_resends_through(&mut self, ack: Sequence) -> usize {
        let resends = self
            .pending
            .iter()
            .take_while(|frame| frame.attempt > 0)
            .position(|frame| frame.sequence == ack);
        match resends {
            Some(index) => {
                self.pending.drain(..=index);
                index + 1
            }
            None => 0,
        }
    }

    /// Acknowledge in-flight frames up to and including `ack`.
    ///
    /// Returns how many frames were released; an ack that matches nothing
    /// in flight releases nothing.
    pub fn acknowledge(&mut self, ack: Sequence) -> usize {
        match self.in_flight.iter().position(|frame| frame.sequence == ack) {
            Some(index) => {
                self.in_flight.drain(..=index);
                index + 1
            }
            None => 0,
        }
    }

    /// Put every in-flight frame back at the front of the pending queue,
    /// in original order, with its attempt count bumped.
    pub fn requeue_in_flight(&mut self) -> Result<usize, RetriesExhausted> {
        if let Some(frame) = self
            .in_flight
            .iter()
            .find(|frame| frame.attempt + 1 > self.max_retries)
        {
            return Err(RetriesExhausted {
                sequence: frame.sequence,
                attempt: frame.attempt + 1,
            });
        }

        let count = self.in_flight.len();
        while let Some(mut frame) = self.in_flight.pop_back() {
            frame.attempt += 1;
            self.pending.push_front(frame);
        }
        Ok(count)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
