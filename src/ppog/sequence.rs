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

//! 5-bit PPoG sequence numbers.

use std::fmt;

/// Sequence numbers live in the top five bits of the header byte.
pub const SEQUENCE_MODULUS: u8 = 32;

/// A sequence number in `0..32` that wraps on increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sequence(u8);

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);

    /// Create a sequence, reducing the value modulo 32.
    pub fn new(value: u8) -> Self {
        Self(value % SEQUENCE_MODULUS)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The sequence that follows this one.
    pub fn next(self) -> Self {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
