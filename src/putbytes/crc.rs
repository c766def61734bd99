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

//! CRC32 as computed by the STM32 CRC peripheral, which the watch uses to
//! verify transfers.
//!
//! Input is consumed as little-endian 32-bit words, each shifted in MSB
//! first. A trailing partial word is zero padded and byte reversed. There is
//! no final XOR.

const POLYNOMIAL: u32 = 0x04C1_1DB7;
const INITIAL: u32 = 0xFFFF_FFFF;

/// Incremental STM32 CRC.
#[derive(Debug, Clone)]
pub struct Stm32Crc {
    crc: u32,
    leftover: [u8; 4],
    leftover_len: usize,
}

impl Default for Stm32Crc {
    fn default() -> Self {
        Self::new()
    }
}

impl Stm32Crc {
    pub fn new() -> Self {
        Self {
            crc: INITIAL,
            leftover: [0; 4],
            leftover_len: 0,
        }
    }

    /// Feed more bytes. Chunk boundaries do not affect the result.
    pub fn update(&mut self, mut bytes: &[u8]) {
        if self.leftover_len > 0 {
            let take = (4 - self.leftover_len).min(bytes.len());
            self.leftover[self.leftover_len..self.leftover_len + take]
                .copy_from_slice(&bytes[..take]);
            self.leftover_len += take;
            bytes = &bytes[take..];
            if self.leftover_len < 4 {
                return;
            }
            self.crc = process_word(self.crc, u32::from_le_bytes(self.leftover));
            self.leftover_len = 0;
        }

        let mut words = bytes.chunks_exact(4);
        for word in &mut words {
            self.crc = process_word(
                self.crc,
                u32::from_le_bytes([word[0], word[1], word[2], word[3]]),
            );
        }

        let rest = words.remainder();
        self.leftover[..rest.len()].copy_from_slice(rest);
        self.leftover_len = rest.len();
    }

    pub fn finalize(&self) -> u32 {
        if self.leftover_len == 0 {
            return self.crc;
        }
        let tail = &self.leftover[..self.leftover_len];
        let word = tail
            .iter()
            .fold(0u32, |word, &byte| (word << 8) | u32::from(byte));
        process_word(self.crc, word)
    }

    /// CRC of a complete buffer.
    pub fn checksum(bytes: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(bytes);
        crc.finalize()
    }
}

fn process_word(crc: u32, word: u32) -> u32 {
    let mut crc = crc ^ word;
    for _ in 0..32 {
        crc = if crc & 0x8000_0000 != 0 {
            (crc << 1) ^ POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}
