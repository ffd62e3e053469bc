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

//! Text decoding of raw reads.

use serde::{Deserialize, Serialize};

/// How raw reads are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Carry incomplete UTF-8 sequences over to the next read.
    #[default]
    Incremental,
    /// Decode every read on its own; split characters become U+FFFD.
    PerRead,
}

/// UTF-8 decoder that tolerates characters split across reads.
pub struct Utf8Decoder {
    mode: DecodeMode,
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new decoder.
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            pending: Vec::with_capacity(4),
        }
    }

    /// Decode one read.
    ///
    /// May return an empty string when the chunk only holds the start of a
    /// multi-byte character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.mode == DecodeMode::PerRead {
            return String::from_utf8_lossy(chunk).into_owned();
        }

        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end, keep for next read
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let carried = rest.to_vec();
        self.pending = carried;
        out
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush held-back bytes as replacement characters.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
