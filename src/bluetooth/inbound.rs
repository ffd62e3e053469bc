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

//! Fan-in channel merging inbound data from every session.

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use super::device::DeviceIdentity;

/// Data read from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub device: DeviceIdentity,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl InboundEvent {
    pub fn new(device: DeviceIdentity, text: String) -> Self {
        Self {
            device,
            text,
            timestamp: Local::now(),
        }
    }
}

/// Producer side, cloned into every session's reader.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl InboundSender {
    /// Push an event. Never blocks.
    ///
    /// Returns false once the consumer is gone.
    pub fn push(&self, event: InboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer side; there is exactly one.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
}

impl InboundReceiver {
    /// Wait for the next event in arrival order.
    ///
    /// Returns `None` when every sender has been dropped.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting events and drop whatever is still queued.
    pub fn close(mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

/// Create the fan-in channel.
pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboundSender { tx }, InboundReceiver { rx })
}
