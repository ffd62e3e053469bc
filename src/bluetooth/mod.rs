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

//! Bluetooth communication module.
//!
//! Manages SPP client sessions to any number of peers and merges their
//! inbound data into one stream.

#[cfg(feature = "bluez")]
mod bluez;
mod decoder;
mod device;
mod discovery;
mod events;
mod inbound;
mod registry;
mod session;
mod transport;

#[cfg(feature = "bluez")]
pub use bluez::BluezBackend;
pub use decoder::{DecodeMode, Utf8Decoder};
pub use device::{DeviceIdentity, DiscoveredDevice, SPP_UUID};
pub use discovery::{scan, DeviceList, DiscoveryAdapter, RadioState};
pub use events::{ChannelSink, LogSink, SessionEvent, SessionEventSink};
pub use inbound::{inbound_channel, InboundEvent, InboundReceiver, InboundSender};
pub use registry::SessionRegistry;
pub use session::{
    Payload, Session, SessionConfig, SessionState, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_READ_BUFFER_SIZE,
};
pub use transport::{BoxedStream, SppConnector, SppStream};
