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

//! Byte-stream transport seam between sessions and the Bluetooth stack.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::device::DeviceIdentity;
use crate::error::SppResult;

/// A raw, full-duplex SPP byte pipe.
pub trait SppStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SppStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned stream handed to a session after a successful connect.
pub type BoxedStream = Box<dyn SppStream>;

/// Opens SPP connections to peer devices.
///
/// Implementations perform the handshake only; the caller applies the
/// connect timeout.
#[async_trait]
pub trait SppConnector: Send + Sync {
    async fn connect(&self, device: &DeviceIdentity) -> SppResult<BoxedStream>;
}
