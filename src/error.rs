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

//! Error types for Bluetooth sessions.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening or driving an SPP connection.
#[derive(Debug, Error)]
pub enum SppError {
    /// The peer did not answer within the connect timeout.
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The peer or the stack refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// No Bluetooth radio is present on this host.
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "bluez")]
    #[error("BlueZ error: {0}")]
    Bluetooth(#[from] bluer::Error),
}

pub type SppResult<T> = Result<T, SppError>;
