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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{DecodeMode, SessionConfig};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Terminal display settings.
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Give up on a connection attempt after this many milliseconds.
    pub connect_timeout_ms: u64,

    /// Size of each session's read buffer.
    pub read_buffer_size: usize,

    /// Start reading as soon as a connection is up.
    pub start_reader_immediately: bool,

    /// Fixed RFCOMM channel. Unset resolves the SPP service instead.
    pub rfcomm_channel: Option<u8>,

    /// How inbound bytes are decoded to text.
    pub decode_mode: DecodeMode,

    /// Length of a `/scan` in seconds.
    pub scan_duration_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            read_buffer_size: 8192,
            start_reader_immediately: true,
            rfcomm_channel: None,
            decode_mode: DecodeMode::Incremental,
            scan_duration_secs: 10,
        }
    }
}

impl From<&BluetoothConfig> for SessionConfig {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_buffer_size: config.read_buffer_size,
            start_reader_immediately: config.start_reader_immediately,
            decode_mode: config.decode_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Characters of scrollback kept in the terminal log.
    pub scrollback_chars: usize,

    /// chrono format used to stamp inbound data.
    pub timestamp_format: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            scrollback_chars: 8192,
            timestamp_format: "%H:%M:%S%.3f".to_string(),
        }
    }
}

impl Config {
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spp-terminal")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.connect_timeout_ms, 15_000);
        assert!(config.bluetooth.start_reader_immediately);
        assert_eq!(config.bluetooth.rfcomm_channel, None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\nrfcomm_channel = 1\ndecode_mode = \"per_read\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.rfcomm_channel, Some(1));
        assert_eq!(config.bluetooth.decode_mode, DecodeMode::PerRead);
        assert_eq!(config.bluetooth.read_buffer_size, 8192);
        assert_eq!(config.terminal.scrollback_chars, 8192);

        let session = SessionConfig::from(&config.bluetooth);
        assert_eq!(session.connect_timeout, Duration::from_secs(15));
    }
}
