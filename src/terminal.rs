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

//! Terminal scrollback and input commands.

use crate::bluetooth::{DeviceIdentity, DeviceList, InboundEvent};

/// Characters dropped from the front when the scrollback is full.
const TRIM_CHUNK: usize = 100;

/// Scrollback of inbound data, stamped with arrival time.
pub struct TerminalLog {
    buffer: String,
    capacity: usize,
    timestamp_format: String,
}

impl TerminalLog {
    pub fn new(capacity: usize, timestamp_format: impl Into<String>) -> Self {
        Self {
            buffer: String::new(),
            capacity: capacity.max(TRIM_CHUNK * 2),
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Append an event and return the rendered text that was added.
    pub fn append(&mut self, event: &InboundEvent) -> String {
        if self.buffer.chars().count() > self.capacity - TRIM_CHUNK {
            self.trim_front();
        }

        let line = format!(
            "\n{}: {}",
            event.timestamp.format(&self.timestamp_format),
            event.text
        );
        self.buffer.push_str(&line);
        line
    }

    /// Drop the oldest chunk, keeping the leading newline.
    fn trim_front(&mut self) {
        let start = self.buffer.char_indices().nth(1).map(|(i, _)| i);
        let end = self.buffer.char_indices().nth(TRIM_CHUNK + 1).map(|(i, _)| i);
        if let (Some(start), Some(end)) = (start, end) {
            self.buffer.replace_range(start..end, "");
        }
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// A line typed into the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    /// Plain text, written to every connected device.
    Send(String),
    /// Show live sessions.
    List,
    /// Show bonded devices.
    Paired,
    /// Scan for nearby devices.
    Scan,
    /// Connect to a device by `/scan` or `/paired` index, or address.
    Connect(String),
    /// Disconnect a device by `/list` index, or address.
    Disconnect(String),
    /// Reconnect devices that dropped.
    Reconnect,
    /// Resume reading from a device.
    InputOn(String),
    /// Pause reading from a device.
    InputOff(String),
    /// Ask for the radio to be powered on.
    Power,
    Help,
    Quit,
    /// Recognised command used wrongly; carries the usage string.
    Invalid(&'static str),
}

impl TerminalCommand {
    /// Parse an input line. Lines not starting with `/` are sent as text.
    pub fn parse(line: &str) -> Self {
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        // `//text` sends a line that starts with a slash
        if rest.starts_with('/') {
            return Self::Send(rest.to_string());
        }

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next().map(str::to_string);

        match (name.as_str(), arg) {
            ("list" | "ls", _) => Self::List,
            ("paired", _) => Self::Paired,
            ("scan", _) => Self::Scan,
            ("connect" | "c", Some(target)) => Self::Connect(target),
            ("connect" | "c", None) => Self::Invalid(CONNECT_USAGE),
            ("disconnect" | "d", Some(target)) => Self::Disconnect(target),
            ("disconnect" | "d", None) => Self::Invalid(DISCONNECT_USAGE),
            ("reconnect", _) => Self::Reconnect,
            ("input", Some(mode)) => match (mode.as_str(), parts.next()) {
                ("on", Some(target)) => Self::InputOn(target.to_string()),
                ("off", Some(target)) => Self::InputOff(target.to_string()),
                _ => Self::Invalid(INPUT_USAGE),
            },
            ("input", None) => Self::Invalid(INPUT_USAGE),
            ("power", _) => Self::Power,
            ("quit" | "exit" | "q", _) => Self::Quit,
            _ => Self::Help,
        }
    }
}

pub const CONNECT_USAGE: &str = "/connect <device index|address>";
pub const DISCONNECT_USAGE: &str = "/disconnect <live index|address>";
pub const INPUT_USAGE: &str = "/input on|off <live index|address>";

pub const HELP: &str = "\
Commands:
  /scan                               scan for nearby devices
  /paired                             list bonded devices
  /list                               list connected devices
  /connect <device index|address>     connect to a device
  /disconnect <live index|address>    disconnect a device
  /reconnect                          reconnect devices that dropped
  /input on|off <live index|address>  resume or pause reading from a device
  /power                              power on the Bluetooth radio
  /quit                               exit
A device index is a position shown by /scan or /paired; a live index is a
position shown by /list. Addresses look like 00:11:22:AA:BB:CC.
Any other line is sent to every connected device.";

/// Resolve a `/connect` target: a device list index or an address.
pub fn resolve_device(devices: &DeviceList, key: &str) -> Option<DeviceIdentity> {
    match devices.find(key) {
        Some(device) => Some(device.identity.clone()),
        None => key.parse().ok(),
    }
}

/// Resolve a target among live sessions: a `/list` index or an address.
pub fn resolve_live(
    live: &[DeviceIdentity],
    devices: &DeviceList,
    key: &str,
) -> Option<DeviceIdentity> {
    if let Ok(index) = key.parse::<usize>() {
        return live.get(index).cloned();
    }
    resolve_device(devices, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::DiscoveredDevice;
    use chrono::{Local, TimeZone};

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            device: DeviceIdentity::from_address("AA:BB:CC:DD:EE:FF"),
            text: text.to_string(),
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap(),
        }
    }

    #[test]
    fn test_append_formats_timestamp() {
        let mut log = TerminalLog::new(1024, "%H:%M:%S");
        let line = log.append(&event("OK"));
        assert_eq!(line, "\n12:30:45: OK");
        assert_eq!(log.contents(), "\n12:30:45: OK");
    }

    #[test]
    fn test_scrollback_is_bounded() {
        let mut log = TerminalLog::new(300, "%H:%M:%S");
        for _ in 0..50 {
            log.append(&event("0123456789"));
        }
        // Trimmed before each append once over capacity - 100
        assert!(log.contents().chars().count() <= 300);
        assert!(log.contents().starts_with('\n'));
        assert!(log.contents().ends_with("12:30:45: 0123456789"));
    }

    #[test]
    fn test_trim_respects_char_boundaries() {
        let mut log = TerminalLog::new(200, "%H");
        for _ in 0..40 {
            log.append(&event("°°°°°"));
        }
        assert!(log.contents().chars().count() <= 200);
    }

    #[test]
    fn test_resolve_targets() {
        let mut devices = DeviceList::new();
        devices.set_paired(vec![DiscoveredDevice {
            identity: DeviceIdentity::new("11:11:11:11:11:11", Some("Scale".into())),
            bonded: true,
        }]);
        let live = vec![DeviceIdentity::from_address("22:22:22:22:22:22")];

        assert_eq!(
            resolve_device(&devices, "0").unwrap().name(),
            Some("Scale")
        );
        assert_eq!(
            resolve_device(&devices, "33:33:33:33:33:33").unwrap().address(),
            "33:33:33:33:33:33"
        );
        assert!(resolve_device(&devices, "foo").is_none());
        assert!(resolve_device(&devices, "5").is_none());

        // Numbers refer to the live list, never the device list
        assert_eq!(
            resolve_live(&live, &devices, "0").unwrap().address(),
            "22:22:22:22:22:22"
        );
        assert!(resolve_live(&live, &devices, "1").is_none());
        assert_eq!(
            resolve_live(&live, &devices, "11:11:11:11:11:11").unwrap().address(),
            "11:11:11:11:11:11"
        );
        assert!(resolve_live(&live, &devices, "foo").is_none());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(TerminalCommand::parse("hello"), TerminalCommand::Send("hello".into()));
        assert_eq!(TerminalCommand::parse("/list"), TerminalCommand::List);
        assert_eq!(
            TerminalCommand::parse("/connect AA:BB:CC:DD:EE:FF"),
            TerminalCommand::Connect("AA:BB:CC:DD:EE:FF".into())
        );
        assert_eq!(
            TerminalCommand::parse("/d 2"),
            TerminalCommand::Disconnect("2".into())
        );
        assert_eq!(
            TerminalCommand::parse("/input off 0"),
            TerminalCommand::InputOff("0".into())
        );
        assert_eq!(
            TerminalCommand::parse("/connect"),
            TerminalCommand::Invalid(CONNECT_USAGE)
        );
        assert_eq!(
            TerminalCommand::parse("/input on"),
            TerminalCommand::Invalid(INPUT_USAGE)
        );
        assert_eq!(TerminalCommand::parse("/bogus"), TerminalCommand::Help);
        assert_eq!(
            TerminalCommand::parse("//etc/passwd"),
            TerminalCommand::Send("/etc/passwd".into())
        );
    }
}
