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

//! SPP Terminal

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spp_terminal::bluetooth::{
    self, inbound_channel, BluezBackend, ChannelSink, DeviceIdentity, DeviceList,
    DiscoveryAdapter, Payload, RadioState, SessionConfig, SessionEvent, SessionRegistry,
};
use spp_terminal::config::Config;
use spp_terminal::terminal::{
    resolve_device, resolve_live, TerminalCommand, TerminalLog, CONNECT_USAGE, DISCONNECT_USAGE,
    HELP, INPUT_USAGE,
};
use spp_terminal::SppError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spp_terminal=info".parse()?),
        )
        .init();

    info!("Starting SPP Terminal v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let backend = Arc::new(BluezBackend::new(config.bluetooth.rfcomm_channel).await?);

    let (sink, mut event_rx) = ChannelSink::new();
    let (inbound_tx, mut inbound_rx) = inbound_channel();
    let registry = SessionRegistry::new(
        backend.clone(),
        Arc::new(sink),
        inbound_tx,
        SessionConfig::from(&config.bluetooth),
    );

    // Render inbound data
    let terminal_config = config.terminal.clone();
    let display = tokio::spawn(async move {
        let mut log = TerminalLog::new(
            terminal_config.scrollback_chars,
            terminal_config.timestamp_format,
        );
        while let Some(event) = inbound_rx.recv().await {
            print!("{}", log.append(&event));
            let _ = std::io::stdout().flush();
        }
    });

    // Show session notifications
    let radio = backend.clone();
    let notifier = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("\n* {}", event.describe());
            if event == SessionEvent::NoBluetooth {
                radio.request_radio_on();
            }
        }
    });

    // Keep the radio on
    let radio = backend.clone();
    let radio_watch = tokio::spawn(async move {
        match radio.radio_states().await {
            Ok(mut states) => {
                while let Some(state) = states.next().await {
                    if state == RadioState::Off {
                        warn!("Bluetooth radio turned off, requesting power on");
                        radio.request_radio_on();
                    }
                }
            }
            Err(SppError::NoAdapter) => warn!("No Bluetooth adapter present"),
            Err(e) => error!("Cannot watch radio state: {}", e),
        }
    });

    let mut devices = DeviceList::new();
    match backend.paired_devices().await {
        Ok(paired) => devices.set_paired(paired),
        Err(SppError::NoAdapter) => registry.on_no_bluetooth(),
        Err(e) => warn!("Cannot list paired devices: {}", e),
    }

    println!("{}", HELP);
    info!("Ready.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let command = TerminalCommand::parse(&line);
                    if command == TerminalCommand::Quit {
                        break;
                    }
                    handle_command(command, &registry, backend.as_ref(), &mut devices, &config).await;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    registry.shutdown().await;
    // Undrained inbound data is discarded
    display.abort();
    notifier.abort();
    radio_watch.abort();

    info!("SPP Terminal stopped");
    Ok(())
}

/// Resolve a live session target, printing `usage` when nothing matches.
fn live_target(
    registry: &SessionRegistry,
    devices: &DeviceList,
    key: &str,
    usage: &str,
) -> Option<DeviceIdentity> {
    let device = resolve_live(&registry.devices(), devices, key);
    if device.is_none() {
        println!("* No live device {}. Usage: {}", key, usage);
    }
    device
}

async fn handle_command(
    command: TerminalCommand,
    registry: &SessionRegistry,
    discovery: &dyn DiscoveryAdapter,
    devices: &mut DeviceList,
    config: &Config,
) {
    match command {
        TerminalCommand::Send(text) => {
            if registry.is_empty() {
                println!("* Not connected");
                return;
            }
            // Fire and forget; each session writes on its own task
            registry.write_all(Payload::Text(text));
        }
        TerminalCommand::List => {
            let live = registry.devices();
            if live.is_empty() {
                println!("* No connected devices");
            }
            for (i, device) in live.iter().enumerate() {
                let reading = registry
                    .session(device)
                    .map(|s| if s.is_reader_active() { "reading" } else { "paused" })
                    .unwrap_or("closed");
                println!("  [{}] {} ({})", i, device, reading);
            }
            let candidates = registry.reconnect_candidates();
            if !candidates.is_empty() {
                println!("  {} device(s) can be reconnected with /reconnect", candidates.len());
            }
        }
        TerminalCommand::Paired => match discovery.paired_devices().await {
            Ok(paired) => {
                devices.set_paired(paired);
                print_devices(devices);
            }
            Err(SppError::NoAdapter) => registry.on_no_bluetooth(),
            Err(e) => println!("* Cannot list paired devices: {}", e),
        },
        TerminalCommand::Scan => {
            let duration = Duration::from_secs(config.bluetooth.scan_duration_secs);
            println!("* Scanning for {}s...", duration.as_secs());
            match bluetooth::scan(discovery, devices, duration).await {
                Ok(_) => print_devices(devices),
                Err(SppError::NoAdapter) => registry.on_no_bluetooth(),
                Err(e) => println!("* Scan failed: {}", e),
            }
        }
        TerminalCommand::Connect(key) => {
            let Some(device) = resolve_device(devices, &key) else {
                println!("* Unknown device {}. Usage: {}", key, CONNECT_USAGE);
                return;
            };
            if !registry.connect(device.clone()) {
                println!("* Already connected to {}", device);
            }
        }
        TerminalCommand::Disconnect(key) => {
            let Some(device) = live_target(registry, devices, &key, DISCONNECT_USAGE) else {
                return;
            };
            if !registry.disconnect(&device).await {
                println!("* Not connected to {}", device);
            }
        }
        TerminalCommand::Reconnect => {
            let count = registry.reconnect_all();
            println!("* Reconnecting {} device(s)", count);
        }
        TerminalCommand::InputOn(key) => {
            let Some(device) = live_target(registry, devices, &key, INPUT_USAGE) else {
                return;
            };
            match registry.session(&device) {
                Some(session) => session.start_input(),
                None => println!("* Not connected to {}", device),
            }
        }
        TerminalCommand::InputOff(key) => {
            let Some(device) = live_target(registry, devices, &key, INPUT_USAGE) else {
                return;
            };
            match registry.session(&device) {
                Some(session) => session.stop_input(),
                None => println!("* Not connected to {}", device),
            }
        }
        TerminalCommand::Power => discovery.request_radio_on(),
        TerminalCommand::Help => println!("{}", HELP),
        TerminalCommand::Invalid(usage) => println!("* Usage: {}", usage),
        TerminalCommand::Quit => {}
    }
}

fn print_devices(devices: &DeviceList) {
    for (i, device) in devices.devices().iter().enumerate() {
        let tag = if device.bonded { "paired" } else { "found" };
        println!("  [{}] {} ({})", i, device.identity, tag);
    }
}
