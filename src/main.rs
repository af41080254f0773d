//! Cryoguard daemon — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │                                                          │
//! │  SerialLink        TritonClient       LogAlert           │
//! │  (InstrumentLink)  (TelemetryPort)    (AlertPort)        │
//! │                                                          │
//! │  ──────────────── Port trait boundary ─────────────      │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────┐      │
//! │  │  Session: monitor · heater · dispatcher        │      │
//! │  └────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use cryoguard::adapters::{LogAlert, SerialLink, TritonClient};
use cryoguard::app::bus::Bus;
use cryoguard::app::session::Session;
use cryoguard::config::SystemConfig;
use cryoguard::heater::{HeaterSource, RampFlags};

const DEFAULT_CONFIG_PATH: &str = "cryoguard.json";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  cryoguard v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
    let config = load_config(Path::new(&config_path));
    config
        .validate()
        .map_err(|reason| anyhow::anyhow!(reason))
        .context("invalid configuration")?;

    // ── 2. Adapters ───────────────────────────────────────────
    let link = SerialLink::open(&config)
        .with_context(|| format!("opening voltage source on {}", config.serial_device))?;
    let telemetry = TritonClient::new(&config);

    // ── 3. Domain wiring ──────────────────────────────────────
    let flags = RampFlags::new();
    let heater = HeaterSource::new(link, flags, &config);
    let bus = Bus { heater, telemetry };

    // ── 4. Session ────────────────────────────────────────────
    let session =
        Session::start(bus, &config, LogAlert::new(), None).context("starting session")?;
    info!("command server listening on {}", session.local_addr());
    info!("send Triton_Stop to quit");

    session.run();
    Ok(())
}

/// Load the JSON config, falling back to defaults when the file is absent.
/// A file that exists but does not parse is a hard error — running a
/// safety system on half-understood limits is worse than not running.
fn load_config(path: &Path) -> SystemConfig {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(config) => {
                info!("config loaded from {}", path.display());
                config
            }
            Err(e) => {
                log::error!("config file {} is malformed: {e}", path.display());
                std::process::exit(2);
            }
        },
        Err(_) => {
            warn!("no config at {}, using defaults", path.display());
            SystemConfig::default()
        }
    }
}
