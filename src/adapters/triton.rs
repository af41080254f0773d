//! Telemetry adapter for the cryostat's system controller.
//!
//! The controller speaks a line-oriented query protocol over TCP: one
//! `READ:DEV:<uid>:...:SIG:<quantity>` line per connection, one reply line
//! back, e.g.
//!
//! ```text
//!   READ:DEV:T5:TEMP:SIG:TEMP  →  STAT:DEV:T5:TEMP:SIG:TEMP:1.4902K
//! ```
//!
//! The numeric value is the last colon-separated field with its unit
//! suffix stripped.
//!
//! ## Staleness tracking
//!
//! The controller has no "readings are stuck" signal of its own, so this
//! adapter keeps the last seen value of each monitored quantity and the
//! time any of them last changed. `readings_static()` is true once nothing
//! has moved for the configured window — the signature of a frozen sensor
//! loom or a dead fridge process rather than an over-limit excursion.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::app::ports::TelemetryPort;
use crate::config::SystemConfig;
use crate::error::TelemetryError;

/// Sensor-loom UID assignment for this cryostat.
const UID_ONEK_POT: &str = "T5";
const UID_SORB: &str = "T4";
const UID_NEEDLE_VALVE: &str = "T3";
const UID_MIX_CHAMBER: &str = "T8";
const UID_STM_RX: &str = "T6";
const UID_STM_CX: &str = "T7";
const UID_STILL_PRESSURE: &str = "P2";
const UID_CONDENSE_PRESSURE: &str = "P1";

/// Index into the monitored-quantity cache (the five the monitor polls).
const MONITORED: usize = 5;

/// TCP client for the cryostat telemetry source.
pub struct TritonClient {
    host: String,
    port: u16,
    timeout: Duration,
    staleness_window: Duration,
    last_seen: [Option<f64>; MONITORED],
    last_change: Instant,
}

impl TritonClient {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            host: config.triton_host.clone(),
            port: config.triton_port,
            timeout: Duration::from_millis(config.link_timeout_ms),
            staleness_window: Duration::from_secs(config.staleness_window_secs),
            last_seen: [None; MONITORED],
            last_change: Instant::now(),
        }
    }

    /// One query round trip on a fresh connection.
    fn query(&self, uid: &str, signal: &str) -> Result<f64, TelemetryError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        let request = format!("READ:DEV:{uid}:{signal}\n");
        stream.write_all(request.as_bytes())?;

        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply)?;
        parse_reply(&reply)
    }

    fn query_temp(&self, uid: &str) -> Result<f64, TelemetryError> {
        self.query(uid, "TEMP:SIG:TEMP")
    }

    fn query_pressure(&self, uid: &str) -> Result<f64, TelemetryError> {
        self.query(uid, "PRES:SIG:PRES")
    }

    /// Fold a monitored reading into the staleness cache.
    fn note(&mut self, slot: usize, value: f64) {
        if self.last_seen[slot] != Some(value) {
            self.last_seen[slot] = Some(value);
            self.last_change = Instant::now();
        }
    }
}

/// Pull the numeric payload out of a `STAT:...:<value><unit>` reply.
fn parse_reply(reply: &str) -> Result<f64, TelemetryError> {
    let field = reply
        .trim()
        .rsplit(':')
        .next()
        .ok_or_else(|| TelemetryError::Malformed(reply.to_string()))?;
    let numeric: &str = field.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    numeric
        .parse()
        .map_err(|_| TelemetryError::Malformed(reply.to_string()))
}

impl TelemetryPort for TritonClient {
    fn onek_pot_temp(&mut self) -> Result<f64, TelemetryError> {
        let v = self.query_temp(UID_ONEK_POT)?;
        self.note(0, v);
        Ok(v)
    }

    fn sorb_temp(&mut self) -> Result<f64, TelemetryError> {
        let v = self.query_temp(UID_SORB)?;
        self.note(1, v);
        Ok(v)
    }

    fn needle_valve_temp(&mut self) -> Result<f64, TelemetryError> {
        let v = self.query_temp(UID_NEEDLE_VALVE)?;
        self.note(2, v);
        Ok(v)
    }

    fn still_pressure(&mut self) -> Result<f64, TelemetryError> {
        let v = self.query_pressure(UID_STILL_PRESSURE)?;
        self.note(3, v);
        Ok(v)
    }

    fn condense_pressure(&mut self) -> Result<f64, TelemetryError> {
        let v = self.query_pressure(UID_CONDENSE_PRESSURE)?;
        self.note(4, v);
        Ok(v)
    }

    fn mix_chamber_temp(&mut self) -> Result<f64, TelemetryError> {
        self.query_temp(UID_MIX_CHAMBER)
    }

    fn stm_rx_temp(&mut self) -> Result<f64, TelemetryError> {
        self.query_temp(UID_STM_RX)
    }

    fn stm_cx_temp(&mut self) -> Result<f64, TelemetryError> {
        self.query_temp(UID_STM_CX)
    }

    fn readings_static(&mut self) -> bool {
        // Never flag a plateau before a full set of readings exists.
        self.last_seen.iter().all(Option::is_some)
            && self.last_change.elapsed() >= self.staleness_window
    }
}
