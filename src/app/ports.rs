//! Port traits — the hexagonal boundary between the supervision core and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ monitor / heater / dispatcher (domain)
//! ```
//!
//! Driven adapters (the serial link, the cryostat telemetry client, the
//! alert sink) implement these traits. The domain consumes them via
//! generics, so the core never touches a device directly and the whole
//! supervision path runs against mocks in tests.

use crate::app::events::AlertEvent;
use crate::error::{LinkError, TelemetryError};

// ───────────────────────────────────────────────────────────────
// Instrument link port (domain ↔ voltage source)
// ───────────────────────────────────────────────────────────────

/// Line-oriented physical link to the voltage source.
///
/// The wire protocol cannot disambiguate interleaved request/response
/// pairs (no request IDs), so implementations are only ever driven by one
/// logical caller at a time — the bus token upstream enforces that.
///
/// I/O failures are returned as-is and are **not** retried here; the
/// heater controller owns the retry policy. A quiet read timeout is not an
/// error: implementations return whatever bytes arrived (possibly none)
/// and let the caller treat an unparseable frame as a transient fault.
pub trait InstrumentLink: Send {
    /// Write one command, including its terminator.
    fn send(&mut self, command: &str) -> Result<(), LinkError>;

    /// Read one response line (up to and including `\n`), or whatever
    /// partial frame was available before the link went quiet.
    fn read_line(&mut self) -> Result<String, LinkError>;
}

// ───────────────────────────────────────────────────────────────
// Telemetry port (cryostat → domain)
// ───────────────────────────────────────────────────────────────

/// Point readings from the cryostat telemetry source.
///
/// The first five quantities drive the safety monitor; the remaining three
/// exist for the remote read commands only. Implementations own the
/// staleness bookkeeping — the monitor just asks.
pub trait TelemetryPort: Send {
    /// 1K pot temperature (K).
    fn onek_pot_temp(&mut self) -> Result<f64, TelemetryError>;
    /// IVC sorption pump temperature (K).
    fn sorb_temp(&mut self) -> Result<f64, TelemetryError>;
    /// Needle valve temperature (K).
    fn needle_valve_temp(&mut self) -> Result<f64, TelemetryError>;
    /// Still pressure (mbar).
    fn still_pressure(&mut self) -> Result<f64, TelemetryError>;
    /// Condensation line pressure (mbar).
    fn condense_pressure(&mut self) -> Result<f64, TelemetryError>;

    /// Mixing chamber temperature (K).
    fn mix_chamber_temp(&mut self) -> Result<f64, TelemetryError>;
    /// STM RX thermometer temperature (K).
    fn stm_rx_temp(&mut self) -> Result<f64, TelemetryError>;
    /// STM CX thermometer temperature (K).
    fn stm_cx_temp(&mut self) -> Result<f64, TelemetryError>;

    /// True when the monitored readings have not changed for at least the
    /// staleness window.
    fn readings_static(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Alert port (domain → operator)
// ───────────────────────────────────────────────────────────────

/// Fire-and-forget operator notification.
///
/// The audible/visual mechanism itself lives outside the core; adapters
/// decide what a given [`AlertEvent`] sounds or looks like. No return
/// value — an alert that cannot be delivered must never stall the monitor.
pub trait AlertPort: Send {
    fn alert(&mut self, event: &AlertEvent);
}
