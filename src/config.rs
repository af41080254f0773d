//! System configuration parameters
//!
//! All tunable parameters for the heater-protection session. Values are
//! loaded from a JSON file at startup (or defaulted) and are immutable for
//! the lifetime of the session — the safety envelope is never adjusted
//! while the monitor is running.

use serde::{Deserialize, Serialize};

use crate::error::LimitKind;

/// A hard limit crossed by a monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitBreach {
    pub kind: LimitKind,
    pub value: f64,
    pub limit: f64,
}

/// Shutdown limits and alarm thresholds for the monitored quantities.
///
/// Limits trip the stall + emergency-zero path; alarms only raise the
/// audible warning and never stop anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum 1K pot temperature (K) before shutdown.
    pub onek_pot_limit_k: f64,
    /// Maximum sorb temperature (K) before shutdown.
    pub sorb_limit_k: f64,
    /// Maximum needle valve temperature (K) before shutdown.
    pub needle_valve_limit_k: f64,
    /// Maximum still pressure (mbar) before shutdown.
    pub still_limit_mbar: f64,

    /// 1K pot temperature (K) that raises the alarm.
    pub onek_pot_alarm_k: f64,
    /// Sorb temperature (K) that raises the alarm.
    pub sorb_alarm_k: f64,
    /// Condensation-line pressure (mbar) that raises the alarm.
    pub condense_alarm_mbar: f64,
}

impl SafetyLimits {
    /// First hard limit crossed by the given readings, if any.
    /// Checked in the order the quantities are polled.
    pub fn breached(
        &self,
        onek_pot_k: f64,
        sorb_k: f64,
        needle_valve_k: f64,
        still_mbar: f64,
    ) -> Option<LimitBreach> {
        if onek_pot_k > self.onek_pot_limit_k {
            return Some(LimitBreach {
                kind: LimitKind::OnekPotTemperature,
                value: onek_pot_k,
                limit: self.onek_pot_limit_k,
            });
        }
        if sorb_k > self.sorb_limit_k {
            return Some(LimitBreach {
                kind: LimitKind::SorbTemperature,
                value: sorb_k,
                limit: self.sorb_limit_k,
            });
        }
        if needle_valve_k > self.needle_valve_limit_k {
            return Some(LimitBreach {
                kind: LimitKind::NeedleValveTemperature,
                value: needle_valve_k,
                limit: self.needle_valve_limit_k,
            });
        }
        if still_mbar > self.still_limit_mbar {
            return Some(LimitBreach {
                kind: LimitKind::StillPressure,
                value: still_mbar,
                limit: self.still_limit_mbar,
            });
        }
        None
    }

    /// True when any alarm threshold (warning only, no shutdown) is crossed.
    pub fn alarm_crossed(&self, onek_pot_k: f64, sorb_k: f64, condense_mbar: f64) -> bool {
        sorb_k > self.sorb_alarm_k
            || onek_pot_k > self.onek_pot_alarm_k
            || condense_mbar > self.condense_alarm_mbar
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            onek_pot_limit_k: 2.0,
            sorb_limit_k: 2.0,
            needle_valve_limit_k: 10.0,
            still_limit_mbar: 1.0,
            onek_pot_alarm_k: 1.8,
            sorb_alarm_k: 1.8,
            condense_alarm_mbar: 185.0,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Shutdown limits and alarm thresholds.
    pub limits: SafetyLimits,

    // --- Heater source ---
    /// Maximum allowed source voltage magnitude (V).
    pub max_voltage_v: f64,
    /// Default ramp increment (V). 0 restores the built-in 0.1 V default.
    pub default_increment_v: f64,
    /// Sleep between ramp steps (milliseconds).
    pub step_interval_ms: u64,
    /// Re-read the actual voltage before every ramp step.
    pub read_before_write: bool,
    /// Backoff between malformed-frame retries (milliseconds).
    pub header_retry_backoff_ms: u64,

    // --- Serial link ---
    /// Serial device the voltage source is attached to.
    pub serial_device: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Serial read timeout (milliseconds).
    pub link_timeout_ms: u64,

    // --- Telemetry source ---
    /// Host of the cryostat telemetry server.
    pub triton_host: String,
    /// Port of the cryostat telemetry server.
    pub triton_port: u16,
    /// Window (seconds) of unchanged readings that counts as a plateau.
    pub staleness_window_secs: u64,

    // --- Command server ---
    /// Address the command listener binds.
    pub listen_addr: String,
    /// Port the command listener binds. 0 selects an ephemeral port.
    pub listen_port: u16,

    // --- Monitor timing ---
    /// Poll cycle interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Staleness re-check interval while plateaued (seconds).
    pub plateau_recheck_secs: u64,
    /// Settle delay before restoring voltage after a plateau clears (seconds).
    pub plateau_resume_delay_secs: u64,
    /// Re-announcement interval in the communications-failure holding
    /// pattern (seconds).
    pub holding_interval_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            limits: SafetyLimits::default(),

            // Heater source
            max_voltage_v: 100.0,
            default_increment_v: 0.1,
            step_interval_ms: 10,
            read_before_write: true,
            header_retry_backoff_ms: 100,

            // Serial link
            serial_device: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            link_timeout_ms: 100,

            // Telemetry source
            triton_host: "127.0.0.1".into(),
            triton_port: 33576,
            staleness_window_secs: 300, // 5 min

            // Command server
            listen_addr: "127.0.0.1".into(),
            listen_port: 65430,

            // Monitor timing
            poll_interval_ms: 1000, // 1 Hz
            plateau_recheck_secs: 20,
            plateau_resume_delay_secs: 5,
            holding_interval_secs: 5,
        }
    }
}

impl SystemConfig {
    /// Reject configurations the safety envelope cannot be built from.
    /// Invalid values are refused, not clamped.
    pub fn validate(&self) -> Result<(), &'static str> {
        let l = &self.limits;
        if l.onek_pot_limit_k <= 0.0
            || l.sorb_limit_k <= 0.0
            || l.needle_valve_limit_k <= 0.0
            || l.still_limit_mbar <= 0.0
        {
            return Err("hard limits must be positive");
        }
        if l.onek_pot_alarm_k > l.onek_pot_limit_k || l.sorb_alarm_k > l.sorb_limit_k {
            return Err("alarm thresholds must not exceed their hard limits");
        }
        if self.max_voltage_v <= 0.0 {
            return Err("max_voltage_v must be positive");
        }
        if self.default_increment_v < 0.0 {
            return Err("default_increment_v must not be negative");
        }
        if self.default_increment_v > 0.0
            && self.default_increment_v < crate::heater::MIN_INCREMENT_V
        {
            return Err("default_increment_v is below the source resolution");
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be non-zero");
        }
        if self.baud_rate == 0 {
            return Err("baud_rate must be non-zero");
        }
        if self.staleness_window_secs == 0 {
            return Err("staleness_window_secs must be non-zero");
        }
        Ok(())
    }
}
