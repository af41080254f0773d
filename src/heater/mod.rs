//! Voltage-source controller for the impedance heater.
//!
//! Drives a programmable SourceMeter over a line-oriented link:
//! measurement query `:READ?`, level set `:SOUR:VOLT:LEV <v>`, output
//! toggle `OUTPUT ON/OFF`, and a local-panel release (`:SYST:KEY 23`)
//! after every exchange so the front panel stays usable between remote
//! operations.
//!
//! ## Fault model
//!
//! The source occasionally returns a truncated or header-garbled
//! measurement frame. Those are retried here, bounded, with a short
//! backoff; exhausting the retries forces the commanded level to 0 V
//! rather than leaving the instrument in an unknown state. Link-level I/O
//! errors are **not** retried here — they propagate to the caller, which
//! owns the retry policy.
//!
//! ## Interruption
//!
//! A normal ramp checks two flags before every step: `halt` (cooperative
//! abort, raised by the remote HALT line, cleared at the start of the next
//! ramp) and `emergency` (raised by an emergency-zero caller so it can
//! take the bus). The emergency run to zero itself ignores both — it is
//! the one operation guaranteed to run to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::app::ports::InstrumentLink;
use crate::config::SystemConfig;
use crate::error::{Result, SafetyViolation};

/// Resolution floor of the source's voltage DAC (V). Ramp increments below
/// this do not produce distinct output levels.
pub const MIN_INCREMENT_V: f64 = 0.000095;

/// Built-in ramp increment (V), used when the configured default is 0.
pub const DEFAULT_INCREMENT_V: f64 = 0.1;

/// A ramp has converged once the remaining gap is below this multiple of
/// the increment; it then snaps directly to the target.
const CONVERGENCE_FACTOR: f64 = 1.1;

/// Fixed step size of the emergency run to zero (V).
const EMERGENCY_STEP_V: f64 = 0.1;

/// |v| below this counts as zero for the emergency run.
const EMERGENCY_EPSILON_V: f64 = 1e-5;

/// Sleep between emergency steps.
const EMERGENCY_STEP_INTERVAL: Duration = Duration::from_millis(10);

/// Settle time after the emergency caller takes the bus, before the first
/// read.
const EMERGENCY_SETTLE: Duration = Duration::from_millis(100);

/// Malformed-frame retries before the forced-zero fallback.
const FRAME_RETRY_LIMIT: u32 = 100;

// ───────────────────────────────────────────────────────────────
// Ramp interruption flags
// ───────────────────────────────────────────────────────────────

/// Cooperative interruption flags shared between the controller and the
/// threads that need to pre-empt it. These live *outside* the bus mutex so
/// they can be raised while a ramp holds the token.
#[derive(Debug, Default)]
pub struct RampFlags {
    halt: AtomicBool,
    emergency: AtomicBool,
}

impl RampFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the in-flight ramp (if any) to stop after its current step.
    pub fn request_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    pub fn halt_requested(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    fn clear_halt(&self) {
        self.halt.store(false, Ordering::SeqCst);
    }

    /// Mark an emergency zero as pending/active. In-flight ramps abort at
    /// their next step; new ramps are refused until [`end_emergency`].
    pub fn begin_emergency(&self) {
        self.emergency.store(true, Ordering::SeqCst);
    }

    pub fn end_emergency(&self) {
        self.emergency.store(false, Ordering::SeqCst);
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }
}

// ───────────────────────────────────────────────────────────────
// Controller state
// ───────────────────────────────────────────────────────────────

/// What the controller is currently doing with the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Idle,
    Ramping,
    EmergencyZeroing,
}

// ───────────────────────────────────────────────────────────────
// HeaterSource
// ───────────────────────────────────────────────────────────────

/// The bus-exclusive controller for the heater's voltage source.
///
/// All methods take `&mut self`: callers reach a `HeaterSource` only
/// through the bus token, which is what serializes access to the link.
pub struct HeaterSource<L: InstrumentLink> {
    link: L,
    flags: Arc<RampFlags>,
    state: ActuatorState,

    max_voltage: f64,
    default_increment: f64,
    step_interval: Duration,
    retry_backoff: Duration,
    read_before_write: bool,

    /// Level most recently commanded to the source.
    commanded: f64,
    /// Last voltage successfully parsed off the wire. Fallback value when
    /// frame retries exhaust; updated only on a successful parse.
    last_voltage: f64,
    /// Last current successfully parsed off the wire (µA).
    last_current_ua: f64,
}

impl<L: InstrumentLink> HeaterSource<L> {
    pub fn new(link: L, flags: Arc<RampFlags>, config: &SystemConfig) -> Self {
        let default_increment = if config.default_increment_v == 0.0 {
            DEFAULT_INCREMENT_V
        } else {
            config.default_increment_v
        };
        Self {
            link,
            flags,
            state: ActuatorState::Idle,
            max_voltage: config.max_voltage_v.abs(),
            default_increment,
            step_interval: Duration::from_millis(config.step_interval_ms),
            retry_backoff: Duration::from_millis(config.header_retry_backoff_ms),
            read_before_write: config.read_before_write,
            commanded: 0.0,
            last_voltage: 0.0,
            last_current_ua: 0.0,
        }
    }

    /// The interruption flags shared with this controller.
    pub fn flags(&self) -> Arc<RampFlags> {
        Arc::clone(&self.flags)
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Level most recently commanded to the source.
    pub fn commanded_voltage(&self) -> f64 {
        self.commanded
    }

    pub fn max_voltage(&self) -> f64 {
        self.max_voltage
    }

    // ── Measurement ───────────────────────────────────────────

    /// Query the measured output voltage (V).
    pub fn read_voltage(&mut self) -> Result<f64> {
        let mut retries = 0;
        loop {
            self.link.send(":READ?\n")?;
            let frame = self.link.read_line()?;
            match parse_field(&frame, 0) {
                Some(volts) => {
                    self.last_voltage = volts;
                    self.panel_release()?;
                    return Ok(volts);
                }
                None => {
                    warn!("header error in measurement frame: {:?}", frame.trim_end());
                    if retries >= FRAME_RETRY_LIMIT {
                        error!("measurement retries exhausted, forcing source to 0 V");
                        self.write_level(0.0)?;
                        return Ok(self.last_voltage);
                    }
                    retries += 1;
                    thread::sleep(self.retry_backoff);
                }
            }
        }
    }

    /// Query the measured output current (µA).
    pub fn read_current(&mut self) -> Result<f64> {
        let mut retries = 0;
        loop {
            // Leading newline flushes any stale partial command out of the
            // source's input parser before the query.
            self.link.send("\n")?;
            self.link.send(":READ?\n")?;
            let frame = self.link.read_line()?;
            match parse_field(&frame, 1) {
                Some(amps) => {
                    let microamps = amps * 1e6;
                    self.last_current_ua = microamps;
                    self.panel_release()?;
                    return Ok(microamps);
                }
                None => {
                    warn!("header error in measurement frame: {:?}", frame.trim_end());
                    if retries >= FRAME_RETRY_LIMIT {
                        error!("measurement retries exhausted, forcing source to 0 V");
                        self.write_level(0.0)?;
                        return Ok(self.last_current_ua);
                    }
                    retries += 1;
                    thread::sleep(self.retry_backoff);
                }
            }
        }
    }

    // ── Ramping ───────────────────────────────────────────────

    /// Step the output toward `target`, `increment` volts at a time.
    ///
    /// `None` uses the session's default increment. Refused without any
    /// hardware traffic when the target exceeds the voltage envelope or
    /// the increment is below the source resolution. A raised halt flag
    /// ends the ramp early without error; a pending emergency zero does
    /// the same so the emergency caller can take the bus.
    pub fn ramp_to(&mut self, target: f64, increment: Option<f64>) -> Result<()> {
        self.flags.clear_halt();
        let increment = increment.unwrap_or(self.default_increment);
        if target.abs() > self.max_voltage {
            return Err(SafetyViolation::VoltageLimitExceeded {
                requested: target,
                max: self.max_voltage,
            }
            .into());
        }
        if increment < MIN_INCREMENT_V {
            return Err(SafetyViolation::IncrementTooSmall {
                requested: increment,
            }
            .into());
        }

        self.state = ActuatorState::Ramping;
        let result = self.ramp_loop(target, increment);
        // Release the panel no matter how the ramp ended.
        let _ = self.panel_release();
        self.flags.clear_halt();
        self.state = ActuatorState::Idle;
        result
    }

    fn ramp_loop(&mut self, target: f64, increment: f64) -> Result<()> {
        // Evaluated once per invocation, not per step.
        let read_before_write = self.read_before_write;
        let mut last_step: Option<f64> = None;

        loop {
            if self.flags.halt_requested() {
                info!(
                    "ramp halted at {:.4} V (target was {:.4} V)",
                    self.commanded, target
                );
                return Ok(());
            }
            if self.flags.emergency_active() {
                warn!("ramp pre-empted by emergency zero");
                return Ok(());
            }

            let voltage = if read_before_write {
                self.read_voltage()?
            } else {
                match last_step {
                    Some(v) => v,
                    None => self.read_voltage()?,
                }
            };

            if (target - voltage).abs() < CONVERGENCE_FACTOR * increment {
                self.write_level(target)?;
                info!("ramp complete at {:.4} V", target);
                return Ok(());
            }

            let next = if voltage > target {
                voltage - increment
            } else {
                voltage + increment
            };
            // A drifted read must not step us outside the envelope.
            let next = next.clamp(-self.max_voltage, self.max_voltage);
            self.write_level(next)?;
            last_step = Some(next);
            thread::sleep(self.step_interval);
        }
    }

    // ── Emergency zero ────────────────────────────────────────

    /// Run the output to 0 V in the event of an emergency.
    ///
    /// Ignores the halt flag, steps at a fixed 0.1 V, and terminates only
    /// when the measured voltage is within ±1e-5 V of zero. Callers raise
    /// the emergency flag before contending for the bus token so that an
    /// in-flight ramp gets out of the way.
    pub fn run_to_zero(&mut self) -> Result<()> {
        self.state = ActuatorState::EmergencyZeroing;
        let result = self.zero_loop();
        self.state = ActuatorState::Idle;
        result
    }

    fn zero_loop(&mut self) -> Result<()> {
        thread::sleep(EMERGENCY_SETTLE);
        let mut voltage = self.read_voltage()?;
        while voltage.abs() >= EMERGENCY_EPSILON_V {
            if voltage.abs() < 1.0 {
                self.write_level(0.0)?;
            } else if voltage >= 1.0 {
                self.write_level(voltage - EMERGENCY_STEP_V)?;
                thread::sleep(EMERGENCY_STEP_INTERVAL);
            } else {
                self.write_level(voltage + EMERGENCY_STEP_V)?;
                thread::sleep(EMERGENCY_STEP_INTERVAL);
            }
            voltage = self.read_voltage()?;
        }
        self.panel_release()?;
        info!("run to 0 V complete, source output is now at 0 V");
        Ok(())
    }

    // ── Output stage ──────────────────────────────────────────

    /// Toggle the source's output stage. Independent of ramp state.
    pub fn set_output(&mut self, on: bool) -> Result<()> {
        self.link
            .send(if on { "OUTPUT ON\n" } else { "OUTPUT OFF\n" })?;
        self.panel_release()
    }

    // ── Internal ──────────────────────────────────────────────

    /// Program the output level. The envelope is checked here too so the
    /// commanded level can never exceed the maximum, whatever the caller.
    fn write_level(&mut self, volts: f64) -> Result<()> {
        if volts.abs() > self.max_voltage {
            return Err(SafetyViolation::VoltageLimitExceeded {
                requested: volts,
                max: self.max_voltage,
            }
            .into());
        }
        self.link.send(&format!(":SOUR:VOLT:LEV {volts}\n"))?;
        self.commanded = volts;
        self.panel_release()
    }

    /// Return the front panel to local control.
    fn panel_release(&mut self) -> Result<()> {
        self.link.send(":SYST:KEY 23\n")?;
        Ok(())
    }
}

/// Pull one comma-delimited field out of a measurement frame.
/// `None` for short or garbled frames — the retry path above handles it.
fn parse_field(frame: &str, index: usize) -> Option<f64> {
    frame.split(',').nth(index)?.trim().parse::<f64>().ok()
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
