//! The shared instrument bus and its exclusivity token.
//!
//! The voltage source and the telemetry client are the only shared mutable
//! resources in a session, and the wire protocols on both sides cannot
//! tolerate interleaved request/response frames from two logical callers.
//! Both therefore live behind **one** mutex per actuator:
//!
//! ```text
//!   monitor poll cycle ──┐
//!                        ├──▶ Mutex<Bus> ──▶ heater + telemetry
//!   dispatcher worker  ──┘
//! ```
//!
//! The token is held for the whole of a logical operation — a full poll
//! cycle, or one dispatched command — never released mid-operation.
//! Acquisition order across holders is whatever the mutex gives us; at
//! this traffic volume fairness is not a concern.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::app::ports::{InstrumentLink, TelemetryPort};
use crate::error::Result;
use crate::heater::{HeaterSource, RampFlags};

/// Everything that talks on the shared instrument bus.
pub struct Bus<L: InstrumentLink, T: TelemetryPort> {
    pub heater: HeaterSource<L>,
    pub telemetry: T,
}

/// The per-actuator exclusivity token.
pub type SharedBus<L, T> = Arc<Mutex<Bus<L, T>>>;

/// Wrap a bus in its exclusivity token.
pub fn share<L: InstrumentLink, T: TelemetryPort>(bus: Bus<L, T>) -> SharedBus<L, T> {
    Arc::new(Mutex::new(bus))
}

/// Acquire the token. A panicked peer thread must not take the watchdog
/// down with it, so a poisoned lock is recovered rather than propagated.
pub fn lock_bus<L: InstrumentLink, T: TelemetryPort>(
    bus: &SharedBus<L, T>,
) -> MutexGuard<'_, Bus<L, T>> {
    bus.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Emergency-zero the heater from outside the token.
///
/// Raises the emergency flag *before* contending for the token, so an
/// in-flight ramp aborts at its next step and new ramps are refused until
/// the run to zero completes.
pub fn emergency_zero<L: InstrumentLink, T: TelemetryPort>(
    bus: &SharedBus<L, T>,
    flags: &RampFlags,
) -> Result<()> {
    flags.begin_emergency();
    let result = lock_bus(bus).heater.run_to_zero();
    flags.end_emergency();
    result
}
