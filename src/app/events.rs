//! Outbound alert events.
//!
//! The safety monitor emits these through the
//! [`AlertPort`](super::ports::AlertPort). Adapters on the other side
//! decide what to do with them — ring the lab beeper, flash a panel,
//! write a status line.

use std::time::Duration;

use crate::error::LimitKind;

/// Structured events emitted by the safety monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertEvent {
    /// An alarm threshold was crossed. Warning only — nothing stops.
    ThresholdAlarm {
        onek_pot_k: f64,
        sorb_k: f64,
        condense_mbar: f64,
    },

    /// Telemetry has been static past the staleness window.
    Plateau { static_for: Duration },

    /// The plateau cleared; the heater voltage is being restored.
    PlateauCleared { restore_v: f64 },

    /// A hard limit was breached; emergency shutdown follows.
    LimitBreached {
        kind: LimitKind,
        value: f64,
        limit: f64,
    },

    /// Periodic re-announcement while stalled.
    StalledFor { off_for: Duration },

    /// Consecutive poll failures exceeded the escalation threshold; the
    /// heater has been forced to zero and polling is suspended.
    CommsFailure,
}
