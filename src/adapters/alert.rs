//! Log-based alert adapter.
//!
//! Implements [`AlertPort`] by writing every alert to the logger and
//! ringing the terminal bell. A deployment with a proper lab annunciator
//! would implement the same trait against its own hardware.

use std::io::Write;

use log::warn;

use crate::app::events::AlertEvent;
use crate::app::ports::AlertPort;

/// Adapter that logs every [`AlertEvent`] and rings the terminal bell.
pub struct LogAlert;

impl LogAlert {
    pub fn new() -> Self {
        Self
    }
}

impl AlertPort for LogAlert {
    fn alert(&mut self, event: &AlertEvent) {
        match event {
            AlertEvent::ThresholdAlarm {
                onek_pot_k,
                sorb_k,
                condense_mbar,
            } => warn!(
                "ALARM | 1K pot {onek_pot_k:.4} K | sorb {sorb_k:.4} K | \
                 condense {condense_mbar:.2} mbar"
            ),
            AlertEvent::Plateau { static_for } => warn!(
                "PLATEAU | readings static for {} min",
                static_for.as_secs() / 60
            ),
            AlertEvent::PlateauCleared { restore_v } => {
                warn!("PLATEAU | cleared, restoring {restore_v:.4} V")
            }
            AlertEvent::LimitBreached { kind, value, limit } => {
                warn!("LIMIT | {kind} at {value:.4} exceeds {limit:.4}")
            }
            AlertEvent::StalledFor { off_for } => {
                warn!("STALLED | heater off for {} s", off_for.as_secs())
            }
            AlertEvent::CommsFailure => warn!("COMMS | possible communications failure"),
        }
        // The audible part.
        print!("\x07");
        let _ = std::io::stdout().flush();
    }
}
