//! Safety monitor — the top-level supervision loop.
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            │ poll cycle (holds the bus token throughout) │
//!            │                                             │
//!  telemetry │  read 1K pot / sorb / needle valve /        │
//!     ──────▶│  still / condense                           │
//!            │  read heater voltage + current              │──▶ alerts
//!            │  plateau?  → damp to 3 V, wait, restore     │
//!            │  alarm?    → warn only                      │
//!            │  limit?    → stall + emergency zero         │──▶ stall hook
//!            └─────────────────────────────────────────────┘
//! ```
//!
//! State machine: `Idle → Running` on session start; `Running → Stalled`
//! on any hard-limit breach; `Stalled → Running` only via the explicit
//! unstall command; `Running/Stalled → Stopped` via the stop command;
//! `Stopped` is terminal for the session.
//!
//! ## Fault escalation
//!
//! Every poll cycle returns a `Result`. Failures are classified by the
//! error taxonomy, counted while consecutive, and kept in a bounded
//! history for diagnostics. Too many consecutive failures means we can no
//! longer trust anything the bus tells us, so the heater is forced to zero
//! and the monitor latches into a holding pattern that only re-announces
//! the failure until the session is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{error, info, warn};

use crate::app::bus::{Bus, SharedBus, emergency_zero, lock_bus};
use crate::app::events::AlertEvent;
use crate::app::ports::{AlertPort, InstrumentLink, TelemetryPort};
use crate::config::{LimitBreach, SafetyLimits, SystemConfig};
use crate::error::{Error, Result, SessionError};
use crate::heater::RampFlags;

/// Heater level (V) the plateau handler damps down to when the present
/// voltage is at or above it. Fixed policy, not configuration.
const PLATEAU_DAMP_VOLTS: f64 = 3.0;

/// Increment (V) used by the plateau damp/restore ramps.
const PLATEAU_RAMP_INCREMENT_V: f64 = 0.1;

/// Consecutive poll-cycle failures tolerated before escalation.
const FAULT_ESCALATION_THRESHOLD: u32 = 25;

/// Bounded fault-history length kept for diagnostics.
const FAULT_HISTORY_CAP: usize = 10_000;

// ───────────────────────────────────────────────────────────────
// Monitor state
// ───────────────────────────────────────────────────────────────

/// Lifecycle state of the supervision session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Constructed, not yet polling.
    Idle,
    /// Polling and willing to act on the heater.
    Running,
    /// A hard limit tripped; heater forced to zero, actuator polling
    /// suspended until an explicit unstall.
    Stalled,
    /// Stopped by command. Terminal — a fresh session is required.
    Stopped,
}

#[derive(Debug)]
struct MonitorStatus {
    state: MonitorState,
    /// Heater voltage captured immediately before the emergency shutdown.
    preserved_voltage: Option<f64>,
    stalled_at: Option<Instant>,
}

struct MonitorShared {
    status: Mutex<MonitorStatus>,
    stop: AtomicBool,
}

/// Cross-thread view of the monitor, held by the command worker.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<MonitorShared>,
}

impl MonitorHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                status: Mutex::new(MonitorStatus {
                    state: MonitorState::Idle,
                    preserved_voltage: None,
                    stalled_at: None,
                }),
                stop: AtomicBool::new(false),
            }),
        }
    }

    fn status(&self) -> std::sync::MutexGuard<'_, MonitorStatus> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> MonitorState {
        self.status().state
    }

    pub fn is_stalled(&self) -> bool {
        self.state() == MonitorState::Stalled
    }

    /// Voltage preserved at the moment of the last stall, if any.
    pub fn preserved_voltage(&self) -> Option<f64> {
        self.status().preserved_voltage
    }

    /// How long the heater has been off for the current stall.
    pub fn stalled_for(&self) -> Option<Duration> {
        self.status().stalled_at.map(|at| at.elapsed())
    }

    /// Clear a stall: `Stalled → Running`. Any other state is left alone
    /// (the unstall command is a no-op when not stalled).
    pub fn unstall(&self) -> bool {
        let mut status = self.status();
        if status.state == MonitorState::Stalled {
            info!("stall cleared by command, monitor resumes");
            status.state = MonitorState::Running;
            status.stalled_at = None;
            true
        } else {
            false
        }
    }

    /// Request session stop. `Stopped` is terminal.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.status().state = MonitorState::Stopped;
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    fn begin_running(&self) -> std::result::Result<(), SessionError> {
        let mut status = self.status();
        if status.state != MonitorState::Idle {
            return Err(SessionError::NotIdle);
        }
        status.state = MonitorState::Running;
        Ok(())
    }

    fn set_stalled(&self, voltage: f64) {
        let mut status = self.status();
        status.state = MonitorState::Stalled;
        status.preserved_voltage = Some(voltage);
        status.stalled_at = Some(Instant::now());
    }

    fn mark_stopped(&self) {
        self.status().state = MonitorState::Stopped;
    }
}

// ───────────────────────────────────────────────────────────────
// Fault accounting
// ───────────────────────────────────────────────────────────────

/// One recorded poll-cycle failure.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub at: SystemTime,
    pub message: String,
}

/// Consecutive-failure counter plus a bounded history for diagnostics.
#[derive(Debug, Default)]
pub struct FaultLog {
    consecutive: u32,
    history: std::collections::VecDeque<FaultRecord>,
}

impl FaultLog {
    fn record_success(&mut self) {
        self.consecutive = 0;
    }

    fn record_failure(&mut self, err: &Error) -> u32 {
        self.consecutive += 1;
        if self.history.len() == FAULT_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(FaultRecord {
            at: SystemTime::now(),
            message: err.to_string(),
        });
        self.consecutive
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn history(&self) -> impl Iterator<Item = &FaultRecord> {
        self.history.iter()
    }
}

// ───────────────────────────────────────────────────────────────
// Stall notification hook
// ───────────────────────────────────────────────────────────────

/// What the stall hook is told about the breach.
#[derive(Debug, Clone, Copy)]
pub struct StallReport {
    pub breach: LimitBreach,
    /// Heater voltage preserved just before the shutdown.
    pub preserved_voltage: f64,
}

/// Optional callback run on its own thread (never holding the bus token)
/// when the monitor stalls. Extra arguments travel in the closure.
pub type StallHook = Arc<dyn Fn(StallReport) + Send + Sync>;

// ───────────────────────────────────────────────────────────────
// SafetyMonitor
// ───────────────────────────────────────────────────────────────

/// The supervision loop. Owns the alert sink; shares the bus and the
/// interruption flags with the command dispatcher.
pub struct SafetyMonitor<L: InstrumentLink, T: TelemetryPort, A: AlertPort> {
    bus: SharedBus<L, T>,
    flags: Arc<RampFlags>,
    alert: A,
    limits: SafetyLimits,
    handle: MonitorHandle,
    faults: FaultLog,
    stall_hook: Option<StallHook>,
    comms_failed: bool,

    poll_interval: Duration,
    staleness_window: Duration,
    plateau_recheck: Duration,
    plateau_resume_delay: Duration,
    holding_interval: Duration,
}

impl<L, T, A> SafetyMonitor<L, T, A>
where
    L: InstrumentLink,
    T: TelemetryPort,
    A: AlertPort,
{
    pub fn new(
        bus: SharedBus<L, T>,
        flags: Arc<RampFlags>,
        alert: A,
        config: &SystemConfig,
        stall_hook: Option<StallHook>,
    ) -> Self {
        Self {
            bus,
            flags,
            alert,
            limits: config.limits,
            handle: MonitorHandle::new(),
            faults: FaultLog::default(),
            stall_hook,
            comms_failed: false,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            staleness_window: Duration::from_secs(config.staleness_window_secs),
            plateau_recheck: Duration::from_secs(config.plateau_recheck_secs),
            plateau_resume_delay: Duration::from_secs(config.plateau_resume_delay_secs),
            holding_interval: Duration::from_secs(config.holding_interval_secs),
        }
    }

    /// Cross-thread view for the command worker.
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.faults.consecutive()
    }

    /// True once the monitor has latched into the communications-failure
    /// holding pattern.
    pub fn comms_failed(&self) -> bool {
        self.comms_failed
    }

    /// Mark the session live: `Idle → Running`. Refused from any other
    /// state — a stopped session cannot be revived.
    pub fn activate(&mut self) -> Result<()> {
        self.handle.begin_running()?;
        Ok(())
    }

    /// Run until stopped. Consumes the monitor; keep a [`handle`] first.
    pub fn run(mut self) -> Result<()> {
        self.activate()?;
        info!("safety monitor running");
        while !self.handle.stop_requested() {
            self.step();
            let interval = if self.comms_failed {
                self.holding_interval
            } else {
                self.poll_interval
            };
            thread::sleep(interval);
        }
        self.handle.mark_stopped();
        info!("safety monitor stopped");
        Ok(())
    }

    /// One supervision step: either a full poll cycle, or — after
    /// escalation — a re-announcement of the communications failure.
    pub fn step(&mut self) {
        if self.comms_failed {
            warn!("possible communications failure: impedance heater forced off");
            self.alert.alert(&AlertEvent::CommsFailure);
            return;
        }
        match self.poll_cycle() {
            Ok(()) => self.faults.record_success(),
            Err(e) => {
                let n = self.faults.record_failure(&e);
                error!("poll cycle failed ({n} consecutive): {e}");
                if n > FAULT_ESCALATION_THRESHOLD {
                    self.escalate();
                }
            }
        }
    }

    // ── The poll cycle ────────────────────────────────────────

    /// One full poll cycle under the bus token.
    fn poll_cycle(&mut self) -> Result<()> {
        // Keep the guard's borrow on a local clone of the Arc so `self`
        // stays free for the handler methods below.
        let token = Arc::clone(&self.bus);
        let mut bus = lock_bus(&token);

        let onek_pot = bus.telemetry.onek_pot_temp()?;
        let sorb = bus.telemetry.sorb_temp()?;
        let needle_valve = bus.telemetry.needle_valve_temp()?;
        let still = bus.telemetry.still_pressure()?;
        let condense = bus.telemetry.condense_pressure()?;
        info!(
            "1K pot {onek_pot:.4} K | sorb {sorb:.4} K | needle valve {needle_valve:.4} K | \
             still {still:.4} mbar"
        );

        if self.handle.is_stalled() {
            // No actuator traffic while stalled — just re-announce.
            let off_for = self.handle.stalled_for().unwrap_or_default();
            warn!(
                "impedance heater has been off for {} s, unstall to resume",
                off_for.as_secs()
            );
            self.alert.alert(&AlertEvent::StalledFor { off_for });
            return Ok(());
        }

        let voltage = bus.heater.read_voltage()?;
        let current = bus.heater.read_current()?;
        info!("heater {voltage:.4} V / {current:.3} uA");

        self.plateau_check(&mut bus, voltage)?;

        if self.limits.alarm_crossed(onek_pot, sorb, condense) {
            warn!(
                "alarm threshold crossed: 1K pot {onek_pot:.4} K, sorb {sorb:.4} K, \
                 condense {condense:.2} mbar"
            );
            self.alert.alert(&AlertEvent::ThresholdAlarm {
                onek_pot_k: onek_pot,
                sorb_k: sorb,
                condense_mbar: condense,
            });
        }

        if let Some(breach) = self.limits.breached(onek_pot, sorb, needle_valve, still) {
            self.trip_stall(&mut bus, breach, voltage)?;
        }

        Ok(())
    }

    /// Plateau handling: static telemetry is a softer fault than an
    /// over-limit reading — damp the heater instead of killing it, and
    /// restore once the readings move again.
    fn plateau_check(&mut self, bus: &mut Bus<L, T>, voltage: f64) -> Result<()> {
        if !bus.telemetry.readings_static() {
            return Ok(());
        }

        let cached_voltage = voltage;
        let mut static_for = self.staleness_window;
        warn!(
            "telemetry has not changed in the last {} minutes",
            static_for.as_secs() / 60
        );
        self.alert.alert(&AlertEvent::Plateau { static_for });

        if voltage >= PLATEAU_DAMP_VOLTS {
            info!("reducing heater voltage to {PLATEAU_DAMP_VOLTS} V");
            bus.heater
                .ramp_to(PLATEAU_DAMP_VOLTS, Some(PLATEAU_RAMP_INCREMENT_V))?;
        }

        while bus.telemetry.readings_static() && !self.handle.stop_requested() {
            thread::sleep(self.plateau_recheck);
            static_for += self.plateau_recheck;
            warn!(
                "telemetry has not changed in the last {} minutes",
                static_for.as_secs() / 60
            );
            self.alert.alert(&AlertEvent::Plateau { static_for });
        }

        if !self.handle.stop_requested() {
            thread::sleep(self.plateau_resume_delay);
            info!("telemetry is changing again, restoring heater voltage to {cached_voltage} V");
            self.alert.alert(&AlertEvent::PlateauCleared {
                restore_v: cached_voltage,
            });
            bus.heater
                .ramp_to(cached_voltage, Some(PLATEAU_RAMP_INCREMENT_V))?;
        }
        Ok(())
    }

    /// Hard-limit breach: stall exactly once per episode, preserve the
    /// heater voltage, force the source to zero, notify.
    fn trip_stall(&mut self, bus: &mut Bus<L, T>, breach: LimitBreach, voltage: f64) -> Result<()> {
        self.handle.set_stalled(voltage);
        error!(
            "{} exceeded its limit: {:.4} > {:.4}",
            breach.kind, breach.value, breach.limit
        );
        error!("beginning emergency shut down of the impedance heater");
        self.alert.alert(&AlertEvent::LimitBreached {
            kind: breach.kind,
            value: breach.value,
            limit: breach.limit,
        });

        // We already hold the token; the flag still fences off any ramp
        // that might queue behind us.
        self.flags.begin_emergency();
        let result = bus.heater.run_to_zero();
        self.flags.end_emergency();
        result?;

        if let Some(hook) = &self.stall_hook {
            let hook = Arc::clone(hook);
            let report = StallReport {
                breach,
                preserved_voltage: voltage,
            };
            // The hook runs on its own thread and never holds the token.
            thread::spawn(move || hook(report));
        }
        Ok(())
    }

    // ── Escalation ────────────────────────────────────────────

    /// Too many consecutive failures: the bus can no longer be trusted.
    /// Force the heater to zero and latch the holding pattern.
    fn escalate(&mut self) {
        error!(
            "{} consecutive poll failures: forcing impedance heater off",
            self.faults.consecutive()
        );
        if let Err(e) = emergency_zero(&self.bus, &self.flags) {
            error!("emergency zero during communications failure also failed: {e}");
        }
        self.comms_failed = true;
        self.alert.alert(&AlertEvent::CommsFailure);
    }
}
