//! Safety monitor behavior against mock hardware.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use cryoguard::app::bus::{Bus, SharedBus, lock_bus, share};
use cryoguard::app::events::AlertEvent;
use cryoguard::config::SystemConfig;
use cryoguard::heater::{HeaterSource, RampFlags};
use cryoguard::monitor::{MonitorState, SafetyMonitor, StallHook};

use crate::mock_hw::{
    AlertLog, LinkState, MockLink, MockTelemetry, Readings, RecordingAlert, TelemetryState,
    counting_hook,
};

fn test_config() -> SystemConfig {
    SystemConfig {
        max_voltage_v: 10.0,
        step_interval_ms: 0,
        header_retry_backoff_ms: 0,
        poll_interval_ms: 1,
        plateau_recheck_secs: 0,
        plateau_resume_delay_secs: 0,
        holding_interval_secs: 0,
        ..SystemConfig::default()
    }
}

struct Rig {
    monitor: SafetyMonitor<MockLink, MockTelemetry, RecordingAlert>,
    bus: SharedBus<MockLink, MockTelemetry>,
    link: LinkState,
    telemetry: TelemetryState,
    alerts: AlertLog,
}

fn build_rig(stall_hook: Option<StallHook>) -> Rig {
    let config = test_config();
    let link = LinkState::default();
    let telemetry = TelemetryState::default();
    let alerts = AlertLog::default();

    let flags = RampFlags::new();
    let heater = HeaterSource::new(MockLink::new(link.clone()), Arc::clone(&flags), &config);
    let bus = share(Bus {
        heater,
        telemetry: MockTelemetry::new(telemetry.clone()),
    });

    let mut monitor = SafetyMonitor::new(
        bus.clone(),
        flags,
        RecordingAlert::new(alerts.clone()),
        &config,
        stall_hook,
    );
    monitor.activate().unwrap();

    Rig {
        monitor,
        bus,
        link,
        telemetry,
        alerts,
    }
}

fn commanded(bus: &SharedBus<MockLink, MockTelemetry>) -> f64 {
    lock_bus(bus).heater.commanded_voltage()
}

#[test]
fn alarm_fires_but_monitor_keeps_running() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(5.0);
    // Sorb at 1.9 K: above the 1.8 K alarm, below the 2 K limit.
    rig.telemetry.set_sorb(1.9);

    rig.monitor.step();

    assert_eq!(rig.monitor.handle().state(), MonitorState::Running);
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::ThresholdAlarm { .. })),
        1
    );
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::LimitBreached { .. })),
        0
    );
    // The heater was left alone.
    assert_eq!(rig.link.voltage(), 5.0);
}

#[test]
fn limit_breach_stalls_preserves_and_zeroes() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(5.0);
    rig.telemetry.set_sorb(2.1);

    rig.monitor.step();

    let handle = rig.monitor.handle();
    assert_eq!(handle.state(), MonitorState::Stalled);
    assert_eq!(handle.preserved_voltage(), Some(5.0));
    assert!(rig.link.voltage().abs() < 1e-5);
    assert_eq!(commanded(&rig.bus), 0.0);
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::LimitBreached { .. })),
        1
    );
}

#[test]
fn stall_trips_only_once_per_breach_episode() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(2.0);
    rig.telemetry.set_sorb(2.5);

    rig.monitor.step();
    rig.monitor.step();
    rig.monitor.step();

    // One breach alert for the episode; later cycles just re-announce.
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::LimitBreached { .. })),
        1
    );
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::StalledFor { .. })),
        2
    );
    assert_eq!(rig.monitor.handle().state(), MonitorState::Stalled);
}

#[test]
fn stall_hook_runs_exactly_once() {
    let (hook, counter) = counting_hook();
    let mut rig = build_rig(Some(hook));
    rig.link.set_voltage(1.0);
    rig.telemetry.set_sorb(3.0);

    rig.monitor.step();

    // The hook runs on its own thread; give it a moment.
    let deadline = Instant::now() + Duration::from_secs(2);
    while counter.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    rig.monitor.step();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn unstall_restores_running_state() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(4.0);
    rig.telemetry.set_sorb(2.5);
    rig.monitor.step();
    assert_eq!(rig.monitor.handle().state(), MonitorState::Stalled);

    rig.telemetry.set_sorb(1.5);
    assert!(rig.monitor.handle().unstall());
    assert_eq!(rig.monitor.handle().state(), MonitorState::Running);

    // Polling resumes without re-stalling.
    rig.monitor.step();
    assert_eq!(rig.monitor.handle().state(), MonitorState::Running);
}

#[test]
fn unstall_is_a_noop_when_not_stalled() {
    let rig = build_rig(None);
    let handle = rig.monitor.handle();
    assert!(!handle.unstall());
    assert_eq!(handle.state(), MonitorState::Running);
}

#[test]
fn consecutive_failures_escalate_to_holding_pattern() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(0.0);
    rig.telemetry.set_fail_reads(true);

    for _ in 0..25 {
        rig.monitor.step();
    }
    assert!(!rig.monitor.comms_failed());
    assert_eq!(rig.monitor.consecutive_faults(), 25);

    // The 26th failure is a different fault type; the counter must keep
    // counting and trip the escalation regardless.
    rig.telemetry.set_fail_kind_io(true);
    rig.monitor.step();

    assert!(rig.monitor.comms_failed());
    assert_eq!(commanded(&rig.bus), 0.0);
    assert_eq!(rig.alerts.count(|e| matches!(e, AlertEvent::CommsFailure)), 1);
}

#[test]
fn holding_pattern_stops_polling_telemetry() {
    let mut rig = build_rig(None);
    rig.telemetry.set_fail_reads(true);
    for _ in 0..26 {
        rig.monitor.step();
    }
    assert!(rig.monitor.comms_failed());

    rig.telemetry.set_fail_reads(false);
    let reads_before = rig.telemetry.monitored_reads();
    rig.monitor.step();
    rig.monitor.step();

    // Only re-announcements; no telemetry traffic, no recovery.
    assert_eq!(rig.telemetry.monitored_reads(), reads_before);
    assert!(rig.alerts.count(|e| matches!(e, AlertEvent::CommsFailure)) >= 3);
}

#[test]
fn one_good_cycle_resets_the_fault_counter() {
    let mut rig = build_rig(None);
    rig.telemetry.set_fail_reads(true);
    for _ in 0..10 {
        rig.monitor.step();
    }
    assert_eq!(rig.monitor.consecutive_faults(), 10);

    rig.telemetry.set_fail_reads(false);
    rig.monitor.step();
    assert_eq!(rig.monitor.consecutive_faults(), 0);
    assert!(!rig.monitor.comms_failed());
}

#[test]
fn plateau_damps_to_three_volts_then_restores() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(5.0);
    rig.telemetry.set_static_cycles(3);

    rig.monitor.step();

    assert!(rig.alerts.count(|e| matches!(e, AlertEvent::Plateau { .. })) >= 2);
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::PlateauCleared { restore_v } if *restore_v == 5.0)),
        1
    );
    // Damped to 3 V during the plateau, restored to 5 V after it cleared.
    assert_eq!(rig.link.voltage(), 5.0);
    assert_eq!(rig.monitor.handle().state(), MonitorState::Running);
}

#[test]
fn plateau_below_damp_threshold_leaves_voltage_alone() {
    let mut rig = build_rig(None);
    rig.link.set_voltage(1.0);
    rig.telemetry.set_static_cycles(2);

    rig.monitor.step();

    assert_eq!(rig.link.voltage(), 1.0);
    assert_eq!(
        rig.alerts
            .count(|e| matches!(e, AlertEvent::PlateauCleared { .. })),
        1
    );
}

// ── Property tests ────────────────────────────────────────────

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Whatever the fridge reports, the monitor stays in a valid state
        /// and a stalled monitor always means a zeroed heater.
        #[test]
        fn state_machine_never_leaves_valid_states(
            readings in proptest::collection::vec(
                (0.0f64..4.0, 0.0f64..4.0, 0.0f64..15.0, 0.0f64..2.0),
                1..20,
            ),
        ) {
            let mut rig = build_rig(None);
            for (onek, sorb, needle, still) in readings {
                rig.telemetry.set_readings(Readings {
                    onek_pot_k: onek,
                    sorb_k: sorb,
                    needle_valve_k: needle,
                    still_mbar: still,
                    ..Readings::default()
                });
                rig.monitor.step();

                let state = rig.monitor.handle().state();
                prop_assert!(
                    state == MonitorState::Running || state == MonitorState::Stalled,
                    "unexpected state {state:?}"
                );
                if state == MonitorState::Stalled {
                    prop_assert_eq!(commanded(&rig.bus), 0.0);
                    prop_assert!(rig.monitor.handle().preserved_voltage().is_some());
                }
            }
        }
    }
}
