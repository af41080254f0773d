//! End-to-end command protocol tests: real TCP sockets, mock instruments.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cryoguard::app::bus::Bus;
use cryoguard::app::session::Session;
use cryoguard::config::SystemConfig;
use cryoguard::heater::{HeaterSource, RampFlags};
use cryoguard::monitor::MonitorState;

use crate::mock_hw::{AlertLog, LinkState, MockLink, MockTelemetry, RecordingAlert, TelemetryState};

fn test_config() -> SystemConfig {
    SystemConfig {
        max_voltage_v: 10.0,
        step_interval_ms: 0,
        header_retry_backoff_ms: 0,
        listen_port: 0, // ephemeral
        poll_interval_ms: 10,
        plateau_recheck_secs: 0,
        plateau_resume_delay_secs: 0,
        holding_interval_secs: 0,
        ..SystemConfig::default()
    }
}

struct Rig {
    session: Session<MockLink, MockTelemetry>,
    link: LinkState,
    telemetry: TelemetryState,
}

fn start_session() -> Rig {
    let config = test_config();
    let link = LinkState::default();
    let telemetry = TelemetryState::default();

    let flags = RampFlags::new();
    let heater = HeaterSource::new(MockLink::new(link.clone()), Arc::clone(&flags), &config);
    let bus = Bus {
        heater,
        telemetry: MockTelemetry::new(telemetry.clone()),
    };

    let session = Session::start(
        bus,
        &config,
        RecordingAlert::new(AlertLog::default()),
        None,
    )
    .unwrap();

    Rig {
        session,
        link,
        telemetry,
    }
}

/// One protocol round trip: connect, send a line, read the reply to EOF.
fn send_line(addr: SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(format!("{line}\n").as_bytes()).unwrap();
    let mut reply = String::new();
    let _ = stream.read_to_string(&mut reply);
    reply
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn set_heater_voltage_replies_done_after_convergence() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    let reply = send_line(addr, "Set_Heater_Voltage 3.0 0.1");
    assert_eq!(reply, "Done\n");
    // Done means converged: the simulated source is already at the target.
    assert!((rig.link.voltage() - 3.0).abs() < 0.11);

    let reply = send_line(addr, "Read_Heater_Voltage");
    let volts: f64 = reply.trim().parse().unwrap();
    assert!((volts - 3.0).abs() < 0.11);

    rig.session.stop();
}

#[test]
fn over_limit_target_gets_error_reply() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    let reply = send_line(addr, "Set_Heater_Voltage 50.0 0.1");
    assert!(reply.starts_with("Error:"), "unexpected reply {reply:?}");
    // And the source was left untouched.
    assert_eq!(rig.link.voltage(), 0.0);

    rig.session.stop();
}

#[test]
fn protocol_error_replies() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    assert_eq!(send_line(addr, "Do_Something_Else 1 2"), "Invalid Command\n");
    assert_eq!(
        send_line(addr, "Set_Heater_Voltage nope 0.1"),
        "Invalid Argument\n"
    );
    assert_eq!(send_line(addr, "Set_Heater_Voltage 3.0"), "Invalid Argument\n");

    rig.session.stop();
}

#[test]
fn telemetry_read_commands_reply_with_values() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    let onek: f64 = send_line(addr, "Read_1K_Pot_Temperature")
        .trim()
        .parse()
        .unwrap();
    assert!((onek - 1.5).abs() < 1e-9);

    let mix: f64 = send_line(addr, "Read_Mixing_Chamber_Temperature")
        .trim()
        .parse()
        .unwrap();
    assert!((mix - 0.01).abs() < 1e-9);

    let current: f64 = send_line(addr, "Read_Heater_Current")
        .trim()
        .parse()
        .unwrap();
    assert!((current - 1.5).abs() < 1e-9); // 1.5e-6 A reported in uA

    rig.session.stop();
}

#[test]
fn halt_control_line_is_acknowledged() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    assert_eq!(send_line(addr, "HALT"), "OK\n");

    rig.session.stop();
}

#[test]
fn stall_and_unstall_through_the_protocol() {
    let rig = start_session();
    let addr = rig.session.local_addr();

    assert_eq!(send_line(addr, "Triton_Stall_Status"), "NOT_STALLED\n");

    // Push the sorb over its hard limit and let the monitor catch it.
    rig.link.set_voltage(2.0);
    rig.telemetry.set_sorb(2.5);
    let monitor = rig.session.monitor().clone();
    assert!(wait_until(Duration::from_secs(5), || monitor.is_stalled()));

    assert_eq!(send_line(addr, "Triton_Stall_Status"), "STALLED\n");
    // The stall latches before the run to zero finishes; wait it out.
    assert!(wait_until(Duration::from_secs(5), || {
        rig.link.voltage().abs() < 1e-5
    }));
    assert_eq!(monitor.preserved_voltage(), Some(2.0));

    // Cool down, then unstall remotely.
    rig.telemetry.set_sorb(1.5);
    assert_eq!(send_line(addr, "Unstall_Triton_Loop"), "Done\n");
    assert_eq!(send_line(addr, "Triton_Stall_Status"), "NOT_STALLED\n");

    rig.session.stop();
}

#[test]
fn triton_stop_ends_the_session() {
    let rig = start_session();
    let addr = rig.session.local_addr();
    let monitor = rig.session.monitor().clone();

    assert_eq!(send_line(addr, "Triton_Stop"), "Done\n");
    assert!(wait_until(Duration::from_secs(5), || {
        monitor.state() == MonitorState::Stopped
    }));

    // run() must now tear everything down promptly.
    let done = std::thread::spawn(move || rig.session.run());
    let joined = wait_until(Duration::from_secs(5), || done.is_finished());
    assert!(joined, "session.run() did not return after Triton_Stop");
}
