//! Command listener and dispatch worker.
//!
//! One line in, one line out, then the connection closes:
//!
//! ```text
//!   client ──▶ listener ──▶ queue ──▶ worker ──▶ bus token ──▶ reply
//! ```
//!
//! The listener accepts connections sequentially and reads exactly one
//! request line each. Control lines (`QUIT`, `HALT`) are handled in place —
//! HALT in particular must never queue behind the ramp it is trying to
//! abort. Everything else is parsed into a typed [`Command`]; parse errors
//! are answered immediately, valid commands are queued for the worker.
//!
//! The worker drains the queue one request at a time and takes the same
//! bus token the safety monitor uses, so dispatched commands and poll
//! cycles never interleave their instrument traffic. Commands that touch
//! only the monitor (`Triton_Stop`, `Triton_Stall_Status`) skip the token:
//! stop must remain deliverable while the monitor holds the bus through a
//! plateau wait.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use log::{info, warn};

use crate::app::bus::{SharedBus, lock_bus};
use crate::app::ports::{InstrumentLink, TelemetryPort};
use crate::error::Result;
use crate::heater::RampFlags;
use crate::monitor::MonitorHandle;
use crate::rpc::command::Command;

/// Longest request line we will read off a connection.
const MAX_REQUEST_BYTES: usize = 1024;

/// A parsed request paired with its reply channel. Consumed exactly once
/// by the worker; dropping it closes the connection.
pub struct PendingCommand {
    pub command: Command,
    pub stream: TcpStream,
}

// ───────────────────────────────────────────────────────────────
// Listener
// ───────────────────────────────────────────────────────────────

/// Accept loop. Runs until a `QUIT` line arrives or the queue receiver is
/// gone. Dropping the queue sender on exit shuts the worker down.
pub fn listen(listener: TcpListener, queue: Sender<PendingCommand>, flags: Arc<RampFlags>) {
    info!(
        "command listener on {}",
        listener
            .local_addr()
            .map_or_else(|_| "<unknown>".into(), |a| a.to_string())
    );
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let line = match read_request_line(&mut stream) {
            Ok(line) => line,
            Err(e) => {
                warn!("request read failed: {e}");
                continue;
            }
        };
        let line = line.trim();

        match line {
            "QUIT" => {
                let _ = stream.write_all(b"OK\n");
                info!("QUIT received, listener shutting down");
                return;
            }
            "HALT" => {
                let _ = stream.write_all(b"OK\n");
                info!("HALT received, aborting any ramp in flight");
                flags.request_halt();
            }
            _ => match Command::parse(line) {
                Ok(command) => {
                    if queue.send(PendingCommand { command, stream }).is_err() {
                        // Worker is gone; nothing left to dispatch to.
                        return;
                    }
                }
                Err(e) => {
                    warn!("rejected request {line:?}: {e}");
                    let _ = stream.write_all(format!("{}\n", e.reply()).as_bytes());
                }
            },
        }
    }
}

/// Read one request line (up to `\n` or EOF), bounded.
fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    while buf.len() < MAX_REQUEST_BYTES {
        match stream.read(&mut byte)? {
            0 => break,
            _ => {
                if byte[0] == b'\n' {
                    break;
                }
                buf.push(byte[0]);
            }
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ───────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────

/// Dispatch loop. Exits when the listener drops the queue sender.
pub fn serve<L: InstrumentLink, T: TelemetryPort>(
    queue: Receiver<PendingCommand>,
    bus: SharedBus<L, T>,
    monitor: MonitorHandle,
) {
    while let Ok(PendingCommand {
        command,
        mut stream,
    }) = queue.recv()
    {
        info!("running command: {command:?}");
        let reply = match execute(command, &bus, &monitor) {
            Ok(reply) => format!("{reply}\n"),
            Err(e) => format!("Error: {e}\n"),
        };
        if let Err(e) = stream.write_all(reply.as_bytes()) {
            warn!("reply write failed: {e}");
        }
        info!("command complete");
        // stream drops here, closing the connection.
    }
    info!("command worker shutting down");
}

/// Execute one command. Instrument-touching commands hold the bus token
/// for their whole duration; monitor-only commands do not need it.
fn execute<L: InstrumentLink, T: TelemetryPort>(
    command: Command,
    bus: &SharedBus<L, T>,
    monitor: &MonitorHandle,
) -> Result<String> {
    match command {
        Command::Stop => {
            monitor.request_stop();
            Ok("Done".into())
        }
        Command::StallStatus => Ok(if monitor.is_stalled() {
            "STALLED"
        } else {
            "NOT_STALLED"
        }
        .into()),

        Command::SetHeaterVoltage { volts, increment } => {
            let mut bus = lock_bus(bus);
            bus.heater.set_output(true)?;
            bus.heater.ramp_to(volts, Some(increment))?;
            Ok("Done".into())
        }
        Command::ReadHeaterVoltage => {
            let mut bus = lock_bus(bus);
            bus.heater.set_output(true)?;
            Ok(bus.heater.read_voltage()?.to_string())
        }
        Command::ReadHeaterCurrent => {
            let mut bus = lock_bus(bus);
            bus.heater.set_output(true)?;
            Ok(bus.heater.read_current()?.to_string())
        }
        Command::UnstallLoop => {
            let mut bus = lock_bus(bus);
            bus.heater.set_output(true)?;
            monitor.unstall();
            Ok("Done".into())
        }

        Command::ReadOnekPotTemperature => {
            Ok(lock_bus(bus).telemetry.onek_pot_temp()?.to_string())
        }
        Command::ReadSorbTemperature => Ok(lock_bus(bus).telemetry.sorb_temp()?.to_string()),
        Command::ReadNeedleValveTemperature => {
            Ok(lock_bus(bus).telemetry.needle_valve_temp()?.to_string())
        }
        Command::ReadStillPressure => Ok(lock_bus(bus).telemetry.still_pressure()?.to_string()),
        Command::ReadMixChamberTemperature => {
            Ok(lock_bus(bus).telemetry.mix_chamber_temp()?.to_string())
        }
        Command::ReadStmRxTemperature => Ok(lock_bus(bus).telemetry.stm_rx_temp()?.to_string()),
        Command::ReadStmCxTemperature => Ok(lock_bus(bus).telemetry.stm_cx_temp()?.to_string()),
    }
}
