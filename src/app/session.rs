//! Session ownership and lifecycle.
//!
//! A [`Session`] is constructed exactly once per actuator: it takes the
//! [`Bus`] by value (there is no second owner to hand it to) and binds the
//! command port before spawning anything, so a second session on the same
//! machine fails at construction instead of fighting over the instrument.
//! This replaces any notion of process-wide "already running" flags with
//! plain ownership.
//!
//! Threads per session: the safety monitor loop, the command listener, and
//! the dispatch worker. Stall-notification hooks spawn their own
//! short-lived thread when fired. Shutdown is cooperative: `Triton_Stop`
//! (or [`Session::stop`]) flips the monitor's stop flag; once the monitor
//! thread exits, the session pokes its own listener with `QUIT` and joins
//! the rest.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};

use crate::app::bus::{Bus, SharedBus, share};
use crate::app::ports::{AlertPort, InstrumentLink, TelemetryPort};
use crate::config::SystemConfig;
use crate::error::{Result, SessionError};
use crate::heater::RampFlags;
use crate::monitor::{MonitorHandle, SafetyMonitor, StallHook};
use crate::rpc;

/// One running supervision session.
pub struct Session<L: InstrumentLink + 'static, T: TelemetryPort + 'static> {
    bus: SharedBus<L, T>,
    flags: Arc<RampFlags>,
    monitor: MonitorHandle,
    local_addr: SocketAddr,
    monitor_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
    worker_thread: Option<JoinHandle<()>>,
}

impl<L: InstrumentLink + 'static, T: TelemetryPort + 'static> Session<L, T> {
    /// Bind the command port, then spawn the monitor, listener, and worker.
    pub fn start<A: AlertPort + 'static>(
        bus: Bus<L, T>,
        config: &SystemConfig,
        alert: A,
        stall_hook: Option<StallHook>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((config.listen_addr.as_str(), config.listen_port))
            .map_err(SessionError::Bind)?;
        let local_addr = listener.local_addr().map_err(SessionError::Bind)?;

        let flags = bus.heater.flags();
        let bus = share(bus);

        let safety_monitor =
            SafetyMonitor::new(bus.clone(), Arc::clone(&flags), alert, config, stall_hook);
        let monitor = safety_monitor.handle();

        let (queue_tx, queue_rx) = mpsc::channel();

        let monitor_thread = thread::Builder::new()
            .name("monitor".into())
            .spawn(move || {
                if let Err(e) = safety_monitor.run() {
                    error!("safety monitor exited abnormally: {e}");
                }
            })
            .map_err(SessionError::Spawn)?;

        let listener_thread = {
            let flags = Arc::clone(&flags);
            thread::Builder::new()
                .name("listener".into())
                .spawn(move || rpc::listen(listener, queue_tx, flags))
                .map_err(SessionError::Spawn)?
        };

        let worker_thread = {
            let bus = bus.clone();
            let monitor = monitor.clone();
            thread::Builder::new()
                .name("worker".into())
                .spawn(move || rpc::serve(queue_rx, bus, monitor))
                .map_err(SessionError::Spawn)?
        };

        Ok(Self {
            bus,
            flags,
            monitor,
            local_addr,
            monitor_thread: Some(monitor_thread),
            listener_thread: Some(listener_thread),
            worker_thread: Some(worker_thread),
        })
    }

    /// Address the command listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The monitor's cross-thread view.
    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// The shared bus token (for direct instrument access by the owner).
    pub fn bus(&self) -> SharedBus<L, T> {
        self.bus.clone()
    }

    /// The ramp interruption flags (programmatic HALT).
    pub fn flags(&self) -> Arc<RampFlags> {
        Arc::clone(&self.flags)
    }

    /// Request cooperative session stop, without blocking.
    pub fn stop(&self) {
        self.monitor.request_stop();
    }

    /// Block until the session has stopped, then tear everything down.
    pub fn run(mut self) {
        if let Some(handle) = self.monitor_thread.take() {
            let _ = handle.join();
        }
        self.shutdown_listener();
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
        info!("session ended");
    }

    /// Poke our own listener so its accept loop can observe shutdown.
    fn shutdown_listener(&self) {
        use std::io::Write;
        match TcpStream::connect(self.local_addr) {
            Ok(mut stream) => {
                let _ = stream.write_all(b"QUIT\n");
            }
            Err(e) => warn!("listener shutdown poke failed: {e}"),
        }
    }
}
