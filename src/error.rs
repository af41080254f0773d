//! Unified error types for the cryoguard daemon.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! top-level poll loop's fault accounting uniform. The variants mirror the
//! fault taxonomy the system is designed around:
//!
//! - **Link** — the physical instrument link failed at the I/O level.
//!   Never retried where it occurs; the caller governs retry policy.
//! - **Telemetry** — the temperature/pressure source could not be read.
//! - **Safety** — a requested actuator operation was refused because it
//!   would violate a hard envelope. Not an I/O failure.
//! - **Command** — a remote command line could not be understood. Reported
//!   back to the caller as a textual reply, never fatal.
//! - **Session** — session construction/ownership failed.
//!
//! Limit breaches (`LimitKind`) are deliberately *not* errors: crossing a
//! hard limit is a designed state transition of the safety monitor.

use std::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level daemon error
// ---------------------------------------------------------------------------

/// Every fallible operation in the daemon funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// The instrument link failed at the I/O level.
    Link(LinkError),
    /// The telemetry source could not be read.
    Telemetry(TelemetryError),
    /// A requested operation was refused by a safety check.
    Safety(SafetyViolation),
    /// A remote command could not be parsed or validated.
    Command(CommandError),
    /// Session construction or lifecycle failure.
    Session(SessionError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Telemetry(e) => write!(f, "telemetry: {e}"),
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Instrument link errors
// ---------------------------------------------------------------------------

/// I/O-level failures on the serial link to the voltage source.
///
/// Malformed measurement frames are *not* a `LinkError` — they surface as
/// parse failures inside the heater controller and are retried there.
#[derive(Debug)]
pub enum LinkError {
    /// Read or write on the open link failed.
    Io(io::Error),
    /// The link device could not be opened or configured.
    Device(String),
    /// The peer closed the link.
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O failed: {e}"),
            Self::Device(msg) => write!(f, "device unavailable: {msg}"),
            Self::Closed => write!(f, "link closed by peer"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Telemetry errors
// ---------------------------------------------------------------------------

/// Failures while querying the cryostat telemetry source.
#[derive(Debug)]
pub enum TelemetryError {
    /// The telemetry connection failed.
    Io(io::Error),
    /// The reply did not contain a parseable value.
    Malformed(String),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "query failed: {e}"),
            Self::Malformed(reply) => write!(f, "unparseable reply: {reply:?}"),
        }
    }
}

impl std::error::Error for TelemetryError {}

impl From<io::Error> for TelemetryError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<TelemetryError> for Error {
    fn from(e: TelemetryError) -> Self {
        Self::Telemetry(e)
    }
}

// ---------------------------------------------------------------------------
// Safety violations
// ---------------------------------------------------------------------------

/// An actuator request refused before any hardware traffic.
///
/// These are rejections, not faults: the commanded voltage is left exactly
/// as it was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyViolation {
    /// `|target|` exceeds the configured maximum source voltage.
    VoltageLimitExceeded { requested: f64, max: f64 },
    /// Ramp increment is below the source's resolution floor.
    IncrementTooSmall { requested: f64 },
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoltageLimitExceeded { requested, max } => {
                write!(f, "refusing {requested} V, maximum allowed is {max} V")
            }
            Self::IncrementTooSmall { requested } => {
                write!(f, "increment {requested} V is below the source resolution")
            }
        }
    }
}

impl From<SafetyViolation> for Error {
    fn from(e: SafetyViolation) -> Self {
        Self::Safety(e)
    }
}

// ---------------------------------------------------------------------------
// Hard-limit kinds
// ---------------------------------------------------------------------------

/// The monitored quantities that carry a hard shutdown limit.
///
/// Crossing one of these trips the stall transition and the emergency zero.
/// It is an intended control-flow path, so there is no `Error` variant for
/// it — the monitor handles it as state, not as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    OnekPotTemperature,
    SorbTemperature,
    NeedleValveTemperature,
    StillPressure,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnekPotTemperature => write!(f, "1K pot temperature"),
            Self::SorbTemperature => write!(f, "sorb temperature"),
            Self::NeedleValveTemperature => write!(f, "needle valve temperature"),
            Self::StillPressure => write!(f, "still pressure"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command protocol errors
// ---------------------------------------------------------------------------

/// A remote command line that could not be turned into a typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The line contained no command name at all.
    Empty,
    /// The command name is not in the dispatch table.
    Unknown(String),
    /// A required numeric argument was missing.
    MissingArgument(&'static str),
    /// A numeric argument failed to parse.
    BadArgument(String),
}

impl CommandError {
    /// The single-line textual reply sent back to the remote caller.
    pub fn reply(&self) -> &'static str {
        match self {
            Self::Empty | Self::Unknown(_) => "Invalid Command",
            Self::MissingArgument(_) | Self::BadArgument(_) => "Invalid Argument",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command line"),
            Self::Unknown(name) => write!(f, "unknown command {name:?}"),
            Self::MissingArgument(which) => write!(f, "missing argument: {which}"),
            Self::BadArgument(token) => write!(f, "bad numeric argument {token:?}"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Session construction/lifecycle failures.
#[derive(Debug)]
pub enum SessionError {
    /// The command listener could not bind its port. This is also how a
    /// second session on the same actuator is refused.
    Bind(io::Error),
    /// A session thread could not be spawned.
    Spawn(io::Error),
    /// The monitor was asked to run while not in its idle state.
    NotIdle,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(e) => write!(f, "cannot bind command port: {e}"),
            Self::Spawn(e) => write!(f, "cannot spawn session thread: {e}"),
            Self::NotIdle => write!(f, "monitor session is not idle"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Daemon-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
