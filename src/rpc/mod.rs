//! Remote command channel: line protocol, listener, and dispatch worker.

pub mod command;
pub mod server;

pub use command::Command;
pub use server::{PendingCommand, listen, serve};
