//! Concrete adapters for the port traits: the serial instrument link, the
//! cryostat telemetry client, and the alert sink.

pub mod alert;
pub mod serial;
pub mod triton;

pub use alert::LogAlert;
pub use serial::SerialLink;
pub use triton::TritonClient;
