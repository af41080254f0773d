//! Cryoguard — impedance-heater protection for a dilution-refrigerator
//! cryostat.
//!
//! Supervises temperature/pressure telemetry and, when limits are
//! exceeded, forcibly and safely drives the heater's voltage source to
//! zero. A line-oriented TCP command channel lets an external controller
//! adjust, read, or halt the source; all instrument traffic is serialized
//! through a single per-actuator bus token.
//!
//! The domain core is hardware-agnostic: everything reaches the outside
//! world through the port traits in [`app::ports`], so the full
//! supervision path runs against mocks in tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod heater;
pub mod monitor;
pub mod rpc;
