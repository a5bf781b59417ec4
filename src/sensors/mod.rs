//! Sensor module for ANT+ device communication.

pub mod ant;
pub mod types;

pub use types::{AtomicConnectionState, AtomicModuleState, ConnectionState, ModuleState};
