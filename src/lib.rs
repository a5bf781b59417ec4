//! AntPower - ANT+ power meter driver
//!
//! Connects to an ANT+ USB stick, drives a power meter into its high-rate
//! fast mode (50 Hz crank angle and torque, 5 Hz power and cadence) and keeps
//! the decoded values available for lock-free reading. Reverts the sensor to
//! standard mode on shutdown.

pub mod metrics;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use metrics::live::{LiveMetrics, PowerMeterData};
pub use sensors::ant::{ConnectionSupervisor, PowerMeterModule, SupervisorHandle};
pub use storage::config::AppConfig;
