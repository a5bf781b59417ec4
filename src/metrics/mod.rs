//! Live telemetry values and sample-rate accounting.

pub mod live;

pub use live::{AtomicF64, LiveMetrics, PowerMeterData, SampleRates};
