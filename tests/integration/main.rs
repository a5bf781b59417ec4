//! Integration test modules.

mod fast_mode_test;
mod sensor_mock;
