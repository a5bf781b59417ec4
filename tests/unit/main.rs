//! Unit test modules.

mod ant_profiles_test;
mod config_test;
mod live_metrics_test;
