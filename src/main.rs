//! AntPower - ANT+ power meter driver
//!
//! Main entry point: runs the connection supervisor against the simulated
//! stick and logs the live values once per second until Ctrl+C.

use antpower::sensors::ant::{ConnectionSupervisor, SimulatedConnector, SimulatedPowerMeter};
use antpower::storage::config;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AntPower v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().with_context(|| {
        format!(
            "failed to load configuration from {}",
            config::get_config_path().display()
        )
    })?;

    let connector = Arc::new(SimulatedConnector::new(Arc::new(SimulatedPowerMeter::new())));
    let supervisor = ConnectionSupervisor::new(config, connector);
    let events = supervisor.event_receiver();
    let (handle, task) = supervisor.spawn();

    let mut report = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = report.tick() => {
                for event in events.try_iter() {
                    tracing::debug!("event: {:?}", event);
                }

                let data = handle.power_meter_data();
                tracing::info!(
                    "{} | angle {:6.1} deg | torque {:5.1} Nm | {:5.1} W | {:5.1} rpm | {:4.1} Hz",
                    handle.power_meter_state(),
                    data.crank_angle,
                    data.torque_total,
                    data.power,
                    data.cadence,
                    data.sample_rates.fast_main_hz
                );
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                break;
            }
        }
    }

    handle.shutdown();
    task.await.context("supervisor task failed")?;

    tracing::info!("AntPower stopped");
    Ok(())
}
