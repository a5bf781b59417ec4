//! Shared rig: one power meter module attached to a simulated stick.

use antpower::sensors::ant::sim::{SimulatedChannel, SimulatedConnector, SimulatedNode};
use antpower::sensors::ant::{
    AntChannel, AntNode, ControlledModule, EventSink, NodeConnector, PowerMeterModule, SimulatedPowerMeter,
    ANT_PLUS_NETWORK_KEY,
};
use antpower::storage::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub module: Arc<PowerMeterModule>,
    pub device: Arc<SimulatedPowerMeter>,
    pub node: Arc<SimulatedNode>,
    pub channel: Arc<SimulatedChannel>,
}

impl Rig {
    /// Attach a module to a fresh node whose device plays frames on its own.
    pub async fn start(config: AppConfig, device: SimulatedPowerMeter) -> Self {
        let device = Arc::new(device);
        let connector = SimulatedConnector::new(device.clone());
        connector.connect().await.unwrap();
        let node = connector.last_node().unwrap();

        node.set_network_key(0, ANT_PLUS_NETWORK_KEY).unwrap();
        let module = Arc::new(PowerMeterModule::new(&config, EventSink::default()));
        let channel = node.new_channel().unwrap();
        module.clone().attach(channel.clone()).unwrap();
        channel.open().await.unwrap();
        node.start().await.unwrap();

        let channel = node.channel(0).unwrap();
        Self {
            module,
            device,
            node,
            channel,
        }
    }

    /// Run `count` control ticks one second apart.
    pub async fn ticks(&self, count: usize) {
        for _ in 0..count {
            self.module.control_tick().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Let one second pass, then close the sample window.
    pub async fn window(&self) {
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.module.rotate_sample_window(Duration::from_secs(1));
    }

    /// Tick until fast mode is active and configured, at most `limit` times.
    pub async fn until_configured(&self, limit: usize) {
        for _ in 0..limit {
            if self.module.control().fast_mode_configured() {
                return;
            }
            self.ticks(1).await;
        }
        panic!("fast mode not configured after {} ticks", limit);
    }

    pub fn stop(&self) {
        self.node.unplug();
        self.module.detach();
    }
}
