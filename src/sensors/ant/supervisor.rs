//! Connection supervisor.
//!
//! Owns the lifecycle of the ANT+ stick: acquire it, load the network key,
//! attach every enabled module to a fresh channel, then keep one control loop
//! per module running until the link drops or shutdown is requested. A lost
//! link sends it back to acquisition; shutdown lets each module revert its
//! fast mode before the node is stopped.

use super::module::PowerMeterModule;
use super::profiles::ControlledModule;
use super::transport::{AntNode, NodeConnector};
use super::{AntError, AntEvent, EventSink, ANT_PLUS_NETWORK_KEY};
use crate::metrics::live::PowerMeterData;
use crate::sensors::{AtomicConnectionState, ConnectionState, ModuleState};
use crate::storage::config::{AppConfig, TimingSettings};
use crossbeam::channel::{unbounded, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Network slot the ANT+ key is loaded into
const ANT_PLUS_NETWORK: u8 = 0;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Shutdown requested; modules revert fast mode
    Shutdown,
    /// The stick stopped responding; the device is out of reach
    Lost,
}

/// Requests an orderly stop of a running supervisor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        tracing::info!("Shutdown requested");
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Read-only view of the supervisor for UIs and tests.
#[derive(Clone)]
pub struct SupervisorHandle {
    connection: Arc<AtomicConnectionState>,
    power_meter: Arc<PowerMeterModule>,
    shutdown: ShutdownHandle,
}

impl SupervisorHandle {
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.get()
    }

    /// Power meter state as seen from outside.
    ///
    /// `Disabled` if the module was not requested, `Error` while the stick
    /// is not connected, otherwise the module's own state.
    pub fn power_meter_state(&self) -> ModuleState {
        if !self.power_meter.enabled() {
            return ModuleState::Disabled;
        }
        if self.connection.get() != ConnectionState::Connected {
            return ModuleState::Error;
        }
        self.power_meter.state()
    }

    /// Configured ANT+ device number of the power meter
    pub fn power_meter_id(&self) -> u16 {
        self.power_meter.device_id()
    }

    pub fn power_meter_data(&self) -> PowerMeterData {
        self.power_meter.snapshot()
    }

    pub fn power_meter(&self) -> &Arc<PowerMeterModule> {
        &self.power_meter
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn NodeConnector>,
    timing: TimingSettings,
    connection: Arc<AtomicConnectionState>,
    power_meter: Arc<PowerMeterModule>,
    modules: Vec<Arc<dyn ControlledModule>>,
    events: EventSink,
    event_rx: Receiver<AntEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionSupervisor {
    pub fn new(config: AppConfig, connector: Arc<dyn NodeConnector>) -> Self {
        let (event_tx, event_rx) = unbounded();
        let events = EventSink::new(event_tx);
        let (shutdown_tx, _) = watch::channel(false);

        let power_meter = Arc::new(PowerMeterModule::new(&config, events.clone()));
        let modules: Vec<Arc<dyn ControlledModule>> = vec![power_meter.clone()];

        Self {
            connector,
            timing: config.timing,
            connection: Arc::new(AtomicConnectionState::new(ConnectionState::NotConnected)),
            power_meter,
            modules,
            events,
            event_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Add another module to be driven alongside the power meter.
    pub fn with_module(mut self, module: Arc<dyn ControlledModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Sink for modules built outside the supervisor
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn event_receiver(&self) -> Receiver<AntEvent> {
        self.event_rx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            connection: self.connection.clone(),
            power_meter: self.power_meter.clone(),
            shutdown: self.shutdown_handle(),
        }
    }

    /// Run on the current runtime; returns the handle and the task.
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Supervise until shutdown is requested.
    pub async fn run(self) {
        let mut shutdown = self.shutdown_tx.subscribe();

        while !*shutdown.borrow_and_update() {
            let Some(node) = self.acquire(&shutdown).await else {
                if wait_or_shutdown(self.timing.reconnect_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            };

            if self.run_session(node, &mut shutdown).await == SessionEnd::Shutdown {
                break;
            }
        }

        self.set_connection(ConnectionState::NotConnected);
        tracing::info!("Connection supervisor stopped");
    }

    fn enabled_modules(&self) -> impl Iterator<Item = &Arc<dyn ControlledModule>> {
        self.modules.iter().filter(|m| m.enabled())
    }

    fn set_connection(&self, state: ConnectionState) {
        let previous = self.connection.get();
        self.connection.set(state);
        if previous != state {
            tracing::info!("ANT+ stick: {} -> {}", previous, state);
            self.events.emit(AntEvent::ConnectionChanged(state));
        }
    }

    /// Try to bring up a node, retrying once straight away on failure.
    async fn acquire(&self, shutdown: &watch::Receiver<bool>) -> Option<Arc<dyn AntNode>> {
        for attempt in 1..=2 {
            if *shutdown.borrow() {
                return None;
            }

            self.set_connection(ConnectionState::Connecting);
            for module in self.enabled_modules() {
                module.set_state(ModuleState::Connecting);
            }

            match self.bring_up().await {
                Ok(node) => {
                    self.set_connection(ConnectionState::Connected);
                    return Some(node);
                }
                Err(e) => {
                    tracing::error!("ANT+ stick unavailable (attempt {}): {}", attempt, e);
                    self.events.emit(AntEvent::Error {
                        message: e.to_string(),
                    });
                    self.set_connection(ConnectionState::NotConnected);
                    for module in self.enabled_modules() {
                        module.set_state(ModuleState::Error);
                    }
                }
            }
        }

        None
    }

    async fn bring_up(&self) -> Result<Arc<dyn AntNode>, AntError> {
        let node = self.connector.connect().await?;

        if let Err(e) = self.open_channels(node.as_ref()).await {
            self.detach_all();
            if let Err(stop_err) = node.stop().await {
                tracing::warn!("Failed to release stick: {}", stop_err);
            }
            return Err(e);
        }

        Ok(node)
    }

    async fn open_channels(&self, node: &dyn AntNode) -> Result<(), AntError> {
        node.set_network_key(ANT_PLUS_NETWORK, ANT_PLUS_NETWORK_KEY)?;

        for module in self.enabled_modules() {
            let channel = node.new_channel()?;
            module.clone().attach(channel.clone())?;
            channel.open().await?;
            tracing::info!("{}: channel open, searching", module.name());
        }

        node.start().await
    }

    /// Drive the modules until the link drops or shutdown is requested.
    async fn run_session(
        &self,
        node: Arc<dyn AntNode>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (end_tx, end_rx) = watch::channel(None);
        let tick = self.timing.control_tick();
        let window = self.timing.sample_window();

        let control_tasks: Vec<JoinHandle<()>> = self
            .enabled_modules()
            .map(|module| tokio::spawn(control_loop(module.clone(), tick, end_rx.clone())))
            .collect();

        let mut windows = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
        let end = loop {
            tokio::select! {
                _ = windows.tick() => {
                    for module in self.enabled_modules() {
                        module.rotate_sample_window(window);
                    }
                    if !node.is_alive() {
                        tracing::warn!("ANT+ stick stopped responding");
                        break SessionEnd::Lost;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break SessionEnd::Shutdown;
                    }
                }
            }
        };

        end_tx.send_replace(Some(end));
        for task in control_tasks {
            if let Err(e) = task.await {
                tracing::error!("Control loop ended abnormally: {}", e);
            }
        }

        self.detach_all();
        if let Err(e) = node.stop().await {
            tracing::warn!("Failed to stop stick: {}", e);
        }
        self.set_connection(ConnectionState::NotConnected);

        end
    }

    fn detach_all(&self) {
        for module in self.enabled_modules() {
            module.detach();
        }
    }
}

/// Tick one module until its session ends, then clean up if shutting down.
async fn control_loop(
    module: Arc<dyn ControlledModule>,
    tick: Duration,
    mut end: watch::Receiver<Option<SessionEnd>>,
) {
    let reason = loop {
        if let Some(reason) = *end.borrow_and_update() {
            break reason;
        }

        module.control_tick().await;

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            changed = end.changed() => {
                if changed.is_err() {
                    break SessionEnd::Lost;
                }
            }
        }
    };

    if reason == SessionEnd::Shutdown {
        module.shutdown().await;
    }
    tracing::debug!("{}: control loop stopped ({:?})", module.name(), reason);
}

/// Sleep for `delay`; `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
