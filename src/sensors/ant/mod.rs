//! ANT+ Protocol Support
//!
//! This module drives an ANT+ power meter through its fast-mode control
//! protocol and decodes the resulting high-rate telemetry.
//! Requires an ANT+ USB dongle (or the bundled simulator) for communication.

pub mod control;
pub mod decoder;
pub mod module;
pub mod profiles;
pub mod sim;
pub mod supervisor;
pub mod transport;

use crate::sensors::{AtomicModuleState, ConnectionState, ModuleState};
use thiserror::Error;

// Re-export main types
pub use control::{ActionOutcome, ControlMode, ControlState, PendingResponse};
pub use decoder::TelemetryDecoder;
pub use module::PowerMeterModule;
pub use profiles::ControlledModule;
pub use sim::{SimulatedConnector, SimulatedNode, SimulatedPowerMeter};
pub use supervisor::{ConnectionSupervisor, ShutdownHandle, SupervisorHandle};
pub use transport::{AntChannel, AntNode, ChannelConfig, ChannelSlot, FrameHandler, NodeConnector};

/// ANT+ public network key, loaded on network 0 before any channel opens
pub const ANT_PLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

/// ANT+ RF channel (2457 MHz)
pub const ANT_PLUS_RF_FREQUENCY: u8 = 57;

/// Search timeout value meaning "search forever"
pub const SEARCH_TIMEOUT_INFINITE: u8 = 255;

/// Base clock of the channel period, in Hz
pub const PERIOD_BASE_HZ: f64 = 32768.0;

/// Errors that can occur during ANT+ operations
#[derive(Debug, Error)]
pub enum AntError {
    #[error("No ANT+ dongle found")]
    NoDongleFound,

    #[error("Dongle initialization failed: {0}")]
    DongleInitFailed(String),

    #[error("Channel allocation failed: {0}")]
    ChannelAllocationFailed(String),

    #[error("Acknowledged send failed: {0}")]
    SendFailed(String),

    #[error("Channel is closed")]
    ChannelClosed,
}

/// ANT+ device types supported by this implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AntDeviceType {
    /// Power Meter (Device Type 11)
    Power,
}

impl AntDeviceType {
    /// Get the ANT+ device type number
    pub fn device_type_number(&self) -> u8 {
        match self {
            AntDeviceType::Power => 11,
        }
    }
}

/// Events from the ANT+ subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum AntEvent {
    /// Stick link state changed
    ConnectionChanged(ConnectionState),
    /// A module changed state
    ModuleStateChanged {
        module: &'static str,
        state: ModuleState,
    },
    /// Fast mode was confirmed on or off by the device
    FastModeChanged { module: &'static str, active: bool },
    /// Error occurred
    Error { message: String },
}

/// Non-blocking sender for [`AntEvent`]s; a default sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<crossbeam::channel::Sender<AntEvent>>);

impl EventSink {
    pub fn new(tx: crossbeam::channel::Sender<AntEvent>) -> Self {
        Self(Some(tx))
    }

    /// Send an event if anyone is listening.
    pub fn emit(&self, event: AntEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.try_send(event);
        }
    }
}

/// Module state cell that reports every change as an event.
#[derive(Debug)]
pub struct ModuleStatus {
    name: &'static str,
    state: AtomicModuleState,
    events: EventSink,
}

impl ModuleStatus {
    pub fn new(name: &'static str, initial: ModuleState, events: EventSink) -> Self {
        Self {
            name,
            state: AtomicModuleState::new(initial),
            events,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> ModuleState {
        self.state.get()
    }

    pub fn set(&self, state: ModuleState) {
        let previous = self.state.set(state);
        if previous != state {
            tracing::info!("{}: {} -> {}", self.name, previous, state);
            self.events.emit(AntEvent::ModuleStateChanged {
                module: self.name,
                state,
            });
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

/// Convert a channel period (ticks of the 32768 Hz base clock) to a message rate in Hz.
pub fn period_to_hz(period: u16) -> f64 {
    if period == 0 {
        return 0.0;
    }
    PERIOD_BASE_HZ / period as f64
}

/// Render a payload as `[ F0 03 00 ... ]` for logs.
pub fn to_hex_string(data: &[u8]) -> String {
    let mut out = String::from("[");
    for byte in data {
        out.push_str(&format!(" {:02X}", byte));
    }
    out.push_str(" ]");
    out
}
