//! Connection and module state shared between the supervisor, the control
//! loop and the frame decoder.
//!
//! Every state lives in its own lock-free cell so that the decoder, which runs
//! on the transport's delivery path, never waits on a lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// State of the link to the ANT+ USB stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No stick acquired
    #[default]
    NotConnected,
    /// Acquisition in progress
    Connecting,
    /// Stick acquired and node running
    Connected,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::NotConnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::NotConnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::NotConnected => write!(f, "Not connected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// State of a single sensor module (power meter, heart rate, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Module was never requested
    #[default]
    Disabled,
    /// Waiting for the device or for its configuration to complete
    Connecting,
    /// Device configured and streaming
    Active,
    /// Failed; stays here until the next reconnect cycle
    Error,
}

impl ModuleState {
    fn to_u8(self) -> u8 {
        match self {
            ModuleState::Disabled => 0,
            ModuleState::Connecting => 1,
            ModuleState::Active => 2,
            ModuleState::Error => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ModuleState::Connecting,
            2 => ModuleState::Active,
            3 => ModuleState::Error,
            _ => ModuleState::Disabled,
        }
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::Disabled => write!(f, "Disabled"),
            ModuleState::Connecting => write!(f, "Connecting..."),
            ModuleState::Active => write!(f, "Active"),
            ModuleState::Error => write!(f, "Error"),
        }
    }
}

/// Lock-free cell holding a [`ConnectionState`].
#[derive(Debug, Default)]
pub struct AtomicConnectionState {
    state: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            state: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

/// Lock-free cell holding a [`ModuleState`].
#[derive(Debug, Default)]
pub struct AtomicModuleState {
    state: AtomicU8,
}

impl AtomicModuleState {
    pub fn new(initial: ModuleState) -> Self {
        Self {
            state: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn get(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one.
    pub fn set(&self, state: ModuleState) -> ModuleState {
        ModuleState::from_u8(self.state.swap(state.to_u8(), Ordering::AcqRel))
    }
}
