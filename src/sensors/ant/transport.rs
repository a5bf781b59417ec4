//! ANT+ node and channel abstraction.
//!
//! The USB stick driver sits behind these traits. A node is acquired through a
//! [`NodeConnector`], hands out channels, and delivers every received
//! broadcast or burst payload to the channel's [`FrameHandler`].

use super::{AntDeviceType, AntError, ANT_PLUS_RF_FREQUENCY, SEARCH_TIMEOUT_INFINITE};
use futures::future::BoxFuture;
use std::sync::{Arc, RwLock};

/// Callback invoked once per received frame, on the transport's delivery path.
///
/// Handlers must return quickly; they run between high-rate frames.
pub type FrameHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A single ANT+ channel bound to one device.
pub trait AntChannel: Send + Sync {
    /// Set the channel period in ticks of the 32768 Hz base clock.
    ///
    /// Must not block: it is also called from the frame handler.
    fn set_period(&self, period: u16) -> Result<(), AntError>;

    /// Set the search timeout in seconds (255 = infinite).
    fn set_search_timeout(&self, seconds: u8) -> Result<(), AntError>;

    /// Set the RF channel as an offset from 2400 MHz.
    fn set_rf_frequency(&self, channel: u8) -> Result<(), AntError>;

    /// Restrict the channel to one device.
    fn set_channel_id(
        &self,
        device_id: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<(), AntError>;

    /// Register the receiver for broadcast and burst data.
    fn set_frame_handler(&self, handler: FrameHandler);

    /// Open the channel and start searching.
    fn open(&self) -> BoxFuture<'_, Result<(), AntError>>;

    /// Send an 8-byte acknowledged message. Fails on timeout or NAK.
    fn send_acknowledged(&self, payload: [u8; 8]) -> BoxFuture<'_, Result<(), AntError>>;
}

/// An acquired ANT+ USB stick.
pub trait AntNode: Send + Sync {
    /// Load a network key into the given network slot.
    fn set_network_key(&self, network: u8, key: [u8; 8]) -> Result<(), AntError>;

    /// Allocate a new bidirectional receive channel.
    fn new_channel(&self) -> Result<Arc<dyn AntChannel>, AntError>;

    /// Start the node's delivery loop.
    fn start(&self) -> BoxFuture<'_, Result<(), AntError>>;

    /// Stop the node and release the stick.
    fn stop(&self) -> BoxFuture<'_, Result<(), AntError>>;

    /// Whether the stick is still responding.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Acquires a node, e.g. by opening the USB stick and waiting for its reset response.
pub trait NodeConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AntNode>, AntError>>;
}

/// Shared handle to the channel of the current session.
///
/// Replaced on every (re)connect; readers clone the `Arc` out and never hold
/// the lock across an await.
#[derive(Clone, Default)]
pub struct ChannelSlot(Arc<RwLock<Option<Arc<dyn AntChannel>>>>);

impl ChannelSlot {
    pub fn get(&self) -> Option<Arc<dyn AntChannel>> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, channel: Option<Arc<dyn AntChannel>>) {
        match self.0.write() {
            Ok(mut guard) => *guard = channel,
            Err(poisoned) => *poisoned.into_inner() = channel,
        }
    }

    /// Get the channel or fail with [`AntError::ChannelClosed`].
    pub fn require(&self) -> Result<Arc<dyn AntChannel>, AntError> {
        self.get().ok_or(AntError::ChannelClosed)
    }
}

impl std::fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("attached", &self.get().is_some())
            .finish()
    }
}

/// Channel configuration for a specific device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Device type on the channel id
    pub device_type: AntDeviceType,
    /// Device number (0 for wildcard)
    pub device_id: u16,
    /// Transmission type (0 for wildcard)
    pub transmission_type: u8,
    /// Channel period (in 32768 Hz ticks)
    pub period: u16,
    /// Search timeout in seconds
    pub search_timeout: u8,
    /// RF frequency offset from 2400 MHz
    pub rf_frequency: u8,
}

impl ChannelConfig {
    /// Config for a power meter on the ANT+ channel with infinite search
    pub fn power_meter(device_id: u16, transmission_type: u8, period: u16) -> Self {
        Self {
            device_type: AntDeviceType::Power,
            device_id,
            transmission_type,
            period,
            search_timeout: SEARCH_TIMEOUT_INFINITE,
            rf_frequency: ANT_PLUS_RF_FREQUENCY,
        }
    }

    /// Push this configuration to a channel.
    pub fn apply(&self, channel: &dyn AntChannel) -> Result<(), AntError> {
        channel.set_period(self.period)?;
        channel.set_search_timeout(self.search_timeout)?;
        channel.set_rf_frequency(self.rf_frequency)?;
        channel.set_channel_id(
            self.device_id,
            self.device_type.device_type_number(),
            self.transmission_type,
        )?;

        tracing::info!(
            "Configured channel for {:?} #{} (period {}, rf {})",
            self.device_type,
            self.device_id,
            self.period,
            self.rf_frequency
        );

        Ok(())
    }
}
