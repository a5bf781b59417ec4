//! ANT+ Device Profiles
//!
//! Page definitions for the supported device profiles and the
//! [`ControlledModule`] abstraction every sensor module implements.

pub mod power;

use super::control::ActionOutcome;
use super::transport::AntChannel;
use super::{AntDeviceType, AntError};
use crate::sensors::ModuleState;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Standard power-only page
pub const PAGE_POWER_ONLY: u8 = 0x10;
/// Common battery status page
pub const PAGE_BATTERY_STATUS: u8 = 0x52;
/// Fast-mode page at the main rate
pub const PAGE_FAST_DATA_50HZ: u8 = 0xF2;
/// First fast-mode page at the interleaved rate
pub const PAGE_FAST_DATA_5HZ_A: u8 = 0xF3;
/// Second fast-mode page at the interleaved rate
pub const PAGE_FAST_DATA_5HZ_B: u8 = 0xF4;

/// Common trait for ANT+ profile data pages
pub trait AntProfilePage: Send + Sync {
    /// Get the page number
    fn page_number(&self) -> u8;

    /// Parse raw data into this page type
    fn parse(data: &[u8]) -> Option<Self>
    where
        Self: Sized;

    /// Get the device type this page belongs to
    fn device_type() -> AntDeviceType;
}

/// Battery status page (Page 82 / 0x52)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// 3-bit status taken from bits 1..=3 of byte 7
    pub status: u8,
}

impl BatteryStatus {
    const STATUS_MASK: u8 = 0b0000_1110;

    /// Parse battery status page
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 || data[0] != PAGE_BATTERY_STATUS {
            return None;
        }

        Some(Self {
            status: (data[7] & Self::STATUS_MASK) >> 1,
        })
    }
}

/// A sensor module whose channel is driven by a control loop.
///
/// The supervisor attaches each enabled module to a fresh channel after every
/// (re)connect, calls [`control_tick`](Self::control_tick) on a fixed schedule
/// and [`rotate_sample_window`](Self::rotate_sample_window) once per sampling
/// window. Frames reach [`decode`](Self::decode) through the channel's frame
/// handler.
pub trait ControlledModule: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &'static str;

    /// Whether the module was requested by the configuration
    fn enabled(&self) -> bool;

    /// Current module state
    fn state(&self) -> ModuleState;

    /// Overwrite the module state (used by the supervisor on (re)connect and failure)
    fn set_state(&self, state: ModuleState);

    /// Reset session state, configure `channel` and route its frames to this module.
    fn attach(self: Arc<Self>, channel: Arc<dyn AntChannel>) -> Result<(), AntError>;

    /// Drop the channel of the finished session.
    fn detach(&self);

    /// Handle one received frame. Must not block.
    fn decode(&self, frame: &[u8]);

    /// Switch the device to its high-rate mode.
    fn activate(&self) -> BoxFuture<'_, ActionOutcome>;

    /// Select what the high-rate mode transmits.
    fn configure(&self) -> BoxFuture<'_, ActionOutcome>;

    /// Return the device to its standard mode.
    fn restore(&self) -> BoxFuture<'_, ActionOutcome>;

    /// Run whatever action is currently requested.
    fn control_tick(&self) -> BoxFuture<'_, ()>;

    /// Best-effort cleanup before the node is stopped.
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Turn the counts of the finished window into rates.
    fn rotate_sample_window(&self, window: Duration);
}
