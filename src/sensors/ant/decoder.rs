//! Power meter telemetry decoder.
//!
//! Runs once per received frame on the transport's delivery path, so every
//! step is a handful of atomic operations: no locks held, no awaits, no sleeps.
//! Mode changes are only requested here; the controller carries them out.

use super::control::{ControlMode, ControlState};
use super::profiles::power::{is_fast_page, FastDataPage};
use super::profiles::{AntProfilePage, BatteryStatus, PAGE_BATTERY_STATUS, PAGE_POWER_ONLY};
use super::transport::ChannelSlot;
use super::{AntEvent, ModuleStatus};
use crate::metrics::live::{LiveMetrics, SampleRates};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct TelemetryDecoder {
    state: Arc<ControlState>,
    live: Arc<LiveMetrics>,
    status: Arc<ModuleStatus>,
    channel: ChannelSlot,
    fast_period: u16,
    normal_period: u16,
    /// PowerOnly pages seen in the current sample window
    standard_pages: AtomicU32,
}

impl TelemetryDecoder {
    pub fn new(
        state: Arc<ControlState>,
        live: Arc<LiveMetrics>,
        status: Arc<ModuleStatus>,
        channel: ChannelSlot,
        fast_period: u16,
        normal_period: u16,
    ) -> Self {
        Self {
            state,
            live,
            status,
            channel,
            fast_period,
            normal_period,
            standard_pages: AtomicU32::new(0),
        }
    }

    /// Handle one frame.
    pub fn on_frame(&self, data: &[u8]) {
        let Some(&page) = data.first() else {
            return;
        };

        if page == PAGE_BATTERY_STATUS {
            if let Some(battery) = BatteryStatus::parse(data) {
                let status = battery.status as i8;
                if self.live.set_battery_status(status) != status {
                    tracing::info!("{}: battery status {}", self.status.name(), status);
                }
            }
        }

        self.state.pending.fulfil(page);

        if self.state.mark_data_received() {
            tracing::info!("{}: successfully connected", self.status.name());
        }

        self.live.counters().record(page);

        if is_fast_page(page) {
            self.on_fast_page();

            if let Some(fast) = FastDataPage::parse(data) {
                self.live.update(fast.first.0, fast.first.1);
                self.live.update(fast.second.0, fast.second.1);
            }
        } else if page == PAGE_POWER_ONLY {
            self.standard_pages.fetch_add(1, Ordering::Relaxed);

            // A single late standard page while fast mode runs is ignored.
            if self.state.mode() == ControlMode::Normal
                && !self.state.fast_mode_active()
                && self.live.battery_known()
            {
                self.state.request(ControlMode::ActivateFastMode);
            }
        }
    }

    /// Close a sample window. A whole window of standard pages without a
    /// single 0xF2 page means the sensor's own fast-mode timeout expired.
    pub fn end_window(&self, rates: &SampleRates) {
        let standard = self.standard_pages.swap(0, Ordering::Relaxed);

        if standard > 0
            && rates.fast_main_hz == 0.0
            && self.state.fast_mode_active()
            && self.state.mode() == ControlMode::Normal
            && self.state.pending.expected() != Some(PAGE_POWER_ONLY)
        {
            self.fast_mode_dropped();
        }
    }

    fn on_fast_page(&self) {
        // Mode first: the controller publishes the active flag before it
        // returns to Normal, so Normal here implies an up to date flag.
        let mode = self.state.mode();
        if !self.state.fast_mode_active() {
            // While an activation is in flight these pages are its confirmation.
            if mode == ControlMode::Normal {
                self.resynchronise();
            }
        } else if !self.state.fast_mode_configured() && mode == ControlMode::Normal {
            self.state.request(ControlMode::ConfigureFastMode);
        }
    }

    /// Follow the sensor back to standard mode; the next standard page
    /// re-activates.
    fn fast_mode_dropped(&self) {
        tracing::warn!("{}: sensor left fast mode on its own", self.status.name());

        self.set_period(self.normal_period);
        self.state.clear_fast_mode();
        self.status.events().emit(AntEvent::FastModeChanged {
            module: self.status.name(),
            active: false,
        });
    }

    fn set_period(&self, period: u16) {
        if let Some(channel) = self.channel.get() {
            if let Err(e) = channel.set_period(period) {
                tracing::error!("{}: failed to set period {}: {}", self.status.name(), period, e);
            }
        }
    }

    /// Fast pages we did not ask for are left over from an earlier session.
    /// Follow them locally, then restore standard mode to start clean.
    fn resynchronise(&self) {
        tracing::warn!(
            "{}: fast mode already running, restoring standard mode first",
            self.status.name()
        );

        self.set_period(self.fast_period);
        self.state.set_fast_mode_active(true);
        self.state.request(ControlMode::RestoreStandardMode);
    }
}
