//! Power meter module: one channel, its decoder and its fast-mode controller.

use super::control::{ActionOutcome, ControlState, FastModeController};
use super::decoder::TelemetryDecoder;
use super::profiles::ControlledModule;
use super::transport::{AntChannel, ChannelConfig, ChannelSlot, FrameHandler};
use super::{AntError, EventSink, ModuleStatus};
use crate::metrics::live::{LiveMetrics, PowerMeterData};
use crate::sensors::ModuleState;
use crate::storage::config::{AppConfig, PowerMeterSettings};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// Module name used in logs and events
pub const POWER_METER: &str = "power_meter";

pub struct PowerMeterModule {
    settings: PowerMeterSettings,
    normal_period: u16,
    status: Arc<ModuleStatus>,
    control: Arc<ControlState>,
    live: Arc<LiveMetrics>,
    channel: ChannelSlot,
    decoder: TelemetryDecoder,
    controller: FastModeController,
}

impl PowerMeterModule {
    pub fn new(config: &AppConfig, events: EventSink) -> Self {
        let initial = if config.power_meter.enabled {
            ModuleState::Connecting
        } else {
            ModuleState::Disabled
        };
        let status = Arc::new(ModuleStatus::new(POWER_METER, initial, events));
        let control = Arc::new(ControlState::new());
        let live = Arc::new(LiveMetrics::new());
        let channel = ChannelSlot::default();

        let decoder = TelemetryDecoder::new(
            control.clone(),
            live.clone(),
            status.clone(),
            channel.clone(),
            config.fast_mode.fast_period,
            config.fast_mode.normal_period,
        );
        let controller = FastModeController::new(
            control.clone(),
            channel.clone(),
            status.clone(),
            config.fast_mode.clone(),
            config.timing.clone(),
        );

        Self {
            settings: config.power_meter.clone(),
            normal_period: config.fast_mode.normal_period,
            status,
            control,
            live,
            channel,
            decoder,
            controller,
        }
    }

    /// Configured ANT+ device number
    pub fn device_id(&self) -> u16 {
        self.settings.device_id
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            rf_frequency: self.settings.rf_frequency,
            search_timeout: self.settings.search_timeout,
            ..ChannelConfig::power_meter(
                self.settings.device_id,
                self.settings.transmission_type,
                self.normal_period,
            )
        }
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    pub fn live(&self) -> &Arc<LiveMetrics> {
        &self.live
    }

    pub fn controller(&self) -> &FastModeController {
        &self.controller
    }

    /// Owned copy of the latest values.
    pub fn snapshot(&self) -> PowerMeterData {
        self.live.snapshot()
    }
}

impl ControlledModule for PowerMeterModule {
    fn name(&self) -> &'static str {
        POWER_METER
    }

    fn enabled(&self) -> bool {
        self.settings.enabled
    }

    fn state(&self) -> ModuleState {
        self.status.get()
    }

    fn set_state(&self, state: ModuleState) {
        self.status.set(state);
    }

    fn attach(self: Arc<Self>, channel: Arc<dyn AntChannel>) -> Result<(), AntError> {
        self.control.reset();
        self.channel_config().apply(channel.as_ref())?;

        let module = Arc::clone(&self);
        let handler: FrameHandler = Arc::new(move |data: &[u8]| module.decode(data));
        channel.set_frame_handler(handler);
        self.channel.set(Some(channel));

        Ok(())
    }

    fn detach(&self) {
        self.channel.set(None);
        self.live.clear_sample_rates();
    }

    fn decode(&self, frame: &[u8]) {
        self.decoder.on_frame(frame);
    }

    fn activate(&self) -> BoxFuture<'_, ActionOutcome> {
        self.controller.activate_fast_mode().boxed()
    }

    fn configure(&self) -> BoxFuture<'_, ActionOutcome> {
        self.controller.configure_fast_mode().boxed()
    }

    fn restore(&self) -> BoxFuture<'_, ActionOutcome> {
        self.controller.restore_standard_mode().boxed()
    }

    fn control_tick(&self) -> BoxFuture<'_, ()> {
        async move {
            self.controller.tick().await;
        }
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        self.controller.shutdown().boxed()
    }

    fn rotate_sample_window(&self, window: Duration) {
        let rates = self.live.rotate_sample_window(window);
        self.decoder.end_window(&rates);
        tracing::debug!(
            "{}: {:.1} Hz / {:.1} Hz / {:.1} Hz",
            POWER_METER,
            rates.fast_main_hz,
            rates.fast_interleaved_a_hz,
            rates.fast_interleaved_b_hz
        );
    }
}
