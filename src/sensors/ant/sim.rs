//! Simulated ANT+ stick and power meter.
//!
//! Lets the whole stack run without hardware. The [`SimulatedPowerMeter`]
//! answers the fast-mode commands the way a real sensor does: standard
//! power-only pages at ~4 Hz until activated, then interleaved fast pages at
//! the requested rate until restored or until its own timeout expires.
//! Failures (missing stick, rejected sends, a sensor that ignores commands,
//! an unplugged stick) can be injected for tests.

use super::profiles::power::{commands, encode_signed, MetricId, PageParams};
use super::profiles::{
    PAGE_BATTERY_STATUS, PAGE_FAST_DATA_50HZ, PAGE_FAST_DATA_5HZ_A, PAGE_FAST_DATA_5HZ_B,
    PAGE_POWER_ONLY,
};
use super::transport::{AntChannel, AntNode, FrameHandler, NodeConnector};
use super::{to_hex_string, AntError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval of standard pages (period 8182)
const STANDARD_INTERVAL: Duration = Duration::from_millis(250);

/// Every n-th standard page is a battery page
const BATTERY_PAGE_EVERY: u32 = 4;

const CRANK_LENGTH_M: f64 = 0.1725;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy)]
struct FastSession {
    started: Instant,
    timeout: Duration,
    /// Delay between main-rate frames
    interval: Duration,
    /// Main-rate frames per interleaved group
    interleave_every: u32,
}

impl FastSession {
    fn new(timeout: Duration, main_hz: u8, interleaved_hz: u8) -> Self {
        let main_hz = main_hz.max(1) as u32;
        Self {
            started: Instant::now(),
            timeout,
            interval: Duration::from_millis(1000 / main_hz as u64),
            interleave_every: (main_hz / interleaved_hz.max(1) as u32).max(1),
        }
    }
}

#[derive(Debug)]
struct DeviceModel {
    fast: Option<FastSession>,
    pages: PageParams,
    sequence: u32,
    interleaved: VecDeque<[u8; 8]>,
    event_count: u8,
    accumulated_power: u16,
    crank_angle_mrad: f64,
    power_w: f64,
    cadence_rpm: f64,
    battery_status: u8,
}

impl DeviceModel {
    fn torque_nm(&self) -> f64 {
        if self.cadence_rpm <= 0.0 {
            return 0.0;
        }
        self.power_w / (self.cadence_rpm * 2.0 * PI / 60.0)
    }

    /// Raw wire value of `id` at the current instant.
    fn raw_value(&self, id: MetricId) -> i16 {
        let torque = self.torque_nm();
        let force = torque / CRANK_LENGTH_M;
        let raw = match id {
            MetricId::None => 0.0,
            MetricId::CrankAngle => self.crank_angle_mrad,
            MetricId::Cadence => self.cadence_rpm * 100.0,
            MetricId::Power => self.power_w * 10.0,
            MetricId::TorqueTotal => torque * 100.0,
            MetricId::TorqueLeft | MetricId::TorqueRight => torque * 50.0,
            MetricId::ForceTotal => force * 10.0,
            MetricId::ForceLeft | MetricId::ForceRight => force * 5.0,
            MetricId::OptimalCyclingAngle => 100.0 * 100.0,
            MetricId::BalanceLeft | MetricId::BalanceRight => 50.0 * 100.0,
            MetricId::TorqueEfficiencyLeft | MetricId::TorqueEfficiencyRight => 70.0 * 2.0,
            MetricId::PedalSmoothnessLeft => 25.0 * 2.0,
        };
        raw.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    fn fast_page(&self, page: u8, ids: [MetricId; 2]) -> [u8; 8] {
        let (low_a, high_a) = encode_signed(self.raw_value(ids[0]));
        let (low_b, high_b) = encode_signed(self.raw_value(ids[1]));
        [
            page,
            self.sequence as u8,
            ids[0].code(),
            low_a,
            high_a,
            ids[1].code(),
            low_b,
            high_b,
        ]
    }

    /// One 0xF2 page per main interval; after every `interleave_every` of
    /// them the 0xF3 and 0xF4 pages follow back to back. An all-`None` 0xF4
    /// selection suppresses that page.
    fn next_fast_frame(&mut self, session: FastSession) -> ([u8; 8], Duration) {
        let delay = |queued: &VecDeque<[u8; 8]>| {
            if queued.is_empty() {
                session.interval
            } else {
                Duration::ZERO
            }
        };

        if let Some(frame) = self.interleaved.pop_front() {
            return (frame, delay(&self.interleaved));
        }

        let revolutions_per_s = self.cadence_rpm / 60.0;
        let full_turn = 2.0 * PI * 1000.0;
        self.crank_angle_mrad = (self.crank_angle_mrad
            + revolutions_per_s * full_turn * session.interval.as_secs_f64())
            % full_turn;
        self.sequence = self.sequence.wrapping_add(1);

        let frame = self.fast_page(PAGE_FAST_DATA_50HZ, self.pages.page_f2);
        if self.sequence % session.interleave_every == 0 {
            let f3 = self.fast_page(PAGE_FAST_DATA_5HZ_A, self.pages.page_f3);
            self.interleaved.push_back(f3);
            if self.pages.page_f4 != [MetricId::None, MetricId::None] {
                let f4 = self.fast_page(PAGE_FAST_DATA_5HZ_B, self.pages.page_f4);
                self.interleaved.push_back(f4);
            }
        }

        (frame, delay(&self.interleaved))
    }

    fn next_standard_frame(&mut self) -> ([u8; 8], Duration) {
        self.sequence = self.sequence.wrapping_add(1);

        let frame = if self.sequence % BATTERY_PAGE_EVERY == 0 {
            [
                PAGE_BATTERY_STATUS,
                0xFF,
                0xFF,
                0x00,
                0x00,
                0x00,
                0x00,
                (self.battery_status & 0b111) << 1,
            ]
        } else {
            let power = self.power_w.round() as u16;
            self.event_count = self.event_count.wrapping_add(1);
            self.accumulated_power = self.accumulated_power.wrapping_add(power);
            let accumulated = self.accumulated_power.to_le_bytes();
            let instantaneous = power.to_le_bytes();
            [
                PAGE_POWER_ONLY,
                self.event_count,
                0xFF,
                self.cadence_rpm.round() as u8,
                accumulated[0],
                accumulated[1],
                instantaneous[0],
                instantaneous[1],
            ]
        };

        (frame, STANDARD_INTERVAL)
    }
}

/// Device model of a fast-mode capable power meter.
#[derive(Debug)]
pub struct SimulatedPowerMeter {
    model: Mutex<DeviceModel>,
    responding: AtomicBool,
    failing_sends: AtomicU32,
    sent: Mutex<Vec<[u8; 8]>>,
}

impl Default for SimulatedPowerMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPowerMeter {
    /// A rider at 250 W and 90 rpm, battery "good".
    pub fn new() -> Self {
        Self {
            model: Mutex::new(DeviceModel {
                fast: None,
                pages: PageParams::default(),
                sequence: 0,
                interleaved: VecDeque::new(),
                event_count: 0,
                accumulated_power: 0,
                crank_angle_mrad: 0.0,
                power_w: 250.0,
                cadence_rpm: 90.0,
                battery_status: 3,
            }),
            responding: AtomicBool::new(true),
            failing_sends: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A sensor still in fast mode from an earlier session.
    pub fn already_in_fast_mode(self) -> Self {
        lock(&self.model).fast = Some(FastSession::new(Duration::from_secs(60 * 60), 50, 5));
        self
    }

    pub fn set_ride(&self, power_w: f64, cadence_rpm: f64) {
        let mut model = lock(&self.model);
        model.power_w = power_w;
        model.cadence_rpm = cadence_rpm;
    }

    /// Ignore fast-mode commands (they are still acknowledged).
    pub fn set_responding(&self, responding: bool) {
        self.responding.store(responding, Ordering::SeqCst);
    }

    /// Reject the next `count` acknowledged sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn is_fast_mode(&self) -> bool {
        lock(&self.model).fast.is_some()
    }

    /// Metrics the sensor was last told to send
    pub fn page_params(&self) -> PageParams {
        lock(&self.model).pages
    }

    /// Every payload that was acknowledged, in order
    pub fn sent_commands(&self) -> Vec<[u8; 8]> {
        lock(&self.sent).clone()
    }

    pub fn count_sent(&self, payload: [u8; 8]) -> usize {
        lock(&self.sent).iter().filter(|p| **p == payload).count()
    }

    /// Handle an acknowledged message from the host.
    pub fn receive_command(&self, payload: [u8; 8]) -> Result<(), AntError> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(AntError::SendFailed(format!(
                "no acknowledgement for {}",
                to_hex_string(&payload)
            )));
        }

        lock(&self.sent).push(payload);
        if payload[0] != commands::COMMAND_PAGE || !self.responding.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut model = lock(&self.model);
        match payload[1] {
            0x03 => {
                let timeout = Duration::from_secs(payload[4] as u64 * 60);
                model.fast = Some(FastSession::new(timeout, payload[5], payload[6]));
                tracing::debug!("simulator: fast mode on");
            }
            0x04 => {
                model.pages.page_f2 = [code_or_none(payload[4]), code_or_none(payload[5])];
                model.pages.page_f3 = [code_or_none(payload[6]), code_or_none(payload[7])];
            }
            0x05 => {
                model.pages.page_f3 = [code_or_none(payload[4]), code_or_none(payload[5])];
                model.pages.page_f4 = [code_or_none(payload[6]), code_or_none(payload[7])];
            }
            0x06 => {
                model.interleaved.clear();
                if model.fast.take().is_some() {
                    tracing::debug!("simulator: fast mode off");
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Next frame the sensor transmits and the delay until the one after.
    pub fn next_frame(&self) -> ([u8; 8], Duration) {
        let mut model = lock(&self.model);

        let mut fast = model.fast;
        if let Some(session) = fast {
            if session.started.elapsed() >= session.timeout {
                tracing::debug!("simulator: fast mode timed out");
                fast = None;
                model.fast = None;
                model.interleaved.clear();
            }
        }

        match fast {
            Some(session) => model.next_fast_frame(session),
            None => model.next_standard_frame(),
        }
    }
}

fn code_or_none(code: u8) -> MetricId {
    MetricId::from_code(code).unwrap_or(MetricId::None)
}

/// Channel of a [`SimulatedNode`]; records its configuration.
pub struct SimulatedChannel {
    device: Arc<SimulatedPowerMeter>,
    handler: Mutex<Option<FrameHandler>>,
    period: AtomicU16,
    period_changes: Mutex<Vec<u16>>,
    channel_id: Mutex<Option<(u16, u8, u8)>>,
    open: AtomicBool,
}

impl SimulatedChannel {
    fn new(device: Arc<SimulatedPowerMeter>) -> Self {
        Self {
            device,
            handler: Mutex::new(None),
            period: AtomicU16::new(0),
            period_changes: Mutex::new(Vec::new()),
            channel_id: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    pub fn period(&self) -> u16 {
        self.period.load(Ordering::SeqCst)
    }

    /// Every period set on this channel, in order
    pub fn period_changes(&self) -> Vec<u16> {
        lock(&self.period_changes).clone()
    }

    /// (device number, device type, transmission type)
    pub fn channel_id(&self) -> Option<(u16, u8, u8)> {
        *lock(&self.channel_id)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Hand a frame to the registered handler as if it had been received.
    pub fn deliver(&self, frame: &[u8]) {
        if !self.is_open() {
            return;
        }
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(frame);
        }
    }
}

impl AntChannel for SimulatedChannel {
    fn set_period(&self, period: u16) -> Result<(), AntError> {
        self.period.store(period, Ordering::SeqCst);
        lock(&self.period_changes).push(period);
        Ok(())
    }

    fn set_search_timeout(&self, _seconds: u8) -> Result<(), AntError> {
        Ok(())
    }

    fn set_rf_frequency(&self, _channel: u8) -> Result<(), AntError> {
        Ok(())
    }

    fn set_channel_id(
        &self,
        device_id: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<(), AntError> {
        *lock(&self.channel_id) = Some((device_id, device_type, transmission_type));
        Ok(())
    }

    fn set_frame_handler(&self, handler: FrameHandler) {
        *lock(&self.handler) = Some(handler);
    }

    fn open(&self) -> BoxFuture<'_, Result<(), AntError>> {
        async move {
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn send_acknowledged(&self, payload: [u8; 8]) -> BoxFuture<'_, Result<(), AntError>> {
        async move {
            if !self.is_open() {
                return Err(AntError::ChannelClosed);
            }
            self.device.receive_command(payload)
        }
        .boxed()
    }
}

/// Simulated USB stick.
///
/// With `autonomous` set, [`start`](AntNode::start) spawns a task that plays
/// the device's frames to every channel; otherwise frames only arrive through
/// [`inject`](Self::inject).
pub struct SimulatedNode {
    device: Arc<SimulatedPowerMeter>,
    autonomous: bool,
    channels: Arc<Mutex<Vec<Arc<SimulatedChannel>>>>,
    network_key: Mutex<Option<(u8, [u8; 8])>>,
    running: Arc<AtomicBool>,
    alive: AtomicBool,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedNode {
    pub fn new(device: Arc<SimulatedPowerMeter>, autonomous: bool) -> Self {
        Self {
            device,
            autonomous,
            channels: Arc::new(Mutex::new(Vec::new())),
            network_key: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            alive: AtomicBool::new(true),
            emitter: Mutex::new(None),
        }
    }

    pub fn channel(&self, index: usize) -> Option<Arc<SimulatedChannel>> {
        lock(&self.channels).get(index).cloned()
    }

    pub fn network_key(&self) -> Option<(u8, [u8; 8])> {
        *lock(&self.network_key)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver `frame` on every channel.
    pub fn inject(&self, frame: &[u8]) {
        let channels = lock(&self.channels).clone();
        for channel in channels {
            channel.deliver(frame);
        }
    }

    /// Pull the stick: no more frames, and the node reports itself dead.
    pub fn unplug(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.halt();
    }

    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.emitter).take() {
            task.abort();
        }
    }
}

impl AntNode for SimulatedNode {
    fn set_network_key(&self, network: u8, key: [u8; 8]) -> Result<(), AntError> {
        *lock(&self.network_key) = Some((network, key));
        Ok(())
    }

    fn new_channel(&self) -> Result<Arc<dyn AntChannel>, AntError> {
        if lock(&self.network_key).is_none() {
            return Err(AntError::ChannelAllocationFailed(
                "network key not set".to_string(),
            ));
        }
        let channel = Arc::new(SimulatedChannel::new(self.device.clone()));
        lock(&self.channels).push(channel.clone());
        Ok(channel)
    }

    fn start(&self) -> BoxFuture<'_, Result<(), AntError>> {
        async move {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(AntError::DongleInitFailed("stick unplugged".to_string()));
            }
            self.running.store(true, Ordering::SeqCst);
            if !self.autonomous {
                return Ok(());
            }

            let device = self.device.clone();
            let channels = self.channels.clone();
            let running = self.running.clone();
            let task = tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    let (frame, delay) = device.next_frame();
                    let targets = lock(&channels).clone();
                    for channel in targets {
                        channel.deliver(&frame);
                    }
                    tokio::time::sleep(delay).await;
                }
            });
            *lock(&self.emitter) = Some(task);

            Ok(())
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), AntError>> {
        async move {
            self.halt();
            Ok(())
        }
        .boxed()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Hands out [`SimulatedNode`]s bound to one shared device.
pub struct SimulatedConnector {
    device: Arc<SimulatedPowerMeter>,
    autonomous: bool,
    failing_connects: AtomicU32,
    attempts: AtomicU32,
    last_node: Mutex<Option<Arc<SimulatedNode>>>,
}

impl SimulatedConnector {
    /// Nodes that play the device's frames on their own.
    pub fn new(device: Arc<SimulatedPowerMeter>) -> Self {
        Self::with_mode(device, true)
    }

    /// Nodes that only deliver injected frames.
    pub fn manual(device: Arc<SimulatedPowerMeter>) -> Self {
        Self::with_mode(device, false)
    }

    fn with_mode(device: Arc<SimulatedPowerMeter>, autonomous: bool) -> Self {
        Self {
            device,
            autonomous,
            failing_connects: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            last_node: Mutex::new(None),
        }
    }

    pub fn device(&self) -> &Arc<SimulatedPowerMeter> {
        &self.device
    }

    /// Report "no stick" for the next `count` connects.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Node of the most recent successful connect
    pub fn last_node(&self) -> Option<Arc<SimulatedNode>> {
        lock(&self.last_node).clone()
    }
}

impl NodeConnector for SimulatedConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AntNode>, AntError>> {
        async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failing_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(AntError::NoDongleFound);
            }

            let node = Arc::new(SimulatedNode::new(self.device.clone(), self.autonomous));
            *lock(&self.last_node) = Some(node.clone());
            tracing::info!("simulator: stick acquired");
            Ok(node as Arc<dyn AntNode>)
        }
        .boxed()
    }
}
