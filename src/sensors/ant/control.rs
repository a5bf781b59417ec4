//! Fast-mode control state machine.
//!
//! The decoder never talks to the device itself. It records a requested
//! [`ControlMode`]; the controller picks the request up on its next tick,
//! runs the matching command sequence and resets the mode to `Normal`.
//! At most one request is pending: new requests only succeed from `Normal`.

use super::profiles::power::commands;
use super::profiles::{PAGE_FAST_DATA_50HZ, PAGE_POWER_ONLY};
use super::transport::ChannelSlot;
use super::{to_hex_string, AntError, AntEvent, ModuleStatus};
use crate::sensors::ModuleState;
use crate::storage::config::{FastModeSettings, TimingSettings};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Requested control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Nothing to do
    Normal,
    /// Send the activate command and wait for fast pages
    ActivateFastMode,
    /// Select the metrics carried by the fast pages
    ConfigureFastMode,
    /// Send the restore command and wait for standard pages
    RestoreStandardMode,
}

impl ControlMode {
    fn to_u8(self) -> u8 {
        match self {
            ControlMode::Normal => 0,
            ControlMode::ActivateFastMode => 1,
            ControlMode::ConfigureFastMode => 2,
            ControlMode::RestoreStandardMode => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ControlMode::ActivateFastMode,
            2 => ControlMode::ConfigureFastMode,
            3 => ControlMode::RestoreStandardMode,
            _ => ControlMode::Normal,
        }
    }
}

/// Result of one control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Commands sent and, where applicable, confirmed
    Completed,
    /// Commands sent but the expected page never arrived
    TimedOut,
    /// The transport rejected every attempt
    SendFailed,
}

/// A single outstanding "wait for page X" request.
#[derive(Debug)]
pub struct PendingResponse {
    expected: AtomicU16,
    received: AtomicBool,
}

impl PendingResponse {
    const NONE: u16 = 0x100;

    fn new() -> Self {
        Self {
            expected: AtomicU16::new(Self::NONE),
            received: AtomicBool::new(false),
        }
    }

    /// Start waiting for `page`, replacing any earlier request.
    pub fn arm(&self, page: u8) {
        self.received.store(false, Ordering::SeqCst);
        self.expected.store(page as u16, Ordering::SeqCst);
    }

    /// Mark the request received if `page` is the expected one.
    ///
    /// Only the first matching frame counts.
    pub fn fulfil(&self, page: u8) -> bool {
        self.expected.load(Ordering::SeqCst) == page as u16
            && self
                .received
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    pub fn is_received(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }

    /// Page currently waited for
    pub fn expected(&self) -> Option<u8> {
        match self.expected.load(Ordering::SeqCst) {
            Self::NONE => None,
            page => Some(page as u8),
        }
    }

    pub fn clear(&self) {
        self.expected.store(Self::NONE, Ordering::SeqCst);
        self.received.store(false, Ordering::SeqCst);
    }
}

/// Protocol state of one connection session, shared by decoder and controller.
#[derive(Debug)]
pub struct ControlState {
    mode: AtomicU8,
    fast_mode_active: AtomicBool,
    fast_mode_configured: AtomicBool,
    data_received: AtomicBool,
    pub pending: PendingResponse,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(ControlMode::Normal.to_u8()),
            fast_mode_active: AtomicBool::new(false),
            fast_mode_configured: AtomicBool::new(false),
            data_received: AtomicBool::new(false),
            pending: PendingResponse::new(),
        }
    }

    /// Forget everything learned from the previous session.
    pub fn reset(&self) {
        self.mode.store(ControlMode::Normal.to_u8(), Ordering::SeqCst);
        self.fast_mode_active.store(false, Ordering::SeqCst);
        self.fast_mode_configured.store(false, Ordering::SeqCst);
        self.data_received.store(false, Ordering::SeqCst);
        self.pending.clear();
    }

    pub fn mode(&self) -> ControlMode {
        ControlMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Request `target`; ignored unless the controller is idle.
    pub fn request(&self, target: ControlMode) -> bool {
        self.mode
            .compare_exchange(
                ControlMode::Normal.to_u8(),
                target.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Back to `Normal` after an action finished.
    fn complete(&self) {
        self.mode.store(ControlMode::Normal.to_u8(), Ordering::SeqCst);
    }

    pub fn fast_mode_active(&self) -> bool {
        self.fast_mode_active.load(Ordering::SeqCst)
    }

    pub fn set_fast_mode_active(&self, active: bool) {
        self.fast_mode_active.store(active, Ordering::SeqCst);
    }

    pub fn fast_mode_configured(&self) -> bool {
        self.fast_mode_configured.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fast_mode_configured(&self, configured: bool) {
        self.fast_mode_configured.store(configured, Ordering::SeqCst);
    }

    /// Back to standard mode; the next activation starts unconfigured.
    pub fn clear_fast_mode(&self) {
        self.set_fast_mode_active(false);
        self.set_fast_mode_configured(false);
    }

    /// Record that a frame arrived; `true` only for the first one of the session.
    pub fn mark_data_received(&self) -> bool {
        !self.data_received.swap(true, Ordering::SeqCst)
    }

    pub fn data_received(&self) -> bool {
        self.data_received.load(Ordering::SeqCst)
    }
}

/// Issues the fast-mode command sequences on behalf of one power meter.
pub struct FastModeController {
    state: Arc<ControlState>,
    channel: ChannelSlot,
    status: Arc<ModuleStatus>,
    fast_mode: FastModeSettings,
    timing: TimingSettings,
}

impl FastModeController {
    pub fn new(
        state: Arc<ControlState>,
        channel: ChannelSlot,
        status: Arc<ModuleStatus>,
        fast_mode: FastModeSettings,
        timing: TimingSettings,
    ) -> Self {
        Self {
            state,
            channel,
            status,
            fast_mode,
            timing,
        }
    }

    /// Run the requested action, if any.
    ///
    /// A send failure keeps the request so the next tick retries it; any
    /// other outcome returns to `Normal` and lets telemetry decide again.
    pub async fn tick(&self) -> Option<ActionOutcome> {
        let mode = self.state.mode();
        let outcome = match mode {
            ControlMode::Normal => return None,
            ControlMode::ActivateFastMode => self.activate_fast_mode().await,
            ControlMode::ConfigureFastMode => self.configure_fast_mode().await,
            ControlMode::RestoreStandardMode => self.restore_standard_mode().await,
        };

        match outcome {
            ActionOutcome::SendFailed => {
                tracing::warn!("{}: {:?} not sent, retrying next tick", self.status.name(), mode);
            }
            ActionOutcome::Completed | ActionOutcome::TimedOut => self.state.complete(),
        }

        Some(outcome)
    }

    /// Enter fast mode and switch the channel to the fast period once the
    /// first fast page confirms it.
    pub async fn activate_fast_mode(&self) -> ActionOutcome {
        let fast = &self.fast_mode;
        let command = commands::activate(
            fast.timeout_minutes,
            fast.main_frequency_hz,
            fast.interleaved_frequency_hz,
        );

        tracing::info!("{}: activating fast mode", self.status.name());
        if self.send_with_retry(command, 1).await.is_err() {
            return ActionOutcome::SendFailed;
        }

        if !self.wait_for_response(PAGE_FAST_DATA_50HZ).await {
            tracing::warn!("{}: no fast pages after activation", self.status.name());
            return ActionOutcome::TimedOut;
        }

        self.state.set_fast_mode_active(true);
        self.apply_period(fast.fast_period);
        self.status.events().emit(AntEvent::FastModeChanged {
            module: self.status.name(),
            active: true,
        });
        tracing::info!("{}: fast mode active", self.status.name());

        ActionOutcome::Completed
    }

    /// Select the metrics of the fast pages. The device does not confirm
    /// these, so each command is sent several times.
    pub async fn configure_fast_mode(&self) -> ActionOutcome {
        tracing::info!("{}: configuring fast mode", self.status.name());
        self.status.set(ModuleState::Connecting);

        let pages = &self.fast_mode.pages;
        let repeats = self.timing.configure_repeats;
        for command in [commands::configure_a(pages), commands::configure_b(pages)] {
            if self.send_with_retry(command, repeats).await.is_err() {
                tracing::error!("{}: fast mode configuration failed", self.status.name());
                self.status.set(ModuleState::Error);
                return ActionOutcome::SendFailed;
            }
        }

        self.state.set_fast_mode_configured(true);
        self.status.set(ModuleState::Active);
        tracing::info!("{}: fast mode configured", self.status.name());

        ActionOutcome::Completed
    }

    /// Leave fast mode and return the channel to the normal period once a
    /// standard page confirms it.
    pub async fn restore_standard_mode(&self) -> ActionOutcome {
        tracing::info!("{}: restoring standard mode", self.status.name());
        let repeats = self.timing.restore_repeats;
        if self.send_with_retry(commands::restore(), repeats).await.is_err() {
            return ActionOutcome::SendFailed;
        }

        if !self.wait_for_response(PAGE_POWER_ONLY).await {
            tracing::warn!("{}: no standard pages after restore", self.status.name());
            return ActionOutcome::TimedOut;
        }

        let was_active = self.state.fast_mode_active();
        self.state.clear_fast_mode();
        self.apply_period(self.fast_mode.normal_period);
        if was_active {
            self.status.events().emit(AntEvent::FastModeChanged {
                module: self.status.name(),
                active: false,
            });
        }
        tracing::info!("{}: standard mode restored", self.status.name());

        ActionOutcome::Completed
    }

    /// Revert fast mode before the node goes away. One attempt, no retry
    /// beyond the action's own send policy.
    pub async fn shutdown(&self) {
        if self.state.fast_mode_active() {
            tracing::info!("{}: reverting fast mode before exit", self.status.name());
            let _ = self.restore_standard_mode().await;
        }
    }

    /// Send `repeats` copies of `payload` back to back. A transport failure
    /// restarts the whole group, up to `send_attempts` times.
    async fn send_with_retry(&self, payload: [u8; 8], repeats: u32) -> Result<(), AntError> {
        let attempts = self.timing.send_attempts.max(1);
        let mut last_error = AntError::ChannelClosed;

        for attempt in 1..=attempts {
            match self.send_group(payload, repeats).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "{}: send {} failed (try {}/{}): {}",
                        self.status.name(),
                        to_hex_string(&payload),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn send_group(&self, payload: [u8; 8], repeats: u32) -> Result<(), AntError> {
        let channel = self.channel.require()?;
        for _ in 0..repeats.max(1) {
            tracing::debug!("Send COMMAND {}", to_hex_string(&payload));
            channel.send_acknowledged(payload).await?;
        }
        Ok(())
    }

    /// Wait until the decoder reports `page`, polling until the deadline.
    async fn wait_for_response(&self, page: u8) -> bool {
        self.state.pending.arm(page);
        let deadline = Instant::now() + self.timing.response_timeout();

        let received = loop {
            if self.state.pending.is_received() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(self.timing.response_poll()).await;
        };

        self.state.pending.clear();
        received
    }

    fn apply_period(&self, period: u16) {
        let result = self.channel.require().and_then(|ch| ch.set_period(period));
        if let Err(e) = result {
            tracing::error!("{}: failed to set period {}: {}", self.status.name(), period, e);
        }
    }
}
