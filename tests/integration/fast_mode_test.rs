//! Integration tests for the fast-mode handshake against the simulated sensor.

use crate::sensor_mock::Rig;
use antpower::sensors::ant::profiles::power::commands;
use antpower::sensors::ant::{ActionOutcome, ControlMode, ControlledModule, SimulatedPowerMeter};
use antpower::sensors::ModuleState;
use antpower::storage::config::AppConfig;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_activation_switches_channel_to_fast_period() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;

    rig.until_configured(10).await;

    let control = rig.module.control();
    assert!(control.fast_mode_active());
    assert_eq!(control.mode(), ControlMode::Normal);
    assert_eq!(rig.channel.period(), 655);
    assert_eq!(rig.channel.period_changes(), vec![8182, 655]);
    assert_eq!(rig.module.state(), ModuleState::Active);
    assert!(rig.device.is_fast_mode());
    assert_eq!(rig.device.count_sent(commands::activate(60, 50, 5)), 1);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_channel_configured_for_power_meter() {
    let mut config = AppConfig::default();
    config.power_meter.device_id = 54968;
    let rig = Rig::start(config, SimulatedPowerMeter::new()).await;

    assert_eq!(rig.channel.channel_id(), Some((54968, 11, 5)));
    assert!(rig.channel.is_open());
    assert_eq!(rig.module.channel_config().rf_frequency, 57);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_activation_without_response_times_out() {
    let device = SimulatedPowerMeter::new();
    device.set_responding(false);
    let rig = Rig::start(AppConfig::default(), device).await;

    // Battery page, then a power-only page requests activation.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.module.control().mode(), ControlMode::ActivateFastMode);

    let outcome = rig.module.controller().tick().await;
    assert_eq!(outcome, Some(ActionOutcome::TimedOut));
    assert!(!rig.module.control().fast_mode_active());
    assert_eq!(rig.module.control().mode(), ControlMode::Normal);
    assert_eq!(rig.channel.period(), 8182);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_send_retries_until_transport_recovers() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    rig.device.fail_next_sends(9);

    let outcome = rig.module.activate().await;
    assert_eq!(outcome, ActionOutcome::Completed);
    assert_eq!(rig.device.count_sent(commands::activate(60, 50, 5)), 1);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_send_attempts_keep_request() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.module.control().mode(), ControlMode::ActivateFastMode);

    rig.device.fail_next_sends(10);
    let outcome = rig.module.controller().tick().await;
    assert_eq!(outcome, Some(ActionOutcome::SendFailed));
    assert!(rig.device.sent_commands().is_empty());
    assert_eq!(rig.module.control().mode(), ControlMode::ActivateFastMode);

    // Next tick goes through.
    let outcome = rig.module.controller().tick().await;
    assert_eq!(outcome, Some(ActionOutcome::Completed));
    assert!(rig.module.control().fast_mode_active());

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_configure_failure_sets_error() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    assert_eq!(rig.module.activate().await, ActionOutcome::Completed);

    rig.device.fail_next_sends(10);
    assert_eq!(rig.module.configure().await, ActionOutcome::SendFailed);
    assert_eq!(rig.module.state(), ModuleState::Error);
    assert!(!rig.module.control().fast_mode_configured());

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_configure_sends_each_command_twice() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    assert_eq!(rig.module.activate().await, ActionOutcome::Completed);
    assert_eq!(rig.module.configure().await, ActionOutcome::Completed);

    let pages = AppConfig::default().fast_mode.pages;
    assert_eq!(rig.device.count_sent(commands::configure_a(&pages)), 2);
    assert_eq!(rig.device.count_sent(commands::configure_b(&pages)), 2);
    assert_eq!(rig.module.state(), ModuleState::Active);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_restore_sends_seven_copies_and_is_idempotent() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    rig.until_configured(10).await;

    assert_eq!(rig.module.restore().await, ActionOutcome::Completed);
    assert_eq!(rig.device.count_sent(commands::restore()), 7);
    assert!(!rig.device.is_fast_mode());
    assert!(!rig.module.control().fast_mode_active());
    assert!(!rig.module.control().fast_mode_configured());
    assert_eq!(rig.channel.period(), 8182);

    assert_eq!(rig.module.restore().await, ActionOutcome::Completed);
    assert!(!rig.module.control().fast_mode_active());
    assert_eq!(rig.channel.period(), 8182);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_leftover_fast_mode_is_restored_then_reactivated() {
    let rig = Rig::start(
        AppConfig::default(),
        SimulatedPowerMeter::new().already_in_fast_mode(),
    )
    .await;

    // First fast page arrives without any activation from us.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.module.control().mode(), ControlMode::RestoreStandardMode);
    assert_eq!(rig.channel.period(), 655);

    rig.until_configured(15).await;

    let sent = rig.device.sent_commands();
    let first_restore = sent.iter().position(|c| *c == commands::restore()).unwrap();
    let first_activate = sent
        .iter()
        .position(|c| *c == commands::activate(60, 50, 5))
        .unwrap();
    assert!(first_restore < first_activate);
    assert!(rig.device.is_fast_mode());

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_fast_mode_sample_rates() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    rig.until_configured(10).await;

    rig.module.live().rotate_sample_window(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_secs(2)).await;
    let rates = rig.module.live().rotate_sample_window(Duration::from_secs(2));

    assert!((rates.fast_main_hz - 50.0).abs() <= 1.0, "{:?}", rates);
    assert!((rates.fast_interleaved_a_hz - 5.0).abs() <= 0.5, "{:?}", rates);
    assert_eq!(rates.fast_interleaved_b_hz, 0.0);

    let data = rig.module.snapshot();
    assert_eq!(data.power, 250.0);
    assert_eq!(data.cadence, 90.0);
    assert!(data.crank_angle >= 0.0 && data.crank_angle < 360.0);
    assert!((data.torque_total - 26.53).abs() < 0.01);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reverts_only_active_fast_mode() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;

    rig.module.shutdown().await;
    assert_eq!(rig.device.count_sent(commands::restore()), 0);

    rig.until_configured(10).await;
    rig.module.shutdown().await;
    assert_eq!(rig.device.count_sent(commands::restore()), 7);
    assert!(!rig.device.is_fast_mode());

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_sensor_side_timeout_is_followed_and_reactivated() {
    let mut config = AppConfig::default();
    config.fast_mode.timeout_minutes = 1;
    let rig = Rig::start(config, SimulatedPowerMeter::new()).await;
    rig.until_configured(10).await;

    // Sensor drops back to standard pages one minute after activation.
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(!rig.device.is_fast_mode());
    assert!(rig.module.control().fast_mode_active());

    // The window still holds the fast pages sent before the drop.
    rig.window().await;
    assert!(rig.module.control().fast_mode_active());

    rig.window().await;
    assert!(!rig.module.control().fast_mode_active());
    assert!(!rig.module.control().fast_mode_configured());
    assert_eq!(rig.channel.period(), 8182);

    rig.until_configured(10).await;
    assert_eq!(rig.device.count_sent(commands::activate(1, 50, 5)), 2);
    assert_eq!(rig.channel.period(), 655);

    rig.stop();
}

#[tokio::test(start_paused = true)]
async fn test_late_standard_page_does_not_restart_fast_mode() {
    let rig = Rig::start(AppConfig::default(), SimulatedPowerMeter::new()).await;
    rig.until_configured(10).await;

    rig.channel.deliver(&[0x10, 0x01, 0xFF, 0x5A, 0x00, 0x00, 0xC8, 0x00]);
    rig.window().await;
    rig.ticks(3).await;

    let control = rig.module.control();
    assert!(control.fast_mode_active());
    assert!(control.fast_mode_configured());
    assert_eq!(control.mode(), ControlMode::Normal);
    assert_eq!(rig.channel.period(), 655);
    assert_eq!(rig.channel.period_changes(), vec![8182, 655]);
    assert_eq!(rig.device.count_sent(commands::restore()), 0);
    assert_eq!(rig.device.count_sent(commands::activate(60, 50, 5)), 1);

    rig.stop();
}
