//! Unit tests for configuration loading and saving.

use antpower::sensors::ant::profiles::power::MetricId;
use antpower::storage::config::{load_config_from, save_config_to, AppConfig, ConfigError};
use tempfile::tempdir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = load_config_from(&dir.path().join("config.toml")).unwrap();

    assert_eq!(config, AppConfig::default());
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.power_meter.device_id = 54968;
    config.fast_mode.timeout_minutes = 30;
    config.fast_mode.pages.page_f4 = [MetricId::BalanceLeft, MetricId::BalanceRight];
    save_config_to(&path, &config).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[power_meter\nenabled = yes").unwrap();

    assert!(matches!(load_config_from(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_unknown_metric_name_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[fast_mode.pages]\npage_f2 = [\"crank_angle\", \"wattage\"]\npage_f3 = [\"power\", \"cadence\"]\npage_f4 = [\"none\", \"none\"]\n",
    )
    .unwrap();

    assert!(matches!(load_config_from(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_loaded_config_is_validated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[timing]\ncontrol_tick_ms = 0\n").unwrap();

    assert!(matches!(load_config_from(&path), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_disabled_power_meter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[power_meter]\nenabled = false\n").unwrap();

    let config = load_config_from(&path).unwrap();
    assert!(!config.power_meter.enabled);
    assert_eq!(config.power_meter.transmission_type, 5);
}
