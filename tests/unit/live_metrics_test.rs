//! Unit tests for the live value store.

use antpower::metrics::live::{LiveMetrics, BATTERY_UNKNOWN};
use antpower::sensors::ant::profiles::power::MetricId;
use antpower::sensors::ant::profiles::{PAGE_FAST_DATA_50HZ, PAGE_FAST_DATA_5HZ_B};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_every_metric_lands_in_its_own_field() {
    let live = LiveMetrics::new();
    live.update(MetricId::ForceLeft.code(), 1000.0);
    live.update(MetricId::ForceRight.code(), 900.0);
    live.update(MetricId::TorqueEfficiencyRight.code(), 150.0);
    live.update(MetricId::PedalSmoothnessLeft.code(), 40.0);
    assert!(!live.update(0x24, 40.0));

    let data = live.snapshot();
    assert_eq!(data.force_left, 100.0);
    assert_eq!(data.force_right, 90.0);
    assert_eq!(data.torque_efficiency_right, 75.0);
    assert_eq!(data.pedal_smoothness_left, 20.0);
    assert_eq!(data.pedal_smoothness_right, 0.0);
    assert_eq!(data.torque_efficiency_left, 0.0);
}

#[test]
fn test_battery_status_previous_value() {
    let live = LiveMetrics::new();
    assert_eq!(live.set_battery_status(3), BATTERY_UNKNOWN);
    assert_eq!(live.set_battery_status(2), 3);
    assert!(live.battery_known());
}

#[test]
fn test_rates_from_concurrent_writers() {
    let live = Arc::new(LiveMetrics::new());
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let live = live.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    live.counters().record(PAGE_FAST_DATA_50HZ);
                }
                for _ in 0..5 {
                    live.counters().record(PAGE_FAST_DATA_5HZ_B);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let rates = live.rotate_sample_window(Duration::from_secs(2));
    assert_eq!(rates.fast_main_hz, 50.0);
    assert_eq!(rates.fast_interleaved_b_hz, 10.0);

    let next = live.rotate_sample_window(Duration::from_secs(2));
    assert_eq!(next.fast_main_hz, 0.0);
}

#[test]
fn test_snapshot_serializes() {
    let live = LiveMetrics::new();
    live.update(MetricId::Power.code(), 2500.0);

    let json = serde_json::to_value(live.snapshot()).unwrap();
    assert_eq!(json["power"], 250.0);
    assert_eq!(json["battery_status"], -1);
}
