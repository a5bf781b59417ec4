//! Unit tests for the power meter pages and fast-mode commands.

use antpower::sensors::ant::profiles::power::{
    commands, decode_signed, FastDataPage, MetricId, PageParams, MILLIRAD_TO_DEG,
};
use antpower::sensors::ant::profiles::{AntProfilePage, BatteryStatus, PAGE_FAST_DATA_5HZ_B};
use antpower::sensors::ant::{period_to_hz, to_hex_string, AntDeviceType};

// =============================================================================
// Fast Data Pages
// =============================================================================

#[test]
fn test_crank_angle_and_torque_page() {
    // 1000 mrad crank angle, 15.00 Nm total torque
    let data = [0xF2, 0x07, 0x03, 0xE8, 0x03, 0x0F, 0xDC, 0x05];
    let page = FastDataPage::parse(&data).unwrap();

    assert_eq!(page.page_number(), 0xF2);
    assert_eq!(page.frame_counter, 7);

    let angle = MetricId::from_code(page.first.0).unwrap();
    assert_eq!(angle, MetricId::CrankAngle);
    assert!((angle.scale(page.first.1) - 57.2957795).abs() < 1e-6);

    let torque = MetricId::from_code(page.second.0).unwrap();
    assert_eq!(torque.scale(page.second.1), 15.0);
}

#[test]
fn test_negative_torque_value() {
    // High byte above 127 is negative: -2.00 Nm
    let data = [0xF2, 0x00, 0x03, 0x00, 0x00, 0x0F, 0x38, 0xFF];
    let page = FastDataPage::parse(&data).unwrap();

    assert_eq!(page.second.1, -200.0);
    assert_eq!(MetricId::TorqueTotal.scale(page.second.1), -2.0);
}

#[test]
fn test_interleaved_page_b() {
    let data = [PAGE_FAST_DATA_5HZ_B, 0x01, 0x23, 0x88, 0x13, 0x26, 0x88, 0x13];
    let page = FastDataPage::parse(&data).unwrap();

    assert_eq!(MetricId::from_code(page.first.0), Some(MetricId::BalanceLeft));
    assert_eq!(MetricId::BalanceLeft.scale(page.first.1), 50.0);
    assert_eq!(FastDataPage::device_type(), AntDeviceType::Power);
}

#[test]
fn test_non_fast_pages_rejected() {
    assert!(FastDataPage::parse(&[0x10, 0, 0, 0, 0, 0, 0, 0]).is_none());
    assert!(FastDataPage::parse(&[0xF2, 0, 0x03]).is_none());
}

#[test]
fn test_signed_decoding_boundaries() {
    assert_eq!(decode_signed(0xFF, 0x7F), 32767.0);
    assert_eq!(decode_signed(0x00, 0x80), -32768.0);
    assert_eq!(decode_signed(0x00, 200), -14336.0);
}

#[test]
fn test_metric_scales() {
    assert_eq!(MetricId::Power.scale(2500.0), 250.0);
    assert_eq!(MetricId::Cadence.scale(9000.0), 90.0);
    assert_eq!(MetricId::ForceLeft.scale(1234.0), 123.4);
    assert_eq!(MetricId::OptimalCyclingAngle.scale(10550.0), 105.5);
    assert_eq!(MetricId::PedalSmoothnessLeft.scale(50.0), 25.0);
    assert_eq!(MetricId::CrankAngle.scale(1.0), MILLIRAD_TO_DEG);
}

#[test]
fn test_metric_codes_are_distinct() {
    let ids = [
        MetricId::CrankAngle,
        MetricId::Cadence,
        MetricId::ForceLeft,
        MetricId::TorqueLeft,
        MetricId::ForceRight,
        MetricId::TorqueRight,
        MetricId::ForceTotal,
        MetricId::TorqueTotal,
        MetricId::Power,
        MetricId::OptimalCyclingAngle,
        MetricId::TorqueEfficiencyLeft,
        MetricId::PedalSmoothnessLeft,
        MetricId::BalanceLeft,
        MetricId::TorqueEfficiencyRight,
        MetricId::BalanceRight,
    ];

    for id in ids {
        assert_eq!(MetricId::from_code(id.code()), Some(id));
    }
    assert_eq!(MetricId::from_code(0x99), None);
}

#[test]
fn test_shared_right_side_id_is_torque_effectiveness() {
    assert_eq!(MetricId::from_code(0x25), Some(MetricId::TorqueEfficiencyRight));
    assert_eq!(MetricId::from_code(0x24), None);
}

// =============================================================================
// Commands
// =============================================================================

#[test]
fn test_activate_command_layout() {
    assert_eq!(
        commands::activate(60, 50, 5),
        [0xF0, 0x03, 0x00, 0x00, 0x3C, 0x32, 0x05, 0xFF]
    );
}

#[test]
fn test_configure_commands_share_f3_selection() {
    let params = PageParams {
        page_f2: [MetricId::CrankAngle, MetricId::ForceTotal],
        page_f3: [MetricId::Power, MetricId::Cadence],
        page_f4: [MetricId::BalanceLeft, MetricId::BalanceRight],
    };

    assert_eq!(
        commands::configure_a(&params),
        [0xF0, 0x04, 0x00, 0x00, 0x03, 0x0E, 0x14, 0x06]
    );
    assert_eq!(
        commands::configure_b(&params),
        [0xF0, 0x05, 0x00, 0x00, 0x14, 0x06, 0x23, 0x26]
    );
}

#[test]
fn test_default_page_selection() {
    let params = PageParams::default();
    let b = commands::configure_b(&params);
    assert_eq!(&b[6..], &[0x00, 0x00]);
    assert_eq!(
        to_hex_string(&commands::restore()),
        "[ F0 06 00 00 FF FF FF FF ]"
    );
}

// =============================================================================
// Common Pages
// =============================================================================

#[test]
fn test_battery_status_bits() {
    let data = [0x52, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0b0000_1010];
    assert_eq!(BatteryStatus::parse(&data).unwrap().status, 5);
}

#[test]
fn test_channel_periods() {
    assert!((period_to_hz(655) - 50.0).abs() < 0.1);
    assert!((period_to_hz(8182) - 4.0).abs() < 0.01);
}
