//! ANT+ Cycling Power Profile with ROTOR fast-mode extensions
//!
//! Device Type: 11. In fast mode the sensor interleaves three manufacturer
//! pages (0xF2 at the main rate, 0xF3/0xF4 at the interleaved rate), each
//! carrying two (metric id, value) pairs chosen by the configure commands.

use super::{AntProfilePage, PAGE_FAST_DATA_50HZ, PAGE_FAST_DATA_5HZ_A, PAGE_FAST_DATA_5HZ_B};
use crate::sensors::ant::AntDeviceType;
use serde::{Deserialize, Serialize};

/// Milliradians to degrees: 180 / (pi * 1000)
pub const MILLIRAD_TO_DEG: f64 = 0.0572957795130823;

/// Measurement identifiers understood by the fast-mode pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    /// Empty slot
    None,
    /// Crank angle (mrad)
    CrankAngle,
    /// Cadence (rpm / 100)
    Cadence,
    /// Force left (N / 10)
    ForceLeft,
    /// Torque left (Nm / 100)
    TorqueLeft,
    /// Force right (N / 10)
    ForceRight,
    /// Torque right (Nm / 100)
    TorqueRight,
    /// Force total (N / 10)
    ForceTotal,
    /// Torque total (Nm / 100)
    TorqueTotal,
    /// Power (W / 10)
    Power,
    /// Optimal cycling angle (deg / 100)
    OptimalCyclingAngle,
    /// Torque effectiveness left (% / 2)
    TorqueEfficiencyLeft,
    /// Pedal smoothness left (% / 2)
    PedalSmoothnessLeft,
    /// Balance left (% / 100)
    BalanceLeft,
    /// Torque effectiveness right (% / 2). The ROTOR id list names 0x25 for
    /// pedal smoothness right as well; torque effectiveness owns it and the
    /// right pedal smoothness has no id of its own.
    TorqueEfficiencyRight,
    /// Balance right (% / 100)
    BalanceRight,
}

impl MetricId {
    /// Wire value of this identifier
    pub fn code(&self) -> u8 {
        match self {
            MetricId::None => 0x00,
            MetricId::CrankAngle => 0x03,
            MetricId::Cadence => 0x06,
            MetricId::ForceLeft => 0x0A,
            MetricId::TorqueLeft => 0x0B,
            MetricId::ForceRight => 0x0C,
            MetricId::TorqueRight => 0x0D,
            MetricId::ForceTotal => 0x0E,
            MetricId::TorqueTotal => 0x0F,
            MetricId::Power => 0x14,
            MetricId::OptimalCyclingAngle => 0x1C,
            MetricId::TorqueEfficiencyLeft => 0x21,
            MetricId::PedalSmoothnessLeft => 0x22,
            MetricId::BalanceLeft => 0x23,
            MetricId::TorqueEfficiencyRight => 0x25,
            MetricId::BalanceRight => 0x26,
        }
    }

    /// Look up an identifier; unknown codes yield `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        let id = match code {
            0x00 => MetricId::None,
            0x03 => MetricId::CrankAngle,
            0x06 => MetricId::Cadence,
            0x0A => MetricId::ForceLeft,
            0x0B => MetricId::TorqueLeft,
            0x0C => MetricId::ForceRight,
            0x0D => MetricId::TorqueRight,
            0x0E => MetricId::ForceTotal,
            0x0F => MetricId::TorqueTotal,
            0x14 => MetricId::Power,
            0x1C => MetricId::OptimalCyclingAngle,
            0x21 => MetricId::TorqueEfficiencyLeft,
            0x22 => MetricId::PedalSmoothnessLeft,
            0x23 => MetricId::BalanceLeft,
            0x25 => MetricId::TorqueEfficiencyRight,
            0x26 => MetricId::BalanceRight,
            _ => return None,
        };
        Some(id)
    }

    /// Convert a raw wire value to the stored unit.
    pub fn scale(&self, raw: f64) -> f64 {
        match self {
            MetricId::None => raw,
            MetricId::OptimalCyclingAngle => raw / 100.0,
            MetricId::ForceLeft | MetricId::ForceRight | MetricId::ForceTotal => raw / 10.0,
            MetricId::TorqueLeft | MetricId::TorqueRight | MetricId::TorqueTotal => raw / 100.0,
            MetricId::Power => raw / 10.0,
            MetricId::Cadence => raw / 100.0,
            MetricId::CrankAngle => raw * MILLIRAD_TO_DEG,
            MetricId::BalanceLeft | MetricId::BalanceRight => raw / 100.0,
            MetricId::TorqueEfficiencyLeft
            | MetricId::TorqueEfficiencyRight
            | MetricId::PedalSmoothnessLeft => raw / 2.0,
        }
    }
}

/// One of the three fast-mode pages (0xF2, 0xF3, 0xF4)
///
/// ```text
/// 0: page type
/// 1: frame counter
/// 2: id 1     3: value 1 low     4: value 1 high (signed)
/// 5: id 2     6: value 2 low     7: value 2 high (signed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastDataPage {
    pub page: u8,
    pub frame_counter: u8,
    /// First (raw id, raw value) pair
    pub first: (u8, f64),
    /// Second (raw id, raw value) pair
    pub second: (u8, f64),
}

impl AntProfilePage for FastDataPage {
    fn page_number(&self) -> u8 {
        self.page
    }

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 || !is_fast_page(data[0]) {
            return None;
        }

        Some(Self {
            page: data[0],
            frame_counter: data[1],
            first: (data[2], decode_signed(data[3], data[4])),
            second: (data[5], decode_signed(data[6], data[7])),
        })
    }

    fn device_type() -> AntDeviceType {
        AntDeviceType::Power
    }
}

/// Whether `page` is one of the fast-mode pages
pub fn is_fast_page(page: u8) -> bool {
    matches!(
        page,
        PAGE_FAST_DATA_50HZ | PAGE_FAST_DATA_5HZ_A | PAGE_FAST_DATA_5HZ_B
    )
}

/// Decode a little-endian value whose high byte is two's complement.
pub fn decode_signed(low: u8, high: u8) -> f64 {
    let high = if high > 127 { high as i32 - 256 } else { high as i32 };
    (256 * high + low as i32) as f64
}

/// Encode a raw value the way the sensor does (inverse of [`decode_signed`]).
pub fn encode_signed(value: i16) -> (u8, u8) {
    let bytes = value.to_le_bytes();
    (bytes[0], bytes[1])
}

/// Fast-mode page parameter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Two metrics carried by the 0xF2 page
    pub page_f2: [MetricId; 2],
    /// Two metrics carried by the 0xF3 page
    pub page_f3: [MetricId; 2],
    /// Two metrics carried by the 0xF4 page; both `None` makes the sensor
    /// send only 0xF3 interleaved pages
    pub page_f4: [MetricId; 2],
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page_f2: [MetricId::CrankAngle, MetricId::TorqueTotal],
            page_f3: [MetricId::Power, MetricId::Cadence],
            page_f4: [MetricId::None, MetricId::None],
        }
    }
}

/// Fast-mode command builders (acknowledged messages)
pub mod commands {
    use super::PageParams;

    /// Manufacturer command prefix
    pub const COMMAND_PAGE: u8 = 0xF0;

    /// Enter fast mode: main and interleaved rates, sensor-side timeout in minutes
    pub fn activate(timeout_minutes: u8, main_hz: u8, interleaved_hz: u8) -> [u8; 8] {
        [
            COMMAND_PAGE,
            0x03,
            0x00,
            0x00,
            timeout_minutes,
            main_hz,
            interleaved_hz,
            0xFF,
        ]
    }

    /// Select metrics for 0xF2 and 0xF3
    pub fn configure_a(params: &PageParams) -> [u8; 8] {
        [
            COMMAND_PAGE,
            0x04,
            0x00,
            0x00,
            params.page_f2[0].code(),
            params.page_f2[1].code(),
            params.page_f3[0].code(),
            params.page_f3[1].code(),
        ]
    }

    /// Select metrics for 0xF3 and 0xF4
    pub fn configure_b(params: &PageParams) -> [u8; 8] {
        [
            COMMAND_PAGE,
            0x05,
            0x00,
            0x00,
            params.page_f3[0].code(),
            params.page_f3[1].code(),
            params.page_f4[0].code(),
            params.page_f4[1].code(),
        ]
    }

    /// Leave fast mode
    pub fn restore() -> [u8; 8] {
        [COMMAND_PAGE, 0x06, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
    }
}
