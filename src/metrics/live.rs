//! Live power meter values.
//!
//! Every field is an independent atomic: the decoder writes from the
//! transport's delivery path while any number of readers take snapshots.
//! A snapshot is consistent per field only.

use crate::sensors::ant::profiles::power::MetricId;
use crate::sensors::ant::profiles::{PAGE_FAST_DATA_50HZ, PAGE_FAST_DATA_5HZ_A, PAGE_FAST_DATA_5HZ_B};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Battery status value before any battery page was seen
pub const BATTERY_UNKNOWN: i8 = -1;

/// `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Per-page sample counters for one sampling window.
#[derive(Debug, Default)]
pub struct SampleCounters {
    fast_main: AtomicU32,
    fast_interleaved_a: AtomicU32,
    fast_interleaved_b: AtomicU32,
}

impl SampleCounters {
    /// Count a frame; pages other than the fast pages are ignored.
    pub fn record(&self, page: u8) {
        let counter = match page {
            PAGE_FAST_DATA_50HZ => &self.fast_main,
            PAGE_FAST_DATA_5HZ_A => &self.fast_interleaved_a,
            PAGE_FAST_DATA_5HZ_B => &self.fast_interleaved_b,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts as (main, interleaved A, interleaved B).
    pub fn counts(&self) -> (u32, u32, u32) {
        (
            self.fast_main.load(Ordering::Relaxed),
            self.fast_interleaved_a.load(Ordering::Relaxed),
            self.fast_interleaved_b.load(Ordering::Relaxed),
        )
    }

    /// Read and zero the counters in one step each.
    fn take(&self) -> (u32, u32, u32) {
        (
            self.fast_main.swap(0, Ordering::Relaxed),
            self.fast_interleaved_a.swap(0, Ordering::Relaxed),
            self.fast_interleaved_b.swap(0, Ordering::Relaxed),
        )
    }
}

/// Latest decoded values of a fast-mode power meter.
#[derive(Debug)]
pub struct LiveMetrics {
    battery_status: AtomicI8,
    optimal_cycling_angle: AtomicF64,
    force_left: AtomicF64,
    force_right: AtomicF64,
    force_total: AtomicF64,
    torque_left: AtomicF64,
    torque_right: AtomicF64,
    torque_total: AtomicF64,
    power: AtomicF64,
    cadence: AtomicF64,
    crank_angle: AtomicF64,
    balance_left: AtomicF64,
    balance_right: AtomicF64,
    torque_efficiency_left: AtomicF64,
    torque_efficiency_right: AtomicF64,
    pedal_smoothness_left: AtomicF64,
    counters: SampleCounters,
    rate_main: AtomicF64,
    rate_interleaved_a: AtomicF64,
    rate_interleaved_b: AtomicF64,
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            battery_status: AtomicI8::new(BATTERY_UNKNOWN),
            optimal_cycling_angle: AtomicF64::default(),
            force_left: AtomicF64::default(),
            force_right: AtomicF64::default(),
            force_total: AtomicF64::default(),
            torque_left: AtomicF64::default(),
            torque_right: AtomicF64::default(),
            torque_total: AtomicF64::default(),
            power: AtomicF64::default(),
            cadence: AtomicF64::default(),
            crank_angle: AtomicF64::default(),
            balance_left: AtomicF64::default(),
            balance_right: AtomicF64::default(),
            torque_efficiency_left: AtomicF64::default(),
            torque_efficiency_right: AtomicF64::default(),
            pedal_smoothness_left: AtomicF64::default(),
            counters: SampleCounters::default(),
            rate_main: AtomicF64::default(),
            rate_interleaved_a: AtomicF64::default(),
            rate_interleaved_b: AtomicF64::default(),
        }
    }

    fn field(&self, id: MetricId) -> Option<&AtomicF64> {
        let field = match id {
            MetricId::None => return None,
            MetricId::OptimalCyclingAngle => &self.optimal_cycling_angle,
            MetricId::ForceLeft => &self.force_left,
            MetricId::ForceRight => &self.force_right,
            MetricId::ForceTotal => &self.force_total,
            MetricId::TorqueLeft => &self.torque_left,
            MetricId::TorqueRight => &self.torque_right,
            MetricId::TorqueTotal => &self.torque_total,
            MetricId::Power => &self.power,
            MetricId::Cadence => &self.cadence,
            MetricId::CrankAngle => &self.crank_angle,
            MetricId::BalanceLeft => &self.balance_left,
            MetricId::BalanceRight => &self.balance_right,
            MetricId::TorqueEfficiencyLeft => &self.torque_efficiency_left,
            MetricId::TorqueEfficiencyRight => &self.torque_efficiency_right,
            MetricId::PedalSmoothnessLeft => &self.pedal_smoothness_left,
        };
        Some(field)
    }

    /// Scale a raw value for `code` and overwrite its field.
    ///
    /// Returns `false` for unknown or empty ids, which leave every field untouched.
    pub fn update(&self, code: u8, raw: f64) -> bool {
        let Some(id) = MetricId::from_code(code) else {
            return false;
        };
        match self.field(id) {
            Some(field) => {
                field.store(id.scale(raw));
                true
            }
            None => false,
        }
    }

    /// Current value of one metric in its stored unit.
    pub fn get(&self, id: MetricId) -> Option<f64> {
        self.field(id).map(AtomicF64::load)
    }

    pub fn battery_status(&self) -> i8 {
        self.battery_status.load(Ordering::Relaxed)
    }

    pub fn battery_known(&self) -> bool {
        self.battery_status() != BATTERY_UNKNOWN
    }

    /// Store a battery status, returning the previous value.
    pub fn set_battery_status(&self, status: i8) -> i8 {
        self.battery_status.swap(status, Ordering::Relaxed)
    }

    pub fn counters(&self) -> &SampleCounters {
        &self.counters
    }

    /// Close the current sampling window: rates become count / window and
    /// the counters restart from zero.
    pub fn rotate_sample_window(&self, window: Duration) -> SampleRates {
        let secs = window.as_secs_f64();
        let (main, a, b) = self.counters.take();
        let rates = if secs > 0.0 {
            SampleRates {
                fast_main_hz: main as f64 / secs,
                fast_interleaved_a_hz: a as f64 / secs,
                fast_interleaved_b_hz: b as f64 / secs,
            }
        } else {
            SampleRates::default()
        };

        self.rate_main.store(rates.fast_main_hz);
        self.rate_interleaved_a.store(rates.fast_interleaved_a_hz);
        self.rate_interleaved_b.store(rates.fast_interleaved_b_hz);
        rates
    }

    /// Drop the rates and the open window once the link is gone.
    pub fn clear_sample_rates(&self) {
        self.counters.take();
        self.rate_main.store(0.0);
        self.rate_interleaved_a.store(0.0);
        self.rate_interleaved_b.store(0.0);
    }

    pub fn sample_rates(&self) -> SampleRates {
        SampleRates {
            fast_main_hz: self.rate_main.load(),
            fast_interleaved_a_hz: self.rate_interleaved_a.load(),
            fast_interleaved_b_hz: self.rate_interleaved_b.load(),
        }
    }

    /// Owned copy of every field.
    pub fn snapshot(&self) -> PowerMeterData {
        PowerMeterData {
            captured_at: Utc::now(),
            battery_status: self.battery_status(),
            sample_rates: self.sample_rates(),
            optimal_cycling_angle: self.optimal_cycling_angle.load(),
            force_left: self.force_left.load(),
            force_right: self.force_right.load(),
            force_total: self.force_total.load(),
            torque_left: self.torque_left.load(),
            torque_right: self.torque_right.load(),
            torque_total: self.torque_total.load(),
            power: self.power.load(),
            cadence: self.cadence.load(),
            crank_angle: self.crank_angle.load(),
            balance_left: self.balance_left.load(),
            balance_right: self.balance_right.load(),
            torque_efficiency_left: self.torque_efficiency_left.load(),
            torque_efficiency_right: self.torque_efficiency_right.load(),
            pedal_smoothness_left: self.pedal_smoothness_left.load(),
            pedal_smoothness_right: 0.0,
        }
    }
}

/// Sample rates per fast page over the last window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleRates {
    /// 0xF2 page rate
    pub fast_main_hz: f64,
    /// 0xF3 page rate
    pub fast_interleaved_a_hz: f64,
    /// 0xF4 page rate
    pub fast_interleaved_b_hz: f64,
}

/// Snapshot of the live values, safe to hand to other threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerMeterData {
    pub captured_at: DateTime<Utc>,
    /// 3-bit battery status, -1 if unknown
    pub battery_status: i8,
    pub sample_rates: SampleRates,
    /// Degrees
    pub optimal_cycling_angle: f64,
    /// Newtons
    pub force_left: f64,
    pub force_right: f64,
    pub force_total: f64,
    /// Newton-metres
    pub torque_left: f64,
    pub torque_right: f64,
    pub torque_total: f64,
    /// Watts
    pub power: f64,
    /// RPM
    pub cadence: f64,
    /// Degrees
    pub crank_angle: f64,
    /// Percent
    pub balance_left: f64,
    pub balance_right: f64,
    pub torque_efficiency_left: f64,
    pub torque_efficiency_right: f64,
    pub pedal_smoothness_left: f64,
    /// No fast-page id carries this value; always 0
    pub pedal_smoothness_right: f64,
}
