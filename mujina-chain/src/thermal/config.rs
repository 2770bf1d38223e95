use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::stats::DEFAULT_TRIM_FRACTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    #[default]
    Auto,
    Hysteresis,
    Manual,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Duty (%) produced when the control input sits on target.
    pub offset: f32,
    pub integral_limit: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 5.0,
            ki: 0.03,
            kd: 0.015,
            offset: 70.0,
            integral_limit: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub high_c: f32,
    pub low_c: f32,
    pub high_duty: u8,
    pub low_duty: u8,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            high_c: 65.0,
            low_c: 35.0,
            high_duty: 100,
            low_duty: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Fan PID target (°C).
    pub target_temperature_c: f32,

    /// Fans run flat out at or above this (°C). Must be higher than
    /// `target_temperature_c`.
    pub hot_temperature_c: f32,

    /// Chains are powered off at or above this (°C). Must be higher than
    /// `hot_temperature_c`.
    pub danger_temperature_c: f32,

    pub full_sample_secs: u64,
    pub quick_sample_secs: u64,
    pub trim_fraction: f32,

    pub fan_mode: FanMode,
    /// Duty for `FanMode::Manual` (%).
    pub manual_speed: u8,
    pub pid: PidGains,
    pub hysteresis: HysteresisConfig,

    /// PID output floor stays at `warm_up_min_duty` for this long after start.
    pub warm_up_secs: u64,
    pub warm_up_min_duty: u8,
    pub min_duty: u8,

    /// sysfs PWM chips driven with the same duty. Empty disables the fan thread.
    pub pwm_chips: Vec<u32>,
    pub pwm_period_ns: u32,
    pub fan_tick_ms: u64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            target_temperature_c: 75.0,
            hot_temperature_c: 95.0,
            danger_temperature_c: 110.0,
            full_sample_secs: 60,
            quick_sample_secs: 5,
            trim_fraction: DEFAULT_TRIM_FRACTION,
            fan_mode: FanMode::Auto,
            manual_speed: 100,
            pid: PidGains::default(),
            hysteresis: HysteresisConfig::default(),
            warm_up_secs: 300,
            warm_up_min_duty: 60,
            min_duty: 1,
            pwm_chips: vec![0, 1, 2],
            pwm_period_ns: 100_000,
            fan_tick_ms: 1000,
        }
    }
}

impl ThermalConfig {
    pub fn full_sample_interval(&self) -> Duration {
        Duration::from_secs(self.full_sample_secs)
    }

    pub fn quick_sample_interval(&self) -> Duration {
        Duration::from_secs(self.quick_sample_secs)
    }

    pub fn warm_up(&self) -> Duration {
        Duration::from_secs(self.warm_up_secs)
    }

    pub fn fan_tick(&self) -> Duration {
        Duration::from_millis(self.fan_tick_ms)
    }

    pub fn is_danger(&self, max_c: f32) -> bool {
        max_c >= self.danger_temperature_c
    }
}
