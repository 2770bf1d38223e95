//! Chip temperature sampling and fan control.

mod aggregate;
mod config;
mod controller;
mod conversion;
mod emergency;
mod fan_pid;
mod hysteresis;
mod sampler;
mod stats;

pub use aggregate::{AggregateTemp, ThermalAggregate};
pub use config::{FanMode, HysteresisConfig, PidGains, ThermalConfig};
pub use controller::{ControlDecision, FULL_SPEED, FanController};
pub use conversion::TempConversion;
pub use emergency::{EmergencyEvent, EmergencyHandler};
pub use fan_pid::FanPIDController;
pub use hysteresis::HysteresisState;
pub use sampler::{SampleKind, ThermalSampler};
pub use stats::{DEFAULT_TRIM_FRACTION, TempStats, representative};

#[cfg(test)]
pub(crate) use emergency::testing;
