//! Fan PWM abstraction.

use super::Result;

/// A fan output driven by duty cycle percentage.
pub trait FanPwm: Send {
    /// Set the fan drive to `percent` (0..=100).
    fn set_duty(&mut self, percent: u8) -> Result<()>;
}
