//! Linux peripheral drivers behind the `hw_trait` interfaces.

pub mod sysfs_gpio;
pub mod sysfs_pwm;
pub mod vid;

pub use sysfs_gpio::{SysfsGpio, SysfsGpioPin};
pub use sysfs_pwm::{FanBank, SysfsPwm};
pub use vid::VidRegulator;
