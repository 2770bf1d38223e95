//! Hardware abstraction traits.
//!
//! Board and thermal code drive pins and fans through these traits so the
//! same logic runs against sysfs on the controller board and against
//! in-memory fakes in tests.

pub mod gpio;
pub mod pwm;

pub use gpio::{Gpio, GpioPin, PinMode, PinValue};
pub use pwm::FanPwm;

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I/O error from the underlying sysfs or device node
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid parameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device ioctl failed
    #[error("ioctl on {path} failed: {source}")]
    Ioctl {
        path: String,
        #[source]
        source: nix::Error,
    },
}

impl HwError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        HwError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
