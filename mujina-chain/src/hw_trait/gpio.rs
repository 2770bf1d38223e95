//! GPIO hardware abstraction trait.

use super::Result;

/// GPIO pin value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        if value { PinValue::High } else { PinValue::Low }
    }
}

impl From<PinValue> for bool {
    fn from(value: PinValue) -> Self {
        matches!(value, PinValue::High)
    }
}

/// GPIO pin mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// GPIO pin abstraction
pub trait GpioPin: Send {
    /// Set the pin mode (input or output).
    fn set_mode(&mut self, mode: PinMode) -> Result<()>;

    /// Write a value to the pin (must be in output mode).
    fn write(&mut self, value: PinValue) -> Result<()>;

    /// Read the current value of the pin.
    fn read(&mut self) -> Result<PinValue>;
}

/// GPIO controller abstraction
pub trait Gpio {
    /// Type of pin references this controller returns
    type Pin: GpioPin;

    /// Get a handle to a specific GPIO pin.
    fn pin(&mut self, number: u32) -> Result<Self::Pin>;
}

impl<P: GpioPin + ?Sized> GpioPin for Box<P> {
    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        (**self).set_mode(mode)
    }

    fn write(&mut self, value: PinValue) -> Result<()> {
        (**self).write(value)
    }

    fn read(&mut self) -> Result<PinValue> {
        (**self).read()
    }
}
