//! GPIO through the legacy `/sys/class/gpio` interface.

use std::fs;
use std::path::{Path, PathBuf};

use crate::hw_trait::gpio::{Gpio, GpioPin, PinMode, PinValue};
use crate::hw_trait::{HwError, Result};
use crate::tracing::prelude::*;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

fn write_attr(path: &Path, value: &str) -> Result<()> {
    trace!(path = %path.display(), value, "sysfs write");
    fs::write(path, value).map_err(|e| HwError::io(path.display().to_string(), e))
}

pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for SysfsGpio {
    type Pin = SysfsGpioPin;

    /// Export the pin unless the kernel already did.
    fn pin(&mut self, number: u32) -> Result<Self::Pin> {
        let dir = self.root.join(format!("gpio{number}"));
        if !dir.exists() {
            write_attr(&self.root.join("export"), &number.to_string())?;
        }
        Ok(SysfsGpioPin { dir, number })
    }
}

pub struct SysfsGpioPin {
    dir: PathBuf,
    number: u32,
}

impl SysfsGpioPin {
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl GpioPin for SysfsGpioPin {
    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        let direction = match mode {
            PinMode::Input => "in",
            PinMode::Output => "out",
        };
        write_attr(&self.dir.join("direction"), direction)
    }

    fn write(&mut self, value: PinValue) -> Result<()> {
        let text = if bool::from(value) { "1" } else { "0" };
        write_attr(&self.dir.join("value"), text)
    }

    fn read(&mut self) -> Result<PinValue> {
        let path = self.dir.join("value");
        let text =
            fs::read_to_string(&path).map_err(|e| HwError::io(path.display().to_string(), e))?;
        match text.trim() {
            "0" => Ok(PinValue::Low),
            "1" => Ok(PinValue::High),
            other => Err(HwError::InvalidParameter(format!(
                "gpio{} value {other:?}",
                self.number
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_export_missing_pin() {
        let root = tempfile::tempdir().unwrap();
        let mut gpio = SysfsGpio::with_root(root.path());

        gpio.pin(42).unwrap();

        let exported = fs::read_to_string(root.path().join("export")).unwrap();
        assert_eq!(exported, "42");
    }

    #[test]
    fn should_drive_and_read_exported_pin() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("gpio7")).unwrap();
        let mut gpio = SysfsGpio::with_root(root.path());

        let mut pin = gpio.pin(7).unwrap();
        pin.set_mode(PinMode::Output).unwrap();
        pin.write(PinValue::High).unwrap();

        let dir = root.path().join("gpio7");
        assert!(!root.path().join("export").exists());
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
        assert_eq!(pin.read().unwrap(), PinValue::High);

        fs::write(dir.join("value"), "0\n").unwrap();
        assert_eq!(pin.read().unwrap(), PinValue::Low);
    }

    #[test]
    fn should_reject_garbage_value() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("gpio3")).unwrap();
        fs::write(root.path().join("gpio3/value"), "x").unwrap();

        let mut pin = SysfsGpio::with_root(root.path()).pin(3).unwrap();
        assert!(matches!(pin.read(), Err(HwError::InvalidParameter(_))));
    }
}
