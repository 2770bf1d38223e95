//! Fan PWM through `/sys/class/pwm`.
//!
//! The fan drive is inverted: the value written to `duty_cycle` is the
//! off-time, so a requested 100 % becomes 0 ns.

use std::fs;
use std::path::{Path, PathBuf};

use crate::hw_trait::{FanPwm, HwError, Result};
use crate::tracing::prelude::*;

pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";
pub const DEFAULT_PERIOD_NS: u32 = 100_000;

fn write_attr(path: &Path, value: &str) -> Result<()> {
    trace!(path = %path.display(), value, "sysfs write");
    fs::write(path, value).map_err(|e| HwError::io(path.display().to_string(), e))
}

/// Channel 0 of one `pwmchipN`.
pub struct SysfsPwm {
    chip_dir: PathBuf,
    period_ns: u32,
    initialized: bool,
}

impl SysfsPwm {
    pub fn new(root: impl AsRef<Path>, chip: u32, period_ns: u32) -> Self {
        Self {
            chip_dir: root.as_ref().join(format!("pwmchip{chip}")),
            period_ns,
            initialized: false,
        }
    }

    fn channel(&self, attr: &str) -> PathBuf {
        self.chip_dir.join("pwm0").join(attr)
    }

    fn initialize(&mut self) -> Result<()> {
        // Export fails with EBUSY when the channel is already exported.
        if let Err(e) = write_attr(&self.chip_dir.join("export"), "0") {
            debug!(error = %e, "PWM export failed, assuming already exported");
        }
        write_attr(&self.channel("period"), &self.period_ns.to_string())?;
        write_attr(&self.channel("enable"), "1")?;
        self.initialized = true;
        Ok(())
    }

    pub fn off_time_ns(&self, percent: u8) -> u32 {
        let percent = u32::from(percent.min(100));
        (100 - percent) * self.period_ns / 100
    }
}

impl FanPwm for SysfsPwm {
    fn set_duty(&mut self, percent: u8) -> Result<()> {
        if !self.initialized {
            self.initialize()?;
        }
        write_attr(
            &self.channel("duty_cycle"),
            &self.off_time_ns(percent).to_string(),
        )
    }
}

/// Every configured fan PWM, driven with the same duty.
pub struct FanBank {
    outputs: Vec<SysfsPwm>,
}

impl FanBank {
    pub fn new(root: impl AsRef<Path>, chips: &[u32], period_ns: u32) -> Self {
        Self {
            outputs: chips
                .iter()
                .map(|&chip| SysfsPwm::new(root.as_ref(), chip, period_ns))
                .collect(),
        }
    }

    pub fn sysfs(chips: &[u32], period_ns: u32) -> Self {
        Self::new(SYSFS_PWM_ROOT, chips, period_ns)
    }
}

impl FanPwm for FanBank {
    fn set_duty(&mut self, percent: u8) -> Result<()> {
        for output in &mut self.outputs {
            output.set_duty(percent)?;
        }
        Ok(())
    }
}
