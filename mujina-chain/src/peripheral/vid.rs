//! Core voltage regulator behind `/dev/vidgen0.0`.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;

use crate::hw_trait::{HwError, Result};
use crate::tracing::prelude::*;

pub const VID_DEVICE: &str = "/dev/vidgen0.0";

/// Levels are 7 bits; bit 7 marks the value as valid to the driver.
const VID_ENABLE: u8 = 0x80;
pub const MAX_VID_LEVEL: u8 = 0x7f;

mod ioctl {
    use nix::{ioctl_write_int_bad, request_code_read};

    const VID_IOC_MAGIC: u8 = 100;

    ioctl_write_int_bad!(
        vid_set_level,
        request_code_read!(VID_IOC_MAGIC, 0, std::mem::size_of::<*const std::ffi::c_char>())
    );
}

pub struct VidRegulator {
    path: String,
}

impl VidRegulator {
    pub fn new() -> Self {
        Self {
            path: VID_DEVICE.to_string(),
        }
    }

    pub fn argument(level: u8) -> Result<i32> {
        if level > MAX_VID_LEVEL {
            return Err(HwError::InvalidParameter(format!(
                "VID level {level} above {MAX_VID_LEVEL}"
            )));
        }
        Ok(i32::from(VID_ENABLE | level))
    }

    pub fn apply(&self, level: u8) -> Result<()> {
        let arg = Self::argument(level)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| HwError::io(self.path.clone(), e))?;

        // SAFETY: the fd is open for the duration of the call and the
        // request takes its argument by value.
        unsafe { ioctl::vid_set_level(file.as_raw_fd(), arg) }.map_err(|source| {
            HwError::Ioctl {
                path: self.path.clone(),
                source,
            }
        })?;
        info!(level, "Core voltage level applied");
        Ok(())
    }
}

impl Default for VidRegulator {
    fn default() -> Self {
        Self::new()
    }
}
