//! Linux spidev transport.

use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use super::{Transport, TransportError};
use crate::tracing::prelude::*;

const DEFAULT_MODE: u8 = 1;
const DEFAULT_BITS_PER_WORD: u8 = 8;
const DEFAULT_SPEED_HZ: u32 = 2_000_000;

mod ioctl {
    use nix::ioctl_write_ptr;

    const SPI_IOC_MAGIC: u8 = b'k';
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );
}

/// Where and how to open a chain's SPI device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub bus: u8,
    pub chip_select: u8,
    pub mode: u8,
    pub bits_per_word: u8,
    pub speed_hz: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            chip_select: 0,
            mode: DEFAULT_MODE,
            bits_per_word: DEFAULT_BITS_PER_WORD,
            speed_hz: DEFAULT_SPEED_HZ,
        }
    }
}

impl SpiConfig {
    pub fn device_path(&self) -> String {
        format!("/dev/spidev{}.{}", self.bus, self.chip_select)
    }
}

/// An open `/dev/spidevB.C` device.
pub struct SpiDev {
    file: File,
}

impl SpiDev {
    pub fn open(config: &SpiConfig) -> Result<Self, TransportError> {
        let path = config.device_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        let fd = file.as_raw_fd();

        // SAFETY: fd is an open spidev descriptor and each pointer refers
        // to a live local of the type the request expects.
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &config.mode).map_err(|e| TransportError::Configure {
                setting: "mode",
                value: config.mode.into(),
                source: e.into(),
            })?;
            ioctl::spi_ioc_wr_bits_per_word(fd, &config.bits_per_word).map_err(|e| {
                TransportError::Configure {
                    setting: "bits per word",
                    value: config.bits_per_word.into(),
                    source: e.into(),
                }
            })?;
            ioctl::spi_ioc_wr_max_speed_hz(fd, &config.speed_hz).map_err(|e| {
                TransportError::Configure {
                    setting: "speed",
                    value: config.speed_hz,
                    source: e.into(),
                }
            })?;
        }

        info!(
            device = %path,
            mode = config.mode,
            speed_khz = config.speed_hz / 1000,
            "Opened SPI device"
        );

        Ok(Self { file })
    }
}

impl Transport for SpiDev {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.file.read_exact(buf)?;
        Ok(())
    }
}
