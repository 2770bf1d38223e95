//! Byte transports between the host and a chip chain.
//!
//! The chain protocol only needs to clock bytes out and clock bytes in.
//! Exclusive access comes from ownership: a transport lives inside the
//! chain state and is only reachable while the chain lock is held.

pub mod spidev;

#[cfg(test)]
pub(crate) mod sim;

use thiserror::Error;

pub use spidev::{SpiConfig, SpiDev};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set {setting} to {value}: {source}")]
    Configure {
        setting: &'static str,
        value: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Half-duplex byte channel to one chain.
pub trait Transport: Send {
    /// Clock out every byte of `data`.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Clock in exactly `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(buf)
    }
}
