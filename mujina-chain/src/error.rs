//! Crate-level error type.

use thiserror::Error;

use crate::{
    asic::inno::ProtocolError, chain::ChainError, chain::DetectError, config::ConfigError,
    hw_trait::HwError, transport::TransportError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("detection: {0}")]
    Detect(#[from] DetectError),

    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    #[error("hardware: {0}")]
    Hw(#[from] HwError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
