//! Control core for chains of Innosilicon mining ASICs on a shared SPI bus.
//!
//! A chain is detected once at startup, then driven by one worker thread
//! that repeatedly drains results, probes chip health and dispatches work.
//! A separate fan thread folds per-chain temperature statistics into a
//! single PWM duty and owns the over-temperature interlock.

pub mod asic;
pub mod board;
pub mod chain;
pub mod chip;
pub mod config;
pub mod error;
pub mod hw_trait;
pub mod peripheral;
pub mod thermal;
pub mod tracing;
pub mod transport;
pub mod work;
pub mod worker;
