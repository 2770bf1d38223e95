//! Innosilicon A4/A6 SPI chain protocol.
//!
//! Every exchange is send-then-poll: the host clocks out a short command,
//! then reads two bytes at a time until the expected opcode echoes back
//! from the chain, then reads the rest of the response.

pub mod commands;
pub mod crc;
pub mod difficulty;
pub mod error;
pub mod generation;
pub mod pll;
pub mod protocol;

pub use commands::{ChipBus, PollConfig};
pub use error::ProtocolError;
pub use generation::ChipGeneration;
