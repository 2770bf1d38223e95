//! Error types for chain protocol operations

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no response to opcode 0x{opcode:02x} within {polled} bytes")]
    NoResponse { opcode: u8, polled: usize },

    #[error("timed out polling for opcode 0x{opcode:02x}")]
    Timeout { opcode: u8 },

    #[error("CRC mismatch: computed 0x{computed:04x}, received 0x{received:04x}")]
    Crc { computed: u16, received: u16 },

    #[error("frame of {len} bytes exceeds the {max} byte command limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("chip {chip} still busy after job queue reset")]
    ChipStillBusy { chip: u8 },

    #[error("chip {chip} did not report busy after accepting a job")]
    JobNotAccepted { chip: u8 },

    #[error("BIST reported {count} chips, chain holds at most {max}")]
    TooManyChips { count: usize, max: usize },
}
