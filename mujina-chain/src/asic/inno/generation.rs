//! Per-generation chip capabilities.
//!
//! A4 and A6 chips share the command set but differ in how responses
//! echo the opcode, where the temperature code sits in the register,
//! whether jobs carry a CRC, and how the sensor code maps to degrees.
//! Each generation is one static [`ChipGeneration`] registered with
//! `inventory::submit!` and selected by name when a chain is built.

use super::protocol::REG_LENGTH;
use crate::thermal::TempConversion;

/// How a polled byte is compared against the opcode awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
    /// The byte must equal the opcode.
    Exact,
    /// Only the low nibble is compared; the high nibble carries a slot.
    LowNibble,
}

impl ResponseMatch {
    pub fn matches(self, byte: u8, opcode: u8) -> bool {
        match self {
            ResponseMatch::Exact => byte == opcode,
            ResponseMatch::LowNibble => byte & 0x0f == opcode,
        }
    }
}

/// What `write_job` does after the frame is on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAck {
    /// Bus acceptance is success.
    None,
    /// Read the register back and require the queue-busy bit.
    WaitBusy,
}

#[derive(Debug)]
pub struct ChipGeneration {
    /// Short name used in configuration, e.g. "a6".
    pub name: &'static str,
    /// Bytes in a register read response and in a register write echo.
    pub reg_len: usize,
    pub response_match: ResponseMatch,
    /// Bit in register byte 9 set while the job queue is full.
    pub busy_mask: u8,
    pub job_ack: JobAck,
    pub job_crc: bool,
    /// Zero bytes clocked after each job frame.
    pub job_trailer: usize,
    /// Index of the big-endian 10-bit temperature code in the register.
    pub temp_index: usize,
    pub temp_conversion: TempConversion,
    /// Chain length the poll bound is derived from.
    pub poll_chips: usize,
    /// Chips with fewer cores than this are logged as weak.
    pub weak_core_threshold: u8,
    /// Chips with fewer cores than this are disabled at detection.
    pub broken_core_threshold: u8,
}

inventory::collect!(ChipGeneration);

pub const A4: ChipGeneration = ChipGeneration {
    name: "a4",
    reg_len: REG_LENGTH,
    response_match: ResponseMatch::Exact,
    busy_mask: 0x01,
    job_ack: JobAck::WaitBusy,
    job_crc: false,
    job_trailer: 0,
    temp_index: 7,
    temp_conversion: TempConversion::A4_TABLE,
    poll_chips: 10,
    weak_core_threshold: 30,
    broken_core_threshold: 26,
};

pub const A6: ChipGeneration = ChipGeneration {
    name: "a6",
    reg_len: REG_LENGTH,
    response_match: ResponseMatch::LowNibble,
    busy_mask: 0x01,
    job_ack: JobAck::None,
    job_crc: true,
    job_trailer: 10,
    temp_index: 7,
    temp_conversion: TempConversion::A6_LINEAR,
    poll_chips: 64,
    weak_core_threshold: 30,
    broken_core_threshold: 26,
};

inventory::submit! { A4 }
inventory::submit! { A6 }

impl ChipGeneration {
    /// Find a registered generation by name, ignoring case.
    pub fn find(name: &str) -> Option<&'static ChipGeneration> {
        inventory::iter::<ChipGeneration>().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    /// Names of every registered generation.
    pub fn names() -> Vec<&'static str> {
        inventory::iter::<ChipGeneration>().map(|g| g.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_find_registered_generations() {
        assert_eq!(ChipGeneration::find("a6").map(|g| g.name), Some("a6"));
        assert_eq!(ChipGeneration::find("A4").map(|g| g.name), Some("a4"));
        assert!(ChipGeneration::find("a5").is_none());
    }

    #[test]
    fn should_match_responses_per_generation() {
        assert!(A6.response_match.matches(0x3C, 0x0C));
        assert!(!A4.response_match.matches(0x3C, 0x0C));
        assert!(A4.response_match.matches(0x0C, 0x0C));
    }
}
