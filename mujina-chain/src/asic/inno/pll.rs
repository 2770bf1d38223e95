//! Chip clock (PLL) configuration.
//!
//! The first four register bytes hold the PLL word, most significant
//! byte first:
//!
//! ```text
//!  31 30 29 .. 25 24 .. 16 15 14 13 12 .. 8 7 6 5 .. 0
//!  -- -- prediv-- --fbdiv-- 0  1  0  ------ postdiv ---
//! ```
//!
//! The output clock is `12 MHz * fbdiv / (prediv * 2^postdiv)`.

use modular_bitfield::prelude::*;

use super::protocol::{REG_LENGTH, Register};

const REFERENCE_CLOCK_MHZ: u32 = 12;

/// Register bytes after the PLL word, shared by every table entry.
const REGISTER_TAIL: [u8; REG_LENGTH - 4] = [0x00, 0x00, 0x00, 0xA8, 0x00, 0x24, 0xFF, 0xFF];

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllWord {
    #[skip]
    __: B6,
    pub postdiv: B2,
    #[skip]
    __: B5,
    pub fixed: B3,
    pub fbdiv: B9,
    pub prediv: B5,
    #[skip]
    __: B2,
}

impl PllWord {
    pub fn from_register(register: &Register) -> Self {
        let b = register.as_bytes();
        Self::from_bytes([b[3], b[2], b[1], b[0]])
    }

    /// Output frequency in MHz, or `None` for an unprogrammed divider.
    pub fn frequency_mhz(&self) -> Option<u32> {
        let divisor = u32::from(self.prediv()) << self.postdiv();
        (divisor != 0).then(|| REFERENCE_CLOCK_MHZ * u32::from(self.fbdiv()) / divisor)
    }
}

/// Supported clocks and the PLL words that produce them, fastest first.
const PLL_TABLE: [(u32, [u8; 4]); 14] = [
    (1300, [0x07, 0x45, 0x40, 0x00]),
    (1200, [0x07, 0x2C, 0x40, 0x00]),
    (1100, [0x07, 0x13, 0x40, 0x00]),
    (1000, [0x06, 0xFA, 0x40, 0x00]),
    (900, [0x06, 0xE1, 0x40, 0x00]),
    (860, [0x06, 0xD7, 0x40, 0x00]),
    (800, [0x06, 0xC8, 0x40, 0x00]),
    (700, [0x06, 0xAF, 0x40, 0x00]),
    (600, [0x07, 0x2C, 0x40, 0x40]),
    (500, [0x06, 0xFA, 0x40, 0x40]),
    (400, [0x06, 0xC8, 0x40, 0x40]),
    (300, [0x07, 0x2C, 0x40, 0x80]),
    (200, [0x06, 0xC8, 0x40, 0x80]),
    (120, [0x02, 0x50, 0x40, 0xC0]),
];

/// Lowest supported clock, used when a request is below every entry.
pub const MIN_PLL_MHZ: u32 = 120;

/// Default register for the fastest supported clock not above `mhz`.
///
/// Returns the register and the clock actually selected.
pub fn default_register(mhz: u32) -> (Register, u32) {
    let (selected, word) = PLL_TABLE
        .iter()
        .find(|(entry_mhz, _)| *entry_mhz <= mhz)
        .copied()
        .unwrap_or(PLL_TABLE[PLL_TABLE.len() - 1]);

    let mut bytes = [0u8; REG_LENGTH];
    bytes[..4].copy_from_slice(&word);
    bytes[4..].copy_from_slice(&REGISTER_TAIL);
    (Register::new(bytes), selected)
}
