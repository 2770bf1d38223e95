//! Chain enumeration after power-up.
//!
//! The BIST chip count is only reported once after a broadcast reset, so
//! the sequence runs start to finish exactly once per chain.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::asic::inno::protocol::{BROADCAST, MAX_CHAIN_LENGTH, Register};
use crate::asic::inno::{ChipBus, ProtocolError, pll};
use crate::chip::Chip;
use crate::tracing::prelude::*;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("BIST reported no chips")]
    NoChips,

    #[error("BIST reported {count} chips, more than the {max} a chain can address")]
    TooManyChips { count: usize, max: usize },
}

/// Settle times between detection steps, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DetectTiming {
    pub after_reset_ms: u64,
    pub after_bist_ms: u64,
    pub after_pll_ms: u64,
}

impl Default for DetectTiming {
    fn default() -> Self {
        Self {
            after_reset_ms: 1000,
            after_bist_ms: 1000,
            after_pll_ms: 1000,
        }
    }
}

impl DetectTiming {
    pub const NONE: DetectTiming = DetectTiming {
        after_reset_ms: 0,
        after_bist_ms: 0,
        after_pll_ms: 0,
    };
}

#[derive(Debug, Clone)]
pub struct DetectConfig {
    pub target_mhz: u32,
    /// Cap on the number of chips driven, regardless of what BIST reports.
    pub chip_limit: Option<usize>,
    pub timing: DetectTiming,
}

/// Result of a successful enumeration.
#[derive(Debug)]
pub struct Detected {
    /// Chips reported by BIST.
    pub num_chips: usize,
    /// Chips driven, positions `1..=chips.len()`.
    pub chips: Vec<Chip>,
    pub num_cores: u32,
    pub pll_mhz: u32,
}

fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Reset, self-test and clock the chain, then probe every position.
pub fn detect<T: Transport>(
    bus: &mut ChipBus<T>,
    chain_id: u8,
    config: &DetectConfig,
) -> Result<Detected, DetectError> {
    let generation = bus.generation();

    bus.reset(BROADCAST)?;
    settle(config.timing.after_reset_ms);

    let num_chips = usize::from(bus.bist_start(BROADCAST)?);
    if num_chips == 0 {
        return Err(DetectError::NoChips);
    }
    if num_chips > MAX_CHAIN_LENGTH {
        return Err(DetectError::TooManyChips {
            count: num_chips,
            max: MAX_CHAIN_LENGTH,
        });
    }
    settle(config.timing.after_bist_ms);

    let (pll_register, pll_mhz) = pll::default_register(config.target_mhz);
    if pll_mhz != config.target_mhz {
        warn!(
            chain = chain_id,
            requested = config.target_mhz,
            selected = pll_mhz,
            "Requested clock not in PLL table"
        );
    }
    bus.write_register(BROADCAST, &pll_register)?;
    settle(config.timing.after_pll_ms);

    bus.bist_collect(BROADCAST)?;
    bus.bist_fix(BROADCAST)?;
    bus.write_sec_register(BROADCAST, &Register::tsadc_divider(pll_mhz))?;

    let driven = config
        .chip_limit
        .map_or(num_chips, |limit| limit.min(num_chips));
    if driven < num_chips {
        info!(chain = chain_id, detected = num_chips, driven, "Chip count capped");
    }

    let mut chips = Vec::with_capacity(driven);
    let mut num_cores = 0u32;
    for id in 1..=driven as u8 {
        let mut chip = Chip::new(id);
        match bus.read_register(id) {
            Ok(register) => {
                chip.cores = register.core_count();
                chip.register = Some(register);
                if chip.cores < generation.broken_core_threshold {
                    warn!(chain = chain_id, chip = id, cores = chip.cores, "Broken chip disabled");
                    chip.health.disable();
                } else {
                    if chip.cores < generation.weak_core_threshold {
                        warn!(chain = chain_id, chip = id, cores = chip.cores, "Weak chip");
                    }
                    num_cores += u32::from(chip.cores);
                }
            }
            Err(e) => {
                warn!(chain = chain_id, chip = id, error = %e, "Chip did not answer, disabled");
                chip.cores = 0;
                chip.health.disable();
            }
        }
        chips.push(chip);
    }

    info!(
        chain = chain_id,
        chips = num_chips,
        active = chips.iter().filter(|c| c.health.is_active()).count(),
        cores = num_cores,
        mhz = pll_mhz,
        "Chain detected"
    );

    Ok(Detected {
        num_chips,
        chips,
        num_cores,
        pll_mhz,
    })
}
