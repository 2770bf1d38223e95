//! One ASIC on a chain.

pub mod health;
pub mod slots;

use serde::Serialize;

use crate::asic::inno::protocol::Register;
use crate::work::Work;
use health::{ChipHealth, HealthState};
use slots::SlotTable;

/// Per-chip counters exposed to operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChipStats {
    /// Nonces the work sink rejected.
    pub hw_errors: u64,
    /// Results for a slot that no longer held a job.
    pub stales: u64,
    pub nonces_found: u64,
    /// Jobs successfully written to the chip.
    pub nonce_ranges_done: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChipTemperature {
    pub code: u16,
    pub celsius: f32,
}

#[derive(Debug)]
pub struct Chip {
    /// 1-based position on the chain; also the chip's bus address.
    pub id: u8,
    pub cores: u8,
    pub register: Option<Register>,
    pub health: ChipHealth,
    pub slots: SlotTable<Work>,
    pub stats: ChipStats,
    pub temperature: Option<ChipTemperature>,
}

impl Chip {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            cores: 0,
            register: None,
            health: ChipHealth::default(),
            slots: SlotTable::new(),
            stats: ChipStats::default(),
            temperature: None,
        }
    }

    pub fn snapshot(&self) -> ChipSnapshot {
        ChipSnapshot {
            id: self.id,
            cores: self.cores,
            state: self.health.state(),
            fail_count: self.health.fail_count(),
            jobs_in_flight: self.slots.occupied(),
            stats: self.stats,
            temperature_c: self.temperature.map(|t| t.celsius),
        }
    }
}

/// Point-in-time view of one chip.
#[derive(Debug, Clone, Serialize)]
pub struct ChipSnapshot {
    pub id: u8,
    pub cores: u8,
    pub state: HealthState,
    pub fail_count: u32,
    pub jobs_in_flight: usize,
    pub stats: ChipStats,
    pub temperature_c: Option<f32>,
}
