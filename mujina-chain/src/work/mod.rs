//! Units of work and the collaborators that supply and retire them.
//!
//! The chain never creates work. A [`WorkSource`] hands it out, the chain
//! holds it while a chip hashes, and every item eventually goes back
//! through [`WorkSink::complete`] exactly once.

pub mod bench;

use serde::Serialize;
use strum::Display;

use crate::asic::inno::difficulty::DifficultyWord;
use crate::asic::inno::protocol::{HEADER_LENGTH, JobParams};

/// Default nonce range searched by one job.
pub const FULL_NONCE_START: u32 = 0x0000_0000;
pub const FULL_NONCE_END: u32 = 0x0fff_ffff;

/// One hash-search job as supplied by the work source.
#[derive(Debug, Clone, PartialEq)]
pub struct Work {
    pub id: u64,
    /// First 76 bytes of the block header: the midstate input followed by
    /// the header tail, in source byte order.
    pub header: [u8; HEADER_LENGTH],
    pub nonce_start: u32,
    pub nonce_end: u32,
    pub share_difficulty: f64,
}

impl Work {
    pub fn new(id: u64, header: [u8; HEADER_LENGTH], share_difficulty: f64) -> Self {
        Self {
            id,
            header,
            nonce_start: FULL_NONCE_START,
            nonce_end: FULL_NONCE_END,
            share_difficulty,
        }
    }

    pub fn with_nonce_range(mut self, start: u32, end: u32) -> Self {
        self.nonce_start = start;
        self.nonce_end = end;
        self
    }

    pub fn job_params(&self, default_difficulty_index: u8) -> JobParams<'_> {
        JobParams {
            header: &self.header,
            nonce_start: self.nonce_start,
            nonce_end: self.nonce_end,
            difficulty: DifficultyWord::for_share(self.share_difficulty, default_difficulty_index),
        }
    }
}

/// Why a work item is being handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum WorkStatus {
    /// A chip hashed it and its slot was reused.
    Consumed,
    /// Flushed before or while hashing.
    Discarded,
    /// The chip could not be given the job.
    Failed,
}

pub trait WorkSource: Send + Sync {
    fn dequeue_next_work(&self) -> Option<Work>;
}

pub trait WorkSink: Send + Sync {
    /// Retire `work`. Called exactly once per item the chain accepted.
    fn complete(&self, work: Work, status: WorkStatus);

    /// Offer a nonce found for `work` by `chip`. Returns whether it was a
    /// valid share.
    fn submit_nonce(&self, work: &Work, chip: u8, nonce: u32) -> bool;
}
