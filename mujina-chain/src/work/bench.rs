//! Known-answer work for exercising a chain without a pool.
//!
//! Every job covers a four-nonce window around a header whose winning
//! nonce is known, so each healthy chip should report that nonce once
//! per job. Per-chip hit and miss counts show which chips hash correctly.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Work, WorkSink, WorkSource, WorkStatus};
use crate::asic::inno::protocol::HEADER_LENGTH;
use crate::tracing::prelude::*;

const BENCH_HEADER: [u8; HEADER_LENGTH] = [
    0x20, 0x00, 0x00, 0x00, 0xd2, 0xc4, 0x31, 0x8d, 0xfe, 0x49, 0xd6, 0xa2, 0x18, 0xea, 0x13, 0xc7,
    0x34, 0x16, 0x8c, 0xfc, 0x5d, 0x2e, 0x8b, 0xff, 0x6b, 0x11, 0xd9, 0x4e, 0x96, 0x6a, 0x5d, 0x8f,
    0x21, 0xc4, 0x72, 0x13, 0x9a, 0x10, 0xb7, 0x8d, 0xa6, 0x07, 0x1f, 0x03, 0xe7, 0x41, 0x48, 0x81,
    0x37, 0x3e, 0xcb, 0x5e, 0x29, 0x64, 0x96, 0xa2, 0xc2, 0xdf, 0x8f, 0xcc, 0x9f, 0x15, 0xa9, 0xab,
    0x7b, 0xba, 0xe7, 0xcd, 0x59, 0xed, 0xd6, 0x01, 0x1a, 0x10, 0x89, 0xd7,
];

const BENCH_NONCE_START: u32 = 0x0198_6d54;
const BENCH_NONCE_END: u32 = 0x0198_6d57;
pub const BENCH_EXPECTED_NONCE: u32 = 0x0198_6d55;
const BENCH_SHARE_DIFFICULTY: f64 = 16384.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChipScore {
    pub good: u64,
    pub bad: u64,
}

/// Work source and sink replaying the known-answer job.
#[derive(Default)]
pub struct KnownAnswerBench {
    next_id: AtomicU64,
    completed: AtomicU64,
    scores: Mutex<BTreeMap<u8, ChipScore>>,
}

impl KnownAnswerBench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scores(&self) -> BTreeMap<u8, ChipScore> {
        self.scores.lock().clone()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl WorkSource for KnownAnswerBench {
    fn dequeue_next_work(&self) -> Option<Work> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Some(
            Work::new(id, BENCH_HEADER, BENCH_SHARE_DIFFICULTY)
                .with_nonce_range(BENCH_NONCE_START, BENCH_NONCE_END),
        )
    }
}

impl WorkSink for KnownAnswerBench {
    fn complete(&self, _work: Work, _status: WorkStatus) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn submit_nonce(&self, work: &Work, chip: u8, nonce: u32) -> bool {
        let good = nonce == BENCH_EXPECTED_NONCE;
        let mut scores = self.scores.lock();
        let score = scores.entry(chip).or_default();
        if good {
            score.good += 1;
        } else {
            score.bad += 1;
            debug!(
                chip,
                work = work.id,
                nonce = format_args!("{:#010x}", nonce),
                "Bench nonce mismatch"
            );
        }
        good
    }
}
