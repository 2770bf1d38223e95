//! Sampling schedule for one chain.
//!
//! A full pass reads every active chip, replaces the chain statistics and
//! picks the chip closest to the trimmed mean as representative. Between
//! full passes, quick passes re-read only that chip and shift the last
//! statistics by how far it moved.

use std::time::{Duration, Instant};

use super::stats::{TempStats, representative};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Full,
    /// Re-read only this chip.
    Quick(u8),
}

#[derive(Debug)]
pub struct ThermalSampler {
    full_interval: Duration,
    quick_interval: Duration,
    trim_fraction: f32,
    last_full: Option<Instant>,
    last_quick: Option<Instant>,
    /// Readings collected during the current full pass.
    samples: Vec<(u8, f32)>,
    representative: Option<(u8, f32)>,
    stats: Option<TempStats>,
}

impl ThermalSampler {
    pub fn new(full_interval: Duration, quick_interval: Duration, trim_fraction: f32) -> Self {
        Self {
            full_interval,
            quick_interval,
            trim_fraction,
            last_full: None,
            last_quick: None,
            samples: Vec::new(),
            representative: None,
            stats: None,
        }
    }

    pub fn stats(&self) -> Option<TempStats> {
        self.stats
    }

    /// Which pass, if any, is due at `now`.
    pub fn due(&self, now: Instant) -> Option<SampleKind> {
        let elapsed = |last: Option<Instant>, interval| {
            last.is_none_or(|t| now.saturating_duration_since(t) >= interval)
        };
        if elapsed(self.last_full, self.full_interval) {
            return Some(SampleKind::Full);
        }
        let (chip, _) = self.representative?;
        elapsed(self.last_quick, self.quick_interval).then_some(SampleKind::Quick(chip))
    }

    /// Add one chip's reading to the full pass in progress.
    pub fn record(&mut self, chip: u8, celsius: f32) {
        self.samples.push((chip, celsius));
    }

    /// Close a full pass. The collected samples are consumed.
    pub fn finish_full(&mut self, now: Instant) -> Option<TempStats> {
        let readings: Vec<f32> = self.samples.iter().map(|(_, c)| *c).collect();
        self.stats = TempStats::from_samples(&readings, self.trim_fraction);
        self.representative = self
            .stats
            .and_then(|s| representative(&self.samples, s.mean));
        self.samples.clear();
        self.last_full = Some(now);
        self.last_quick = Some(now);
        self.stats
    }

    /// Close a quick pass with the representative's new reading, or
    /// `None` if it could not be read.
    pub fn finish_quick(&mut self, now: Instant, celsius: Option<f32>) -> Option<TempStats> {
        self.last_quick = Some(now);
        let (chip, previous) = self.representative?;
        let celsius = celsius?;
        self.stats = self.stats.map(|s| s.shifted(celsius - previous));
        self.representative = Some((chip, celsius));
        self.stats
    }
}
