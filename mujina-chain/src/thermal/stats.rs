//! Per-chain temperature statistics.

use serde::Serialize;

/// Fraction of samples dropped from each end before averaging.
pub const DEFAULT_TRIM_FRACTION: f32 = 5.0 / 72.0;

/// Summary of one sampling pass over a chain.
///
/// `min` and `max` are taken before trimming so a single hot chip still
/// reaches the danger check; `mean` is the trimmed mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempStats {
    pub min: f32,
    pub max: f32,
    pub median: f32,
    pub mean: f32,
    pub samples: usize,
}

impl TempStats {
    pub fn from_samples(samples: &[f32], trim_fraction: f32) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f32::total_cmp);

        let n = sorted.len();
        let trim = ((n as f32 * trim_fraction).floor() as usize).min((n - 1) / 2);
        let kept = &sorted[trim..n - trim];
        let mean = kept.iter().sum::<f32>() / kept.len() as f32;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            median,
            mean,
            samples: n,
        })
    }

    /// Move every statistic by `delta`, for incremental updates from a
    /// single representative chip.
    pub fn shifted(&self, delta: f32) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
            median: self.median + delta,
            mean: self.mean + delta,
            samples: self.samples,
        }
    }
}

/// Chip whose reading is closest to `mean`.
pub fn representative(samples: &[(u8, f32)], mean: f32) -> Option<(u8, f32)> {
    samples
        .iter()
        .copied()
        .min_by(|a, b| (a.1 - mean).abs().total_cmp(&(b.1 - mean).abs()))
}
