//! Share difficulty encoding for job frames.
//!
//! The chip takes a compact target word. Each table entry halves the
//! target of the previous one, from difficulty 1 at index 0 up to 65536
//! at index 16.

const DIFFICULTY_TABLE: [[u8; 4]; 17] = [
    [0x1e, 0xff, 0xff, 0xff],
    [0x1e, 0x7f, 0xff, 0xff],
    [0x1e, 0x3f, 0xff, 0xff],
    [0x1e, 0x1f, 0xff, 0xff],
    [0x1e, 0x0f, 0xff, 0xff],
    [0x1e, 0x07, 0xff, 0xff],
    [0x1e, 0x03, 0xff, 0xff],
    [0x1e, 0x01, 0xff, 0xff],
    [0x1e, 0x00, 0xff, 0xff],
    [0x1e, 0x00, 0x7f, 0xff],
    [0x1e, 0x00, 0x3f, 0xff],
    [0x1e, 0x00, 0x1f, 0xff],
    [0x1e, 0x00, 0x0f, 0xff],
    [0x1e, 0x00, 0x07, 0xff],
    [0x1e, 0x00, 0x03, 0xff],
    [0x1e, 0x00, 0x01, 0xff],
    [0x1e, 0x00, 0x00, 0xff],
];

/// First table index chosen by share magnitude. Lower entries are only
/// reached through the configured default.
const FIRST_MAGNITUDE_INDEX: usize = 8;

/// Fallback table position (1-based) when the configured one is out of
/// range.
pub const DEFAULT_DIFFICULTY_INDEX: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyWord([u8; 4]);

impl DifficultyWord {
    /// Pick the target word for a share difficulty.
    ///
    /// Difficulties above 255 select entry `k` for the largest `k` with
    /// `difficulty > 2^k - 1`. Smaller ones use `default_index` (1..=8),
    /// falling back to [`DEFAULT_DIFFICULTY_INDEX`].
    pub fn for_share(share_difficulty: f64, default_index: u8) -> Self {
        let by_magnitude = (FIRST_MAGNITUDE_INDEX..DIFFICULTY_TABLE.len())
            .rev()
            .find(|&k| share_difficulty > ((1u64 << k) - 1) as f64);
        let index = if let Some(index) = by_magnitude {
            index
        } else if (1..=8).contains(&default_index) {
            usize::from(default_index - 1)
        } else {
            usize::from(DEFAULT_DIFFICULTY_INDEX - 1)
        };
        Self(DIFFICULTY_TABLE[index])
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}
