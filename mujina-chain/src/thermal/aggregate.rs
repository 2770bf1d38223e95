//! Cross-chain temperature view shared by chain workers and the fan thread.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::stats::TempStats;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateTemp {
    /// At least one enabled chain has not published yet.
    Unknown,
    Known {
        /// Max of the per-chain trimmed means. Drives the fan.
        control_c: f32,
        /// Max of the per-chain maxima. Drives the danger check.
        max_c: f32,
        hottest_chain: u8,
    },
}

#[derive(Debug, Default)]
struct ChainEntry {
    enabled: bool,
    stats: Option<TempStats>,
}

#[derive(Debug, Default)]
struct Inner {
    chains: BTreeMap<u8, ChainEntry>,
    new_data: u64,
}

#[derive(Debug, Default)]
pub struct ThermalAggregate {
    inner: Mutex<Inner>,
}

impl ThermalAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a chain that must publish before the view is known.
    pub fn register_chain(&self, chain: u8) {
        self.inner.lock().chains.insert(
            chain,
            ChainEntry {
                enabled: true,
                stats: None,
            },
        );
    }

    pub fn publish(&self, chain: u8, stats: TempStats) {
        let mut inner = self.inner.lock();
        let entry = inner.chains.entry(chain).or_insert(ChainEntry {
            enabled: true,
            stats: None,
        });
        entry.stats = Some(stats);
        inner.new_data += 1;
    }

    /// Stop waiting on a chain that went idle or lost its power.
    pub fn disable_chain(&self, chain: u8) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.chains.get_mut(&chain) {
            entry.enabled = false;
            entry.stats = None;
            inner.new_data += 1;
        }
    }

    pub fn current(&self) -> AggregateTemp {
        Self::compute(&self.inner.lock())
    }

    /// The current view if anything was published since the last call.
    pub fn take_update(&self) -> Option<AggregateTemp> {
        let mut inner = self.inner.lock();
        if inner.new_data == 0 {
            return None;
        }
        inner.new_data = 0;
        Some(Self::compute(&inner))
    }

    fn compute(inner: &Inner) -> AggregateTemp {
        let mut control: Option<(u8, f32)> = None;
        let mut max_c = f32::MIN;
        for (&chain, entry) in inner.chains.iter().filter(|(_, e)| e.enabled) {
            let Some(stats) = entry.stats else {
                return AggregateTemp::Unknown;
            };
            max_c = max_c.max(stats.max);
            if control.is_none_or(|(_, c)| stats.mean > c) {
                control = Some((chain, stats.mean));
            }
        }
        match control {
            Some((hottest_chain, control_c)) => AggregateTemp::Known {
                control_c,
                max_c,
                hottest_chain,
            },
            None => AggregateTemp::Unknown,
        }
    }
}
