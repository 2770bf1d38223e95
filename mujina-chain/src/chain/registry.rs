//! The set of chains the daemon drives, keyed by chain id.
//!
//! Built once at startup, then shared read-only between the worker
//! threads, the fan thread and the emergency path.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Chain, ChainSnapshot};
use crate::tracing::prelude::*;
use crate::work::WorkSink;

#[derive(Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u8, Arc<Chain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain. A chain already registered under the same id is
    /// replaced and returned.
    pub fn insert(&mut self, chain: Chain) -> Option<Arc<Chain>> {
        self.chains.insert(chain.id(), Arc::new(chain))
    }

    pub fn get(&self, id: u8) -> Option<&Arc<Chain>> {
        self.chains.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chain>> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn total_cores(&self) -> u32 {
        self.chains.values().map(|c| c.num_cores()).sum()
    }

    pub fn snapshots(&self) -> Vec<ChainSnapshot> {
        self.chains.values().map(|c| c.snapshot()).collect()
    }

    /// Flush every chain. Returns the number of items handed back.
    pub fn flush_all(&self, sink: &dyn WorkSink) -> usize {
        self.chains.values().map(|c| c.flush(sink)).sum()
    }

    /// Cut power to every chain that has power control, continuing past
    /// failures. Returns the number of chains powered off.
    pub fn cut_power_all(&self) -> usize {
        let mut powered_off = 0;
        for chain in self.chains.values() {
            match chain.cut_power() {
                Ok(true) => powered_off += 1,
                Ok(false) => {}
                Err(e) => error!(chain = chain.id(), error = %e, "Failed to cut chain power"),
            }
        }
        powered_off
    }
}
