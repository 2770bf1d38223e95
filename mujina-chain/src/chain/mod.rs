//! One SPI chain of chips and everything the scan loop does to it.
//!
//! All chain state sits behind a single lock. A scan cycle holds it from
//! start to finish, so a flush or a work offer from another thread sees
//! either the state before the cycle or after it, never a half-dispatched
//! chip.

pub mod detect;
pub mod registry;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::asic::inno::difficulty::DEFAULT_DIFFICULTY_INDEX;
use crate::asic::inno::protocol::JobFrame;
use crate::asic::inno::{ChipBus, ChipGeneration, ProtocolError};
use crate::board::PowerControl;
use crate::chip::health::{HealthPolicy, HealthState, Transition};
use crate::chip::slots::{SlotError, SlotTable};
use crate::chip::{Chip, ChipSnapshot, ChipTemperature};
use crate::hw_trait::HwError;
use crate::thermal::{SampleKind, TempStats, ThermalAggregate, ThermalSampler};
use crate::tracing::prelude::*;
use crate::transport::Transport;
use crate::work::{Work, WorkSink, WorkStatus};

pub use detect::{DetectConfig, DetectError, DetectTiming, Detected, detect};
pub use registry::ChainRegistry;

/// Results read per scan before dispatch gets a turn.
pub const DEFAULT_DRAIN_LIMIT: usize = 256;

/// Pending work allowed per active chip.
pub const QUEUE_DEPTH_PER_CHIP: usize = 2;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("power control: {0}")]
    Power(#[from] HwError),
}

pub type ChainBus = ChipBus<Box<dyn Transport>>;

#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub health: HealthPolicy,
    pub default_difficulty_index: u8,
    pub drain_limit: usize,
    /// Send a reset-job-queue to every active chip when flushing.
    pub reset_queues_on_flush: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            health: HealthPolicy::default(),
            default_difficulty_index: DEFAULT_DIFFICULTY_INDEX,
            drain_limit: DEFAULT_DRAIN_LIMIT,
            reset_queues_on_flush: true,
        }
    }
}

/// What one scan cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// The chain has no working cores left.
    pub idle: bool,
    pub results: usize,
    pub submitted: usize,
    pub stale: usize,
    pub hw_errors: usize,
    pub crc_errors: usize,
    pub dropped: usize,
    pub dispatched: usize,
    pub cooled: usize,
    pub recovered: usize,
    pub disabled: usize,
    /// Statistics refreshed by this cycle's thermal pass, if one ran.
    pub temperature: Option<TempStats>,
}

impl ScanReport {
    /// Nothing came back and nothing went out.
    pub fn is_quiet(&self) -> bool {
        self.results == 0 && self.dispatched == 0
    }
}

/// Chain-wide counters for results that cannot be pinned on a chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChainCounters {
    pub crc_errors: u64,
    /// Results naming an unknown chip or slot, or a chip not active.
    pub dropped_results: u64,
    pub scans: u64,
}

/// Point-in-time view of a chain for operators.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSnapshot {
    pub id: u8,
    pub generation: &'static str,
    pub pll_mhz: u32,
    pub detected_chips: usize,
    pub driven_chips: usize,
    pub active_chips: usize,
    pub cooling_chips: usize,
    pub disabled_chips: usize,
    pub cores: u32,
    pub queued: usize,
    pub hw_errors: u64,
    pub stales: u64,
    pub nonces_found: u64,
    pub nonce_ranges_done: u64,
    pub counters: ChainCounters,
    pub temperature: Option<TempStats>,
    pub chips: Vec<ChipSnapshot>,
}

struct ChainState {
    bus: ChainBus,
    chips: Vec<Chip>,
    num_chips: usize,
    num_cores: u32,
    pll_mhz: u32,
    fifo: VecDeque<Work>,
    counters: ChainCounters,
    sampler: ThermalSampler,
    power: Option<Box<dyn PowerControl>>,
    idle_reported: bool,
}

impl ChainState {
    fn non_disabled(&self) -> usize {
        self.chips
            .iter()
            .filter(|c| c.health.state() != HealthState::Disabled)
            .count()
    }
}

pub struct Chain {
    id: u8,
    generation: &'static ChipGeneration,
    options: ChainOptions,
    aggregate: Option<Arc<ThermalAggregate>>,
    state: Mutex<ChainState>,
}

impl Chain {
    pub fn new(
        id: u8,
        bus: ChainBus,
        detected: Detected,
        options: ChainOptions,
        sampler: ThermalSampler,
    ) -> Self {
        let generation = bus.generation();
        Self {
            id,
            generation,
            options,
            aggregate: None,
            state: Mutex::new(ChainState {
                bus,
                chips: detected.chips,
                num_chips: detected.num_chips,
                num_cores: detected.num_cores,
                pll_mhz: detected.pll_mhz,
                fifo: VecDeque::new(),
                counters: ChainCounters::default(),
                sampler,
                power: None,
                idle_reported: false,
            }),
        }
    }

    pub fn with_power(self, power: Box<dyn PowerControl>) -> Self {
        self.state.lock().power = Some(power);
        self
    }

    /// Publish thermal statistics to the cross-chain view.
    pub fn with_aggregate(mut self, aggregate: Arc<ThermalAggregate>) -> Self {
        aggregate.register_chain(self.id);
        self.aggregate = Some(aggregate);
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn generation(&self) -> &'static ChipGeneration {
        self.generation
    }

    pub fn num_cores(&self) -> u32 {
        self.state.lock().num_cores
    }

    /// Chips not disabled, which bounds the pending queue.
    pub fn active_chips(&self) -> usize {
        self.state.lock().non_disabled()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    /// Accept `work` into the pending queue, or hand it back when the
    /// queue already holds two items per active chip.
    pub fn offer(&self, work: Work) -> Result<(), Work> {
        let mut state = self.state.lock();
        let capacity = QUEUE_DEPTH_PER_CHIP * state.non_disabled();
        if state.fifo.len() >= capacity {
            return Err(work);
        }
        state.fifo.push_back(work);
        Ok(())
    }

    /// Run one scan cycle: thermal sampling when due, result drain,
    /// dispatch and cooldown rechecks.
    pub fn scan_once(&self, sink: &dyn WorkSink, now: Instant) -> Result<ScanReport, ChainError> {
        let mut state = self.state.lock();
        let mut report = ScanReport::default();
        state.counters.scans += 1;

        if state.num_cores == 0 {
            report.idle = true;
            if !state.idle_reported {
                state.idle_reported = true;
                warn!(chain = self.id, "No working cores left, chain idle");
                if let Some(aggregate) = &self.aggregate {
                    aggregate.disable_chain(self.id);
                }
            }
            return Ok(report);
        }

        self.sample_temperature(&mut state, sink, now, &mut report);
        self.drain_results(&mut state, sink, &mut report)?;
        self.dispatch(&mut state, sink, now, &mut report);
        self.recheck_cooling(&mut state, sink, now, &mut report);

        if report.hw_errors > 0 || report.disabled > 0 {
            debug!(chain = self.id, report = ?report, "Scan finished");
        }
        Ok(report)
    }

    fn sample_temperature(
        &self,
        state: &mut ChainState,
        sink: &dyn WorkSink,
        now: Instant,
        report: &mut ScanReport,
    ) {
        let Some(kind) = state.sampler.due(now) else {
            return;
        };

        let stats = match kind {
            SampleKind::Full => {
                for index in 0..state.chips.len() {
                    if let Some(celsius) = self.read_temperature(state, index, sink, now, report) {
                        let id = state.chips[index].id;
                        state.sampler.record(id, celsius);
                    }
                }
                state.sampler.finish_full(now)
            }
            SampleKind::Quick(id) => {
                let celsius =
                    self.read_temperature(state, usize::from(id) - 1, sink, now, report);
                state.sampler.finish_quick(now, celsius)
            }
        };

        if let Some(stats) = stats {
            trace!(
                chain = self.id,
                min = %stats.min,
                max = %stats.max,
                mean = %stats.mean,
                "Chain temperature"
            );
            if let Some(aggregate) = &self.aggregate {
                aggregate.publish(self.id, stats);
            }
        }
        report.temperature = stats;
    }

    fn read_temperature(
        &self,
        state: &mut ChainState,
        index: usize,
        sink: &dyn WorkSink,
        now: Instant,
        report: &mut ScanReport,
    ) -> Option<f32> {
        let ChainState {
            bus,
            chips,
            num_cores,
            ..
        } = state;
        let chip = chips.get_mut(index)?;
        if !chip.health.is_active() {
            return None;
        }
        match bus.read_register(chip.id) {
            Ok(register) => {
                let code = register.temperature_code(self.generation.temp_index);
                let celsius = self.generation.temp_conversion.to_celsius(code);
                chip.register = Some(register);
                chip.temperature = Some(ChipTemperature { code, celsius });
                Some(celsius)
            }
            Err(e) => {
                debug!(chain = self.id, chip = chip.id, error = %e, "Temperature read failed");
                let transition = chip.health.record_failure(now, &self.options.health);
                self.apply_transition(chip, transition, num_cores, sink, report);
                None
            }
        }
    }

    fn drain_results(
        &self,
        state: &mut ChainState,
        sink: &dyn WorkSink,
        report: &mut ScanReport,
    ) -> Result<(), ChainError> {
        let ChainState {
            bus,
            chips,
            counters,
            ..
        } = state;

        for _ in 0..self.options.drain_limit {
            let result = match bus.read_result() {
                Ok(Some(result)) => result,
                Ok(None) => break,
                Err(ProtocolError::Crc { computed, received }) => {
                    report.crc_errors += 1;
                    counters.crc_errors += 1;
                    debug!(
                        chain = self.id,
                        computed = format_args!("{computed:#06x}"),
                        received = format_args!("{received:#06x}"),
                        "Result CRC mismatch, dropped"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            report.results += 1;

            let chip = match chips.get_mut(usize::from(result.chip).wrapping_sub(1)) {
                Some(chip) if SlotTable::<Work>::is_valid_slot(result.slot) => chip,
                _ => {
                    report.dropped += 1;
                    counters.dropped_results += 1;
                    warn!(
                        chain = self.id,
                        chip = result.chip,
                        slot = result.slot,
                        "Result for unknown chip or slot"
                    );
                    continue;
                }
            };
            if !chip.health.is_active() {
                report.dropped += 1;
                counters.dropped_results += 1;
                continue;
            }

            let Some(work) = chip.slots.get(result.slot) else {
                report.stale += 1;
                chip.stats.stales += 1;
                debug!(chain = self.id, chip = chip.id, slot = result.slot, "Stale result");
                continue;
            };

            if sink.submit_nonce(work, chip.id, result.nonce) {
                report.submitted += 1;
                chip.stats.nonces_found += 1;
            } else {
                report.hw_errors += 1;
                chip.stats.hw_errors += 1;
                chip.stats.nonce_ranges_done = chip.stats.nonce_ranges_done.saturating_sub(1);
                debug!(
                    chain = self.id,
                    chip = chip.id,
                    nonce = format_args!("{:#010x}", result.nonce),
                    "Nonce rejected"
                );
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        state: &mut ChainState,
        sink: &dyn WorkSink,
        now: Instant,
        report: &mut ScanReport,
    ) {
        let ChainState {
            bus,
            chips,
            fifo,
            num_cores,
            ..
        } = state;

        for chip in chips.iter_mut() {
            if !chip.health.is_active() {
                continue;
            }

            let register = match bus.read_register(chip.id) {
                Ok(register) => register,
                Err(e) => {
                    warn!(chain = self.id, chip = chip.id, error = %e, "Chip probe failed");
                    let transition = chip.health.record_failure(now, &self.options.health);
                    self.apply_transition(chip, transition, num_cores, sink, report);
                    continue;
                }
            };
            chip.register = Some(register);
            chip.health.record_success();
            if register.is_busy(self.generation.busy_mask) {
                continue;
            }

            let Some(work) = fifo.pop_front() else {
                continue;
            };
            match self.set_work(bus, chip, work, sink) {
                Ok(()) => report.dispatched += 1,
                Err(e) => {
                    warn!(chain = self.id, chip = chip.id, error = %e, "Job write failed");
                    let transition = chip.health.record_failure(now, &self.options.health);
                    self.apply_transition(chip, transition, num_cores, sink, report);
                }
            }
        }
    }

    /// Send `work` to the chip's next slot.
    ///
    /// The slot's previous occupant is retired only once the new job is on
    /// the wire. On failure the work goes back to the sink as failed.
    fn set_work(
        &self,
        bus: &mut ChainBus,
        chip: &mut Chip,
        work: Work,
        sink: &dyn WorkSink,
    ) -> Result<(), ChainError> {
        let previous = chip.slots.release_cursor();
        let slot = match chip.slots.allocate() {
            Ok(slot) => slot,
            Err(e) => {
                Self::restore(chip, previous, sink);
                sink.complete(work, WorkStatus::Failed);
                return Err(e.into());
            }
        };

        let params = work.job_params(self.options.default_difficulty_index);
        let frame = JobFrame::encode(chip.id, slot, &params, self.generation.job_crc);
        if let Err(e) = bus.write_job(&frame) {
            Self::restore(chip, previous, sink);
            sink.complete(work, WorkStatus::Failed);
            return Err(e.into());
        }

        if let Some(previous) = previous {
            sink.complete(previous, WorkStatus::Consumed);
        }
        if let Err(work) = chip.slots.install(slot, work) {
            sink.complete(work, WorkStatus::Failed);
            return Err(SlotError::Exhausted(chip.slots.occupied()).into());
        }
        chip.stats.nonce_ranges_done += 1;
        trace!(chain = self.id, chip = chip.id, slot, "Job dispatched");
        Ok(())
    }

    fn restore(chip: &mut Chip, previous: Option<Work>, sink: &dyn WorkSink) {
        if let Some(previous) = previous {
            if let Err(previous) = chip.slots.restore_cursor(previous) {
                sink.complete(previous, WorkStatus::Discarded);
            }
        }
    }

    fn recheck_cooling(
        &self,
        state: &mut ChainState,
        sink: &dyn WorkSink,
        now: Instant,
        report: &mut ScanReport,
    ) {
        let ChainState {
            bus,
            chips,
            num_cores,
            ..
        } = state;

        for chip in chips.iter_mut() {
            if !chip.health.recheck_due(now, &self.options.health) {
                continue;
            }
            let transition = match bus.read_register(chip.id) {
                Ok(register) => {
                    chip.register = Some(register);
                    chip.health.record_success()
                }
                Err(_) => chip.health.record_failure(now, &self.options.health),
            };
            self.apply_transition(chip, transition, num_cores, sink, report);
        }
    }

    /// Account for a health change. A newly disabled chip gives up its
    /// cores and its in-flight work.
    fn apply_transition(
        &self,
        chip: &mut Chip,
        transition: Transition,
        num_cores: &mut u32,
        sink: &dyn WorkSink,
        report: &mut ScanReport,
    ) {
        match transition {
            Transition::Unchanged | Transition::CooldownRestarted => {}
            Transition::EnteredCooldown => {
                report.cooled += 1;
                info!(chain = self.id, chip = chip.id, "Chip entered cooldown");
            }
            Transition::Recovered => {
                report.recovered += 1;
                info!(chain = self.id, chip = chip.id, "Chip recovered");
            }
            Transition::Disabled => {
                report.disabled += 1;
                *num_cores = num_cores.saturating_sub(u32::from(chip.cores));
                for work in chip.slots.drain() {
                    sink.complete(work, WorkStatus::Discarded);
                }
                warn!(
                    chain = self.id,
                    chip = chip.id,
                    cores = chip.cores,
                    remaining = *num_cores,
                    "Chip disabled"
                );
            }
        }
    }

    /// Return every in-flight and pending item to `sink` as discarded.
    ///
    /// Queue resets are best effort. Returns the number of items returned.
    pub fn flush(&self, sink: &dyn WorkSink) -> usize {
        let mut state = self.state.lock();
        let ChainState {
            bus, chips, fifo, ..
        } = &mut *state;
        let mut returned = 0;

        for chip in chips.iter_mut() {
            for work in chip.slots.drain() {
                sink.complete(work, WorkStatus::Discarded);
                returned += 1;
            }
            if self.options.reset_queues_on_flush && chip.health.is_active() {
                if let Err(e) = bus.reset_job_queue(chip.id) {
                    warn!(chain = self.id, chip = chip.id, error = %e, "Job queue reset failed");
                }
            }
        }
        for work in fifo.drain(..) {
            sink.complete(work, WorkStatus::Discarded);
            returned += 1;
        }
        debug!(chain = self.id, returned, "Chain flushed");
        returned
    }

    /// Drive power enable low. Returns false when the chain has no power
    /// control attached.
    pub fn cut_power(&self) -> Result<bool, ChainError> {
        let mut state = self.state.lock();
        match state.power.as_mut() {
            Some(power) => {
                power.power_off()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn indicate_mining(&self, mining: bool) {
        if let Some(power) = self.state.lock().power.as_mut() {
            if let Err(e) = power.indicate_mining(mining) {
                debug!(chain = self.id, error = %e, "LED update failed");
            }
        }
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.lock();
        let count = |s: HealthState| state.chips.iter().filter(|c| c.health.state() == s).count();
        let sum = |f: fn(&Chip) -> u64| state.chips.iter().map(f).sum::<u64>();

        ChainSnapshot {
            id: self.id,
            generation: self.generation.name,
            pll_mhz: state.pll_mhz,
            detected_chips: state.num_chips,
            driven_chips: state.chips.len(),
            active_chips: count(HealthState::Active),
            cooling_chips: count(HealthState::Cooldown),
            disabled_chips: count(HealthState::Disabled),
            cores: state.num_cores,
            queued: state.fifo.len(),
            hw_errors: sum(|c| c.stats.hw_errors),
            stales: sum(|c| c.stats.stales),
            nonces_found: sum(|c| c.stats.nonces_found),
            nonce_ranges_done: sum(|c| c.stats.nonce_ranges_done),
            counters: state.counters,
            temperature: state.sampler.stats(),
            chips: state.chips.iter().map(Chip::snapshot).collect(),
        }
    }
}
