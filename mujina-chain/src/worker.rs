//! Per-chain scan threads.
//!
//! Each chain gets one OS thread that keeps its pending queue topped up
//! from the work source, runs scan cycles and checks the chain's own
//! temperatures against the danger threshold. The thread stops when the
//! shared stop flag is raised, when the chain has no cores left, or after
//! an over-temperature trip.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::chain::{Chain, ScanReport};
use crate::thermal::{EmergencyEvent, EmergencyHandler, ThermalConfig};
use crate::tracing::prelude::*;
use crate::work::{Work, WorkSink, WorkSource, WorkStatus};

/// Outcome of one worker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep going. `quiet` means nothing moved and the worker may sleep.
    Continue { quiet: bool },
    /// The chain has no working cores left.
    Idle,
    /// The chain crossed the danger threshold and was powered off.
    Tripped,
}

pub struct ChainWorker {
    chain: Arc<Chain>,
    source: Arc<dyn WorkSource>,
    sink: Arc<dyn WorkSink>,
    emergency: Arc<dyn EmergencyHandler>,
    thermal: ThermalConfig,
    idle_sleep: Duration,
    /// Item the chain refused last time, offered again before pulling more.
    pending: Option<Work>,
}

impl ChainWorker {
    pub fn new(
        chain: Arc<Chain>,
        source: Arc<dyn WorkSource>,
        sink: Arc<dyn WorkSink>,
        emergency: Arc<dyn EmergencyHandler>,
        thermal: ThermalConfig,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            chain,
            source,
            sink,
            emergency,
            thermal,
            idle_sleep,
            pending: None,
        }
    }

    /// Run on a named thread until `stop` is raised.
    pub fn spawn(self, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("chain-{}", self.chain.id()))
            .spawn(move || self.run(&stop))
    }

    pub fn run(mut self, stop: &AtomicBool) {
        let id = self.chain.id();
        trace!(chain = id, "Chain worker started.");
        self.chain.indicate_mining(true);

        while !stop.load(Ordering::Relaxed) {
            match self.step(Instant::now()) {
                Step::Continue { quiet: true } => thread::sleep(self.idle_sleep),
                Step::Continue { quiet: false } => {}
                Step::Idle | Step::Tripped => break,
            }
        }

        self.shutdown();
        trace!(chain = id, "Chain worker stopped.");
    }

    /// Top up the queue, run one scan cycle and check the result.
    pub fn step(&mut self, now: Instant) -> Step {
        self.fill();

        let report = match self.chain.scan_once(self.sink.as_ref(), now) {
            Ok(report) => report,
            Err(e) => {
                warn!(chain = self.chain.id(), error = %e, "Scan failed");
                return Step::Continue { quiet: true };
            }
        };

        if report.idle {
            return Step::Idle;
        }
        if self.check_danger(&report) {
            return Step::Tripped;
        }
        Step::Continue {
            quiet: report.is_quiet(),
        }
    }

    fn fill(&mut self) {
        loop {
            let Some(work) = self.pending.take().or_else(|| self.source.dequeue_next_work()) else {
                return;
            };
            if let Err(work) = self.chain.offer(work) {
                self.pending = Some(work);
                return;
            }
        }
    }

    fn check_danger(&self, report: &ScanReport) -> bool {
        let Some(stats) = report.temperature else {
            return false;
        };
        if !self.thermal.is_danger(stats.max) {
            return false;
        }

        let id = self.chain.id();
        error!(
            chain = id,
            max_c = %stats.max,
            danger_c = %self.thermal.danger_temperature_c,
            "Chain over danger temperature, powering off"
        );
        if let Err(e) = self.chain.cut_power() {
            error!(chain = id, error = %e, "Failed to cut chain power");
        }
        self.emergency.trip(&EmergencyEvent {
            chain: Some(id),
            max_c: stats.max,
            reason: "chip temperature at or above danger threshold",
        });
        true
    }

    /// Hand back everything the chain or the worker still holds.
    fn shutdown(&mut self) {
        let sink = self.sink.as_ref();
        let mut returned = self.chain.flush(sink);
        if let Some(work) = self.pending.take() {
            sink.complete(work, WorkStatus::Discarded);
            returned += 1;
        }
        self.chain.indicate_mining(false);
        debug!(chain = self.chain.id(), returned, "Chain worker flushed");
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::asic::inno::generation::A6;
    use crate::asic::inno::{ChipBus, PollConfig};
    use crate::board::PowerControl;
    use crate::chain::{ChainOptions, DetectConfig, DetectTiming, detect};
    use crate::chip::health::HealthPolicy;
    use crate::thermal::ThermalSampler;
    use crate::thermal::testing::RecordingHandler;
    use crate::transport::Transport;
    use crate::transport::sim::SimChain;
    use crate::work::testing::{QueueSource, RecordingSink};

    #[derive(Default)]
    struct PowerLog {
        events: Mutex<Vec<&'static str>>,
    }

    struct LoggedPower(Arc<PowerLog>);

    impl PowerControl for LoggedPower {
        fn power_off(&mut self) -> crate::hw_trait::Result<()> {
            self.0.events.lock().push("off");
            Ok(())
        }

        fn indicate_mining(&mut self, mining: bool) -> crate::hw_trait::Result<()> {
            self.0.events.lock().push(if mining { "led on" } else { "led off" });
            Ok(())
        }
    }

    struct Fixture {
        sim: SimChain,
        source: Arc<QueueSource>,
        sink: Arc<RecordingSink>,
        handler: Arc<RecordingHandler>,
        power: Arc<PowerLog>,
        worker: ChainWorker,
    }

    fn fixture(cores: &[u8], ids: std::ops::Range<u64>, options: ChainOptions) -> Fixture {
        let sim = SimChain::new(&A6, cores);
        let transport: Box<dyn Transport> = Box::new(sim.clone());
        let mut bus = ChipBus::new(
            transport,
            &A6,
            PollConfig {
                max_bytes: 64,
                timeout: Duration::from_secs(1),
            },
        );
        let config = DetectConfig {
            target_mhz: 1000,
            chip_limit: None,
            timing: DetectTiming::NONE,
        };
        let detected = detect(&mut bus, 0, &config).unwrap();
        let sampler = ThermalSampler::new(Duration::from_secs(60), Duration::from_secs(5), 0.0);
        let power = Arc::new(PowerLog::default());
        let chain = Chain::new(0, bus, detected, options, sampler)
            .with_power(Box::new(LoggedPower(power.clone())));

        let source = Arc::new(QueueSource::with_ids(ids));
        let sink = Arc::new(RecordingSink::default());
        let handler = Arc::new(RecordingHandler::default());
        let worker = ChainWorker::new(
            Arc::new(chain),
            source.clone(),
            sink.clone(),
            handler.clone(),
            ThermalConfig::default(),
            Duration::ZERO,
        );
        Fixture {
            sim,
            source,
            sink,
            handler,
            power,
            worker,
        }
    }

    #[test]
    fn should_hold_refused_work_until_queue_has_room() {
        let mut f = fixture(&[40], 0..5, ChainOptions::default());
        f.sim.set_temp_code(1, 438);

        let step = f.worker.step(Instant::now());

        assert_eq!(step, Step::Continue { quiet: false });
        assert_eq!(f.worker.pending.as_ref().map(|w| w.id), Some(2));
        assert_eq!(f.worker.chain.queue_len(), 1);
        assert_eq!(f.source.remaining(), 2);

        f.worker.shutdown();
        assert_eq!(f.sink.completed_ids().len(), 3);
        assert!(
            f.sink
                .completed()
                .iter()
                .all(|(_, status)| *status == WorkStatus::Discarded)
        );
    }

    #[test]
    fn should_trip_once_over_danger_temperature() {
        let mut f = fixture(&[40; 2], 0..0, ChainOptions::default());
        f.sim.set_temp_code(1, 438);
        f.sim.set_temp_code(2, 368);

        assert_eq!(f.worker.step(Instant::now()), Step::Tripped);

        let events = f.handler.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chain, Some(0));
        assert_eq!(events[0].max_c, 110.0);
        assert_eq!(*f.power.events.lock(), vec!["off"]);
    }

    #[test]
    fn should_not_trip_below_danger_temperature() {
        let mut f = fixture(&[40], 0..0, ChainOptions::default());
        f.sim.set_temp_code(1, 369);

        assert_eq!(f.worker.step(Instant::now()), Step::Continue { quiet: true });
        assert_eq!(f.handler.count(), 0);
    }

    #[test]
    fn should_stop_when_chain_goes_idle() {
        let options = ChainOptions {
            health: HealthPolicy {
                cooldown: Duration::ZERO,
                disable_threshold: 1,
            },
            ..Default::default()
        };
        let f = fixture(&[40], 0..3, options);
        f.sim.fail_reads(1, 1);
        let stop = AtomicBool::new(false);

        f.worker.run(&stop);

        assert_eq!(f.handler.count(), 0);
        assert_eq!(f.sink.completed().len(), 3);
        assert_eq!(*f.power.events.lock(), vec!["led on", "led off"]);
    }

    #[test]
    fn should_flush_when_stop_is_raised() {
        let f = fixture(&[40], 0..10, ChainOptions::default());
        f.sim.set_temp_code(1, 438);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = f.worker.spawn(stop.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let handed_out = 10 - f.source.remaining();
        assert_eq!(f.sink.completed().len(), handed_out);
        assert_eq!(f.power.events.lock().last(), Some(&"led off"));
    }
}
