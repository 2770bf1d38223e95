//! Chain daemon: brings up every enabled chain and keeps it hashing.

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use nix::sys::signal::{SigSet, Signal};

use mujina_chain::{
    asic::inno::ChipBus,
    board::{ChainBoard, PowerControl},
    chain::{Chain, ChainRegistry, detect},
    config::{ChainConfig, Config},
    hw_trait::FanPwm,
    peripheral::{FanBank, SysfsGpio, VidRegulator},
    thermal::{EmergencyEvent, EmergencyHandler, FULL_SPEED, FanController, ThermalAggregate},
    tracing::{self, prelude::*},
    transport::{SpiDev, Transport},
    work::{WorkSink, WorkSource, bench::KnownAnswerBench},
    worker::ChainWorker,
};

const MAIN_TICK: Duration = Duration::from_millis(200);

/// Fans to full, every chain off, then exit. Runs on whichever thread saw
/// the temperature first.
struct PowerOffAndExit {
    registry: Arc<ChainRegistry>,
    pwm_chips: Vec<u32>,
    pwm_period_ns: u32,
}

impl EmergencyHandler for PowerOffAndExit {
    fn trip(&self, event: &EmergencyEvent) {
        error!(event = %event, "Thermal emergency, shutting down");

        let mut fans = FanBank::sysfs(&self.pwm_chips, self.pwm_period_ns);
        if let Err(e) = fans.set_duty(FULL_SPEED) {
            error!(error = %e, "Failed to run fans at full speed");
        }
        let powered_off = self.registry.cut_power_all();
        error!(
            powered_off,
            chains = self.registry.len(),
            "Chains powered off after thermal emergency"
        );
        process::exit(1);
    }
}

fn main() -> Result<()> {
    // Block termination signals before any thread starts so that only the
    // signal thread sees them.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("failed to block termination signals")?;

    tracing::init_journald_or_stdout();
    info!("Starting chain daemon.");

    let config = Config::load().context("failed to load configuration")?;
    let generation = config.chip_generation()?;
    info!(
        generation = generation.name,
        chains = ?config.chain_mask.chains().collect::<Vec<_>>(),
        target_mhz = config.target_mhz,
        "Configuration loaded"
    );

    if let Some(level) = config.vid_level {
        VidRegulator::new()
            .apply(level)
            .context("failed to set core voltage")?;
    }

    let aggregate = Arc::new(ThermalAggregate::new());
    let mut gpio = SysfsGpio::new();
    let mut registry = ChainRegistry::new();
    for chain_config in config.enabled_chains() {
        match bring_up(&config, &chain_config, &mut gpio, &aggregate) {
            Ok(Some(chain)) => {
                info!(
                    chain = chain.id(),
                    cores = chain.num_cores(),
                    chips = chain.active_chips(),
                    "Chain ready"
                );
                registry.insert(chain);
            }
            Ok(None) => {}
            Err(e) => error!(
                chain = chain_config.id,
                error = format_args!("{e:#}"),
                "Chain bring-up failed"
            ),
        }
    }
    if registry.is_empty() {
        bail!("no chains detected");
    }
    let registry = Arc::new(registry);

    let emergency: Arc<dyn EmergencyHandler> = Arc::new(PowerOffAndExit {
        registry: registry.clone(),
        pwm_chips: config.thermal.pwm_chips.clone(),
        pwm_period_ns: config.thermal.pwm_period_ns,
    });
    let stop = Arc::new(AtomicBool::new(false));
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    if config.thermal.pwm_chips.is_empty() {
        warn!("No PWM chips configured, fan control disabled");
    } else {
        let fans = FanBank::sysfs(&config.thermal.pwm_chips, config.thermal.pwm_period_ns);
        let controller =
            FanController::new(config.thermal.clone(), aggregate.clone(), fans, emergency.clone());
        let stop = stop.clone();
        threads.push(
            thread::Builder::new()
                .name("fan".into())
                .spawn(move || controller.run(&stop))
                .context("failed to start fan thread")?,
        );
    }

    let bench = Arc::new(KnownAnswerBench::new());
    let source: Arc<dyn WorkSource> = bench.clone();
    let sink: Arc<dyn WorkSink> = bench.clone();
    let mut workers = Vec::new();
    for chain in registry.iter() {
        let worker = ChainWorker::new(
            chain.clone(),
            source.clone(),
            sink.clone(),
            emergency.clone(),
            config.thermal.clone(),
            config.idle_sleep(),
        );
        workers.push(
            worker
                .spawn(stop.clone())
                .with_context(|| format!("failed to start worker for chain {}", chain.id()))?,
        );
    }

    {
        let stop = stop.clone();
        thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                match signals.wait() {
                    Ok(signal) => info!(signal = signal.as_str(), "Shutdown requested"),
                    Err(e) => error!(error = %e, "Waiting for signals failed"),
                }
                stop.store(true, Ordering::Relaxed);
            })
            .context("failed to start signal thread")?;
    }

    let mut last_snapshot = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(MAIN_TICK);
        if last_snapshot.elapsed() >= config.snapshot_interval() {
            last_snapshot = Instant::now();
            log_snapshots(&registry);
            debug!(scores = ?bench.scores(), "Known-answer scores");
        }
        if workers.iter().all(JoinHandle::is_finished) {
            warn!("Every chain worker has stopped");
            stop.store(true, Ordering::Relaxed);
        }
    }

    for handle in workers.into_iter().chain(threads) {
        if handle.join().is_err() {
            error!("A worker thread panicked");
        }
    }
    log_snapshots(&registry);
    info!(completed = bench.completed(), "Chain daemon stopped.");
    Ok(())
}

/// Power the board, open its bus and enumerate the chips.
///
/// Returns `None` for a chain whose board is not plugged in.
fn bring_up(
    config: &Config,
    chain_config: &ChainConfig,
    gpio: &mut SysfsGpio,
    aggregate: &Arc<ThermalAggregate>,
) -> Result<Option<Chain>> {
    let id = chain_config.id;
    let mut board = ChainBoard::open(gpio, id, &chain_config.pins)
        .with_context(|| format!("failed to claim GPIO for chain {id}"))?;
    if !board.power_up()? {
        warn!(chain = id, "Hash board not plugged in, skipping");
        return Ok(None);
    }

    let generation = config.chip_generation()?;
    let spi = SpiDev::open(&chain_config.spi)?;
    let transport: Box<dyn Transport> = Box::new(spi);
    let mut bus = ChipBus::new(transport, generation, config.poll_config(generation));

    let detected = match detect(&mut bus, id, &config.detect_config(chain_config)) {
        Ok(detected) => detected,
        Err(e) => {
            if let Err(power) = board.power_off() {
                warn!(chain = id, error = %power, "Failed to power off undetected chain");
            }
            return Err(e.into());
        }
    };

    let chain = Chain::new(
        id,
        bus,
        detected,
        config.chain_options(),
        config.thermal_sampler(),
    )
    .with_power(Box::new(board))
    .with_aggregate(aggregate.clone());
    Ok(Some(chain))
}

fn log_snapshots(registry: &ChainRegistry) {
    for snapshot in registry.snapshots() {
        info!(
            chain = snapshot.id,
            active = snapshot.active_chips,
            cooling = snapshot.cooling_chips,
            disabled = snapshot.disabled_chips,
            cores = snapshot.cores,
            nonces = snapshot.nonces_found,
            hw_errors = snapshot.hw_errors,
            stales = snapshot.stales,
            crc_errors = snapshot.counters.crc_errors,
            temp_c = ?snapshot.temperature.map(|t| t.mean),
            "Chain status"
        );
        match serde_json::to_string(&snapshot) {
            Ok(json) => trace!(chain = snapshot.id, snapshot = %json, "Chain snapshot"),
            Err(e) => debug!(error = %e, "Snapshot serialization failed"),
        }
    }
}
