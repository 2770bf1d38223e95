//! Dissector for SPI captures of Innosilicon mining chains.

mod capture;
mod dissect;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

use capture::Direction;

/// Protocol dissector for captured chain SPI traffic
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV capture with `time,direction,hex` rows
    input: PathBuf,

    /// Show raw hex data for each frame
    #[arg(short = 'x', long)]
    hex: bool,

    /// Also print transfers that carry only filler bytes
    #[arg(short = 'a', long)]
    all: bool,

    /// Only show one direction (mosi, miso)
    #[arg(short = 'f', long)]
    filter_direction: Option<String>,

    /// Use absolute timestamps instead of relative (seconds from start)
    #[arg(long)]
    absolute_time: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("mujina_spi_dissect=debug".parse()?),
            )
            .init();
    }
    if args.no_color {
        colored::control::set_override(false);
    }

    let filter = match args.filter_direction.as_deref() {
        None => None,
        Some(name) if name.eq_ignore_ascii_case("mosi") => Some(Direction::Mosi),
        Some(name) if name.eq_ignore_ascii_case("miso") => Some(Direction::Miso),
        Some(name) => anyhow::bail!("unknown direction {name:?}, expected mosi or miso"),
    };

    let transfers = capture::open(&args.input)
        .with_context(|| format!("Failed to read capture file: {:?}", args.input))?;
    tracing::debug!(transfers = transfers.len(), "Capture loaded");

    let start = match (args.absolute_time, transfers.first()) {
        (false, Some(first)) => first.time,
        _ => 0.0,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut crc_failures = 0;
    for transfer in &transfers {
        if filter.is_some_and(|direction| direction != transfer.direction) {
            continue;
        }
        let mut frame = dissect::dissect(transfer);
        if frame.is_filler() && !args.all {
            continue;
        }
        if frame.crc == dissect::CrcStatus::Invalid {
            crc_failures += 1;
        }
        frame.time -= start;
        writeln!(out, "{}", frame.format(args.hex))?;
    }

    if crc_failures > 0 {
        writeln!(out, "{crc_failures} frame(s) failed CRC")?;
    }
    Ok(())
}
