//! SPI capture parsing.
//!
//! Captures are CSV with one transfer per row:
//!
//! ```text
//! time,direction,hex
//! 0.001200,mosi,0a01
//! 0.001250,miso,000000001a01...
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Which SPI line a transfer was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host to chain
    Mosi,
    /// Chain to host
    Miso,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    time: f64,
    direction: Direction,
    hex: String,
}

/// One captured transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub time: f64,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

pub fn open(path: &Path) -> Result<Vec<Transfer>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read(file)
}

/// Parse every row of a capture. Whitespace inside the hex column is
/// ignored so byte-spaced dumps can be pasted in as is.
pub fn read<R: Read>(reader: R) -> Result<Vec<Transfer>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut transfers = Vec::new();
    for (index, row) in reader.deserialize::<RawRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = row.with_context(|| format!("Malformed row on line {line}"))?;
        let digits: String = row.hex.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&digits)
            .with_context(|| format!("Bad hex on line {line}: {:?}", row.hex))?;
        transfers.push(Transfer {
            time: row.time,
            direction: row.direction,
            bytes,
        });
    }
    Ok(transfers)
}
