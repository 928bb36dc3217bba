//! OHLCV candle record and a minimal CSV writer.
//!
//! Persistence to disk is named an external collaborator in this crate's
//! scope; the writer here is a thin convenience for the demo binary, not
//! part of the core's required surface.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Fixed-layout OHLCV record. Timestamp is milliseconds since Unix epoch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub cost: f64,
}

/// Writes candles as CSV, one row per candle, header first.
pub fn write_csv<W: Write>(mut writer: W, candles: &[Candle]) -> io::Result<()> {
    writeln!(writer, "ts_ms,open,high,low,close,volume,cost")?;
    for c in candles {
        writeln!(writer, "{},{},{},{},{},{},{}", c.ts_ms, c.open, c.high, c.low, c.close, c.volume, c.cost)?;
    }
    Ok(())
}
