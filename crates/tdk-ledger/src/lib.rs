//! Durable, append-only record of executed fills.
//!
//! One JSON line per trade, flushed on every append, so a crash loses at
//! most the in-flight fill. The whole file is reloaded at startup; loading
//! is tolerant — a missing file or unreadable lines yield whatever can be
//! read, never a startup failure.
//!
//! Alongside the history the ledger maintains a net-position projection
//! (signed shares per symbol), rewritten to a small sidecar JSON document
//! after each append so external tools see positions without replaying the
//! log.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tdk_schemas::TradeRecord;

/// Positions sidecar document shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionsSnapshot {
    /// Net signed quantity per symbol.
    pub positions: BTreeMap<String, i64>,
}

/// Append-only trade history plus its positions projection.
pub struct TradeLedger {
    history_path: PathBuf,
    positions_path: PathBuf,
    entries: Vec<TradeRecord>,
    positions: BTreeMap<String, i64>,
}

impl TradeLedger {
    /// Open the ledger, loading any existing history.
    ///
    /// Parent directories are created; a missing history file means an
    /// empty ledger. Lines that fail to parse are skipped with a warning —
    /// the readable prefix and suffix both survive.
    pub fn open(
        history_path: impl AsRef<Path>,
        positions_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let history_path = history_path.as_ref().to_path_buf();
        let positions_path = positions_path.as_ref().to_path_buf();

        if let Some(parent) = history_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {}", parent.display()))?;
            }
        }

        let entries = load_entries(&history_path);
        let positions = project_positions(&entries);
        info!(
            count = entries.len(),
            path = %history_path.display(),
            "loaded trade history"
        );

        Ok(Self {
            history_path,
            positions_path,
            entries,
            positions,
        })
    }

    /// Append one executed trade. Persisted immediately: the line is
    /// written and flushed before this returns, then the positions sidecar
    /// is rewritten (sidecar failures are logged, not fatal — the log line
    /// is already durable and the projection rebuilds on next load).
    pub fn append(&mut self, record: TradeRecord) -> Result<()> {
        let line = serde_json::to_string(&record).context("serialize trade record")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .with_context(|| format!("open trade history {}", self.history_path.display()))?;
        f.write_all(line.as_bytes())
            .context("write trade record line")?;
        f.write_all(b"\n").context("write trailing newline")?;
        f.flush().context("flush trade history")?;

        *self.positions.entry(record.symbol.clone()).or_insert(0) +=
            record.signed_quantity();
        self.positions.retain(|_, qty| *qty != 0);
        self.entries.push(record);

        if let Err(err) = self.write_positions_snapshot() {
            warn!(error = %err, "positions snapshot write failed");
        }
        Ok(())
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[TradeRecord] {
        &self.entries
    }

    /// Net signed position per symbol, derived from the history.
    pub fn positions(&self) -> &BTreeMap<String, i64> {
        &self.positions
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn write_positions_snapshot(&self) -> Result<()> {
        let doc = PositionsSnapshot {
            positions: self.positions.clone(),
        };
        let json = serde_json::to_string_pretty(&doc).context("serialize positions snapshot")?;
        fs::write(&self.positions_path, json)
            .with_context(|| format!("write {}", self.positions_path.display()))?;
        Ok(())
    }
}

/// Read every parseable line; tolerate anything else.
fn load_entries(path: &Path) -> Vec<TradeRecord> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "trade history unreadable; starting empty");
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(line) {
            Ok(rec) => entries.push(rec),
            Err(err) => {
                warn!(line = idx + 1, error = %err, "skipping corrupt trade history line");
            }
        }
    }
    entries
}

fn project_positions(entries: &[TradeRecord]) -> BTreeMap<String, i64> {
    let mut positions = BTreeMap::new();
    for rec in entries {
        *positions.entry(rec.symbol.clone()).or_insert(0) += rec.signed_quantity();
    }
    positions.retain(|_, qty| *qty != 0);
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tdk_schemas::Side;

    fn record(symbol: &str, side: Side, quantity: i64, price: f64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            commission: 1.0,
            executed_at: Utc::now(),
        }
    }

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (
            dir.path().join("trade_history.jsonl"),
            dir.path().join("positions_snapshot.json"),
        )
    }

    #[test]
    fn missing_file_yields_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let (hist, pos) = paths(&dir);
        let ledger = TradeLedger::open(&hist, &pos).unwrap();
        assert!(ledger.entries().is_empty());
        assert!(ledger.positions().is_empty());
    }

    #[test]
    fn positions_projection_nets_buys_and_sells() {
        let dir = tempfile::tempdir().unwrap();
        let (hist, pos) = paths(&dir);
        let mut ledger = TradeLedger::open(&hist, &pos).unwrap();
        ledger.append(record("AAPL", Side::Buy, 100, 175.0)).unwrap();
        ledger.append(record("AAPL", Side::Sell, 40, 176.0)).unwrap();
        ledger.append(record("TSLA", Side::Sell, 10, 250.0)).unwrap();
        assert_eq!(ledger.positions().get("AAPL"), Some(&60));
        assert_eq!(ledger.positions().get("TSLA"), Some(&-10));
    }

    #[test]
    fn flat_positions_are_dropped_from_projection() {
        let dir = tempfile::tempdir().unwrap();
        let (hist, pos) = paths(&dir);
        let mut ledger = TradeLedger::open(&hist, &pos).unwrap();
        ledger.append(record("SPY", Side::Buy, 5, 450.0)).unwrap();
        ledger.append(record("SPY", Side::Sell, 5, 451.0)).unwrap();
        assert!(ledger.positions().get("SPY").is_none());
    }

    #[test]
    fn corrupt_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (hist, pos) = paths(&dir);
        {
            let mut ledger = TradeLedger::open(&hist, &pos).unwrap();
            ledger.append(record("AAPL", Side::Buy, 100, 175.0)).unwrap();
            ledger.append(record("MSFT", Side::Buy, 10, 415.0)).unwrap();
        }
        // Wedge garbage between the two good lines.
        let raw = fs::read_to_string(&hist).unwrap();
        let mut lines: Vec<&str> = raw.lines().collect();
        lines.insert(1, "{not json at all");
        fs::write(&hist, lines.join("\n")).unwrap();

        let ledger = TradeLedger::open(&hist, &pos).unwrap();
        assert_eq!(ledger.entries().len(), 2);
        assert_eq!(ledger.entries()[0].symbol, "AAPL");
        assert_eq!(ledger.entries()[1].symbol, "MSFT");
    }

    #[test]
    fn positions_sidecar_written_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let (hist, pos) = paths(&dir);
        let mut ledger = TradeLedger::open(&hist, &pos).unwrap();
        ledger.append(record("NVDA", Side::Buy, 25, 430.0)).unwrap();

        let doc: PositionsSnapshot =
            serde_json::from_str(&fs::read_to_string(&pos).unwrap()).unwrap();
        assert_eq!(doc.positions.get("NVDA"), Some(&25));
    }
}
