//! Per-cycle records and the append-only log directory
//!
//! Files written under the log directory:
//! - `parameter.yml`: effective instrument/position/feature/model settings
//! - `order.json.txt`, `txn.json.txt`: JSON lines
//! - `rate.<instrument>.tsv`, `sig.<instrument>.tsv`: tab-separated, header on first write

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::TraderConfig;
use crate::error::EngineResult;
use crate::execution::OrderRecord;
use crate::model::{Decision, SignalResult};
use crate::types::{Quote, Transaction};

/// Structured outcome of one decision cycle for one instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    pub time: DateTime<Utc>,
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    /// `open long`, `open short`, `close` or `none`
    pub action: String,
    pub state: String,
    pub signal: String,
    pub mean: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub granularity: Option<String>,
}

impl TurnRecord {
    pub fn new(instrument: &str, quote: &Quote, signal: &SignalResult, decision: &Decision) -> Self {
        Self {
            time: quote.time,
            instrument: instrument.to_string(),
            bid: quote.bid,
            ask: quote.ask,
            action: decision.action.to_string(),
            state: decision.state.to_string(),
            signal: signal.action.to_string(),
            mean: signal.mean,
            ci_lower: signal.ci_lower,
            ci_upper: signal.ci_upper,
            granularity: signal.granularity.as_ref().map(|g| g.code().to_string()),
        }
    }
}

/// Human-readable status line: instrument, bid/ask, net P&L, signal summary, state
pub fn status_line(
    instrument: &str,
    quote: &Quote,
    net_pl: f64,
    signal: &SignalResult,
    decision: &Decision,
) -> String {
    let summary = if signal.log_string.is_empty() {
        format!("{:>36}", "")
    } else {
        signal.log_string.clone()
    };
    format!(
        "{:<8}|{:>10.5} {:>10.5} |{:>10.2} |{} | {}",
        instrument, quote.bid, quote.ask, net_pl, summary, decision.state
    )
}

/// Append-only sink for orders, transactions, rates and signals
pub struct RecordLog {
    dir: PathBuf,
}

impl RecordLog {
    /// Create the directory and write `parameter.yml`
    pub fn create(dir: &Path, config: &TraderConfig) -> EngineResult<Self> {
        fs::create_dir_all(dir)?;
        let params = dir.join("parameter.yml");
        fs::write(&params, config.parameter_dump()?)?;
        info!("Logging to {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_orders(&self, records: &[OrderRecord]) -> EngineResult<()> {
        self.append_json_lines("order.json.txt", records)
    }

    pub fn write_transactions(&self, transactions: &[Transaction]) -> EngineResult<()> {
        self.append_json_lines("txn.json.txt", transactions)
    }

    pub fn write_rates(&self, instrument: &str, quotes: &[Quote]) -> EngineResult<()> {
        self.append_tsv(&format!("rate.{}.tsv", instrument), quotes)
    }

    pub fn write_signal(&self, record: &TurnRecord) -> EngineResult<()> {
        self.append_tsv(
            &format!("sig.{}.tsv", record.instrument),
            std::slice::from_ref(record),
        )
    }

    fn open_append(&self, name: &str) -> EngineResult<(File, bool)> {
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        Ok((file, is_new))
    }

    fn append_json_lines<T: Serialize>(&self, name: &str, rows: &[T]) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let (mut file, _) = self.open_append(name)?;
        for row in rows {
            writeln!(file, "{}", serde_json::to_string(row)?)?;
        }
        file.flush()?;
        Ok(())
    }

    fn append_tsv<T: Serialize>(&self, name: &str, rows: &[T]) -> EngineResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let (file, is_new) = self.open_append(name)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(is_new)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, DecisionState, SignalAction};
    use crate::types::{Granularity, Side};
    use chrono::TimeZone;

    fn quote(sec: u32) -> Quote {
        Quote::new(
            "EUR_USD",
            Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, sec).unwrap(),
            1.1,
            1.1002,
        )
    }

    fn signal() -> SignalResult {
        SignalResult {
            action: SignalAction::Long,
            mean: 0.002,
            ci_lower: 0.0005,
            ci_upper: 0.0035,
            granularity: Some(Granularity::Tick),
            log_string: " LR(TCK):   2.00e-3 [   5.00e-4,   3.50e-3]".to_string(),
        }
    }

    fn opening() -> Decision {
        Decision {
            action: Action::Open(Side::Long),
            state: DecisionState::Opening { from: None, to: Side::Long },
        }
    }

    #[test]
    fn test_status_line_fields() {
        let line = status_line("EUR_USD", &quote(0), -12.5, &signal(), &opening());
        assert!(line.starts_with("EUR_USD "));
        assert!(line.contains("1.10000"));
        assert!(line.contains("1.10020"));
        assert!(line.contains("-12.50"));
        assert!(line.contains("LR(TCK)"));
        assert!(line.ends_with("| -> LONG"));
    }

    #[test]
    fn test_turn_record_fields() {
        let record = TurnRecord::new("EUR_USD", &quote(0), &signal(), &opening());
        assert_eq!(record.action, "open long");
        assert_eq!(record.state, "-> LONG");
        assert_eq!(record.signal, "long");
        assert_eq!(record.granularity.as_deref(), Some("TICK"));
    }

    #[test]
    fn test_log_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecordLog::create(&dir.path().join("log"), &TraderConfig::default()).unwrap();
        assert!(log.dir().join("parameter.yml").exists());

        log.write_rates("EUR_USD", &[quote(0), quote(1)]).unwrap();
        log.write_rates("EUR_USD", &[quote(2)]).unwrap();
        let rates = fs::read_to_string(log.dir().join("rate.EUR_USD.tsv")).unwrap();
        let lines: Vec<&str> = rates.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "instrument\ttime\tbid\task\tvolume");

        let record = TurnRecord::new("EUR_USD", &quote(2), &signal(), &opening());
        log.write_signal(&record).unwrap();
        log.write_signal(&record).unwrap();
        let sig = fs::read_to_string(log.dir().join("sig.EUR_USD.tsv")).unwrap();
        assert_eq!(sig.lines().count(), 3);
        assert!(sig.starts_with("time\tinstrument\tbid\task\taction\tstate"));
    }

    #[test]
    fn test_json_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecordLog::create(dir.path(), &TraderConfig::default()).unwrap();
        let txn = Transaction {
            id: 7,
            instrument: Some("EUR_USD".to_string()),
            units: -100,
            realized_pl: 1.5,
            time: Utc::now(),
            kind: "ORDER_FILL".to_string(),
        };
        log.write_transactions(&[txn.clone()]).unwrap();
        log.write_transactions(&[txn]).unwrap();
        log.write_transactions(&[]).unwrap();
        let text = fs::read_to_string(dir.path().join("txn.json.txt")).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["id"], 7);
    }
}
