//! Append-only JSONL evidence ledger for recovery runs.
//!
//! Every re-linked orphan, salvaged sector, and rescued slack region
//! produces a durable [`EvidenceRecord`]. Records are persisted as
//! one-JSON-object-per-line for streaming reads; the writer flushes after
//! every record so a crash loses at most the line in flight.

use crate::recover::RecoveryMode;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Ledger file name inside the artifact directory.
pub const LEDGER_FILE_NAME: &str = "recovery-ledger.jsonl";

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Returns 0 if the system clock is unavailable or before the epoch.
fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// One recovered item, as written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub timestamp_ns: u64,
    pub mode: RecoveryMode,
    /// Source sector for sector-scoped finds (modes 0 and 1).
    pub sector: Option<u32>,
    /// Source file name for file-scoped finds (mode 2).
    pub source_name: Option<String>,
    /// Directory entry (mode 0) or host file (modes 1 and 2) produced.
    pub artifact: String,
    /// Bytes referenced or rescued.
    pub bytes: u64,
}

impl EvidenceRecord {
    #[must_use]
    pub fn orphan_relinked(sector: u32, artifact: &str, bytes: u64) -> Self {
        Self {
            timestamp_ns: now_ns(),
            mode: RecoveryMode::OrphanedInodes,
            sector: Some(sector),
            source_name: None,
            artifact: artifact.to_string(),
            bytes,
        }
    }

    #[must_use]
    pub fn sector_salvaged(sector: u32, artifact: &str, bytes: u64) -> Self {
        Self {
            timestamp_ns: now_ns(),
            mode: RecoveryMode::RawSalvage,
            sector: Some(sector),
            source_name: None,
            artifact: artifact.to_string(),
            bytes,
        }
    }

    #[must_use]
    pub fn slack_recovered(source_name: &str, artifact: &str, bytes: u64) -> Self {
        Self {
            timestamp_ns: now_ns(),
            mode: RecoveryMode::TailSlack,
            sector: None,
            source_name: Some(source_name.to_string()),
            artifact: artifact.to_string(),
            bytes,
        }
    }
}

/// Append-only writer of [`EvidenceRecord`] lines.
pub struct RecoveryLedger<W: Write> {
    out: W,
}

impl<W: Write> RecoveryLedger<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Append one record and flush it.
    pub fn append(&mut self, record: &EvidenceRecord) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl RecoveryLedger<File> {
    /// Open (appending) the ledger file inside `dir`.
    pub fn open_at(dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LEDGER_FILE_NAME))?;
        Ok(Self::new(file))
    }
}

/// Parse every line of a ledger back into records. Used by tooling and
/// tests; unparsable lines are an error, not skipped.
pub fn parse_ledger(content: &str) -> serde_json::Result<Vec<EvidenceRecord>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
