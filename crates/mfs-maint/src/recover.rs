//! Multi-mode data recovery.
//!
//! Three independent strategies, none of which trust the directory or the
//! inode metadata further than it can be verified:
//!
//! - **Orphaned inodes** (mode 0): probe every bitmap-free sector for a
//!   surviving inode record and re-link hits into the root directory as
//!   `recovered0-<sector>`, trusting the record's own pointers as-is.
//!   A stale sector whose bytes happen to carry the magic tag is a false
//!   positive; that is an accepted limitation of the probe, not a defect.
//! - **Raw salvage** (mode 1): dump the non-zero bytes of every non-empty
//!   sector past the reserved metadata region to `recovered1-<sector>.txt`,
//!   regardless of bitmap state. The fallback when metadata is suspect.
//! - **Tail slack** (mode 2): for every directory-reachable file whose
//!   length leaves a partial final sector, rescue non-zero bytes found
//!   past end-of-file in that sector to `recovered2-<name>.txt`.
//!
//! Recovery never destroys the evidence it is built to find: modes 1 and 2
//! write artifacts through the host filesystem, not the volume under
//! repair, and mode 0 only adds directory entries. Every artifact is also
//! appended to a JSONL evidence ledger in the artifact directory.
//!
//! All modes are resilient: one unreadable sector or file is logged and
//! counted, and the scan continues.

use crate::ledger::{EvidenceRecord, RecoveryLedger};
use crate::resolve::SectorWalk;
use mfs_block::SectorDevice;
use mfs_error::{MfsError, Result};
use mfs_ondisk::InodeRecord;
use mfs_types::{SECTOR_SIZE, SectorNumber};
use mfs_vol::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

/// Recovery strategy selector. The numeric flags match the tool's
/// historical command-line interface (`recover 0|1|2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    OrphanedInodes,
    RawSalvage,
    TailSlack,
}

impl RecoveryMode {
    #[must_use]
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::OrphanedInodes),
            1 => Some(Self::RawSalvage),
            2 => Some(Self::TailSlack),
            _ => None,
        }
    }

    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Self::OrphanedInodes => 0,
            Self::RawSalvage => 1,
            Self::TailSlack => 2,
        }
    }
}

impl fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanedInodes => write!(f, "orphaned-inodes"),
            Self::RawSalvage => write!(f, "raw-salvage"),
            Self::TailSlack => write!(f, "tail-slack"),
        }
    }
}

/// Outcome of one recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub mode: RecoveryMode,
    /// Sectors examined (modes 0 and 1) or files examined (mode 2).
    pub scanned: u64,
    /// Artifacts produced or entries re-linked.
    pub recovered: u64,
    /// Individual failures the scan continued past.
    pub failures: u64,
    /// Names of re-linked entries (mode 0) or artifact files (modes 1, 2).
    pub artifacts: Vec<String>,
}

impl RecoveryReport {
    fn new(mode: RecoveryMode) -> Self {
        Self {
            mode,
            scanned: 0,
            recovered: 0,
            failures: 0,
            artifacts: Vec::new(),
        }
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} recovery: scanned {}, recovered {}, {} failures",
            self.mode, self.scanned, self.recovered, self.failures
        )
    }
}

/// Run one recovery mode. Artifacts and the evidence ledger go to
/// `artifact_dir` on the host filesystem.
pub fn recover<D: SectorDevice>(
    volume: &mut Volume<D>,
    mode: RecoveryMode,
    artifact_dir: &Path,
) -> Result<RecoveryReport> {
    let mut ledger = RecoveryLedger::open_at(artifact_dir)?;
    info!(%mode, artifact_dir = %artifact_dir.display(), "starting recovery");
    let report = match mode {
        RecoveryMode::OrphanedInodes => recover_orphaned_inodes(volume, &mut ledger),
        RecoveryMode::RawSalvage => recover_raw_salvage(volume, artifact_dir, &mut ledger),
        RecoveryMode::TailSlack => recover_tail_slack(volume, artifact_dir, &mut ledger),
    }?;
    info!(%report, "recovery finished");
    Ok(report)
}

/// Mode 0: probe free sectors for surviving inode records and re-link them.
fn recover_orphaned_inodes<D: SectorDevice>(
    volume: &mut Volume<D>,
    ledger: &mut RecoveryLedger<File>,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::new(RecoveryMode::OrphanedInodes);
    let sector_count = volume.free_map().sector_count();

    for raw_sector in 0..sector_count {
        let sector = SectorNumber(raw_sector);
        if volume.free_map().is_allocated(sector) {
            continue;
        }
        report.scanned += 1;

        let raw = match volume.device().read_sector(sector) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(sector = raw_sector, %err, "unreadable sector during orphan scan");
                report.failures += 1;
                continue;
            }
        };
        // Anything without the magic tag is just a free sector.
        let Ok(record) = InodeRecord::parse(raw.as_slice()) else {
            continue;
        };

        let name = format!("recovered0-{raw_sector}");
        match volume.link_entry(&name, sector) {
            Ok(()) => {
                ledger.append(&EvidenceRecord::orphan_relinked(
                    raw_sector,
                    &name,
                    u64::from(record.length),
                ))?;
                report.recovered += 1;
                report.artifacts.push(name);
            }
            Err(MfsError::Exists(_)) => {
                // Already re-linked by an earlier run.
                debug!(sector = raw_sector, "orphan already linked, skipping");
            }
            Err(err) => {
                warn!(sector = raw_sector, %err, "could not re-link orphaned inode");
                report.failures += 1;
            }
        }
    }
    Ok(report)
}

/// Mode 1: dump the non-zero bytes of every non-empty data-region sector.
fn recover_raw_salvage<D: SectorDevice>(
    volume: &Volume<D>,
    artifact_dir: &Path,
    ledger: &mut RecoveryLedger<File>,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::new(RecoveryMode::RawSalvage);
    let start = volume.superblock().reserved_sectors();
    let sector_count = volume.superblock().sector_count;

    for raw_sector in start..sector_count {
        let sector = SectorNumber(raw_sector);
        report.scanned += 1;

        let raw = match volume.device().read_sector(sector) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(sector = raw_sector, %err, "unreadable sector during salvage");
                report.failures += 1;
                continue;
            }
        };
        if raw.is_all_zero() {
            continue;
        }

        let rescued: Vec<u8> = raw.as_slice().iter().copied().filter(|b| *b != 0).collect();
        let name = format!("recovered1-{raw_sector}.txt");
        if let Err(err) = std::fs::write(artifact_dir.join(&name), &rescued) {
            warn!(artifact = %name, %err, "could not write salvage artifact");
            report.failures += 1;
            continue;
        }
        ledger.append(&EvidenceRecord::sector_salvaged(
            raw_sector,
            &name,
            rescued.len() as u64,
        ))?;
        report.recovered += 1;
        report.artifacts.push(name);
    }
    Ok(report)
}

/// Mode 2: rescue residual bytes past end-of-file in each file's partial
/// final sector.
fn recover_tail_slack<D: SectorDevice>(
    volume: &Volume<D>,
    artifact_dir: &Path,
    ledger: &mut RecoveryLedger<File>,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::new(RecoveryMode::TailSlack);

    for entry in volume.list()? {
        report.scanned += 1;
        match rescue_slack(volume, &entry.name) {
            Ok(None) => {}
            Ok(Some(rescued)) => {
                let name = format!("recovered2-{}.txt", entry.name);
                if let Err(err) = std::fs::write(artifact_dir.join(&name), &rescued) {
                    warn!(artifact = %name, %err, "could not write slack artifact");
                    report.failures += 1;
                    continue;
                }
                ledger.append(&EvidenceRecord::slack_recovered(
                    &entry.name,
                    &name,
                    rescued.len() as u64,
                ))?;
                report.recovered += 1;
                report.artifacts.push(name);
            }
            Err(err) => {
                warn!(name = %entry.name, %err, "could not inspect file tail");
                report.failures += 1;
            }
        }
    }
    Ok(report)
}

/// Non-zero slack bytes of `name`'s final sector, if it has any.
fn rescue_slack<D: SectorDevice>(volume: &Volume<D>, name: &str) -> Result<Option<Vec<u8>>> {
    let handle = volume.open_file(name)?;
    let slack_start = handle.length() as usize % SECTOR_SIZE;
    if slack_start == 0 {
        // Length is sector-aligned (or zero): no slack region exists.
        return Ok(None);
    }

    let sectors: Vec<SectorNumber> =
        SectorWalk::new(volume.device(), *handle.record()).collect::<Result<Vec<_>>>()?;
    let Some(last) = sectors.last() else {
        return Ok(None);
    };

    let raw = volume.device().read_sector(*last)?;
    let slack = &raw.as_slice()[slack_start..];
    if slack.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    Ok(Some(slack.iter().copied().filter(|b| *b != 0).collect()))
}
