//! Volume fragmentation analysis.
//!
//! A file's sectors are walked pairwise; a transition is *fragmented* when
//! the distance between consecutive sector numbers exceeds
//! [`ADJACENCY_TOLERANCE`]. A single fragmented transition marks the whole
//! file and stops its analysis — the aggregate counts affected files, not
//! transitions. Files with fewer than two allocated sectors can never be
//! fragmented.
//!
//! Analysis is read-only and resilient: a file whose metadata cannot be
//! walked is skipped and counted, never fatal.

use crate::resolve::SectorWalk;
use mfs_block::SectorDevice;
use mfs_error::Result;
use mfs_types::SectorNumber;
use mfs_vol::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Sectors this far apart (or closer) still count as contiguous.
pub const ADJACENCY_TOLERANCE: u32 = 3;

/// Aggregate fragmentation statistics for one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentationReport {
    /// Directory entries examined, including skipped ones.
    pub total_files: u64,
    /// Files with at least one fragmented transition.
    pub fragmented_files: u64,
    /// Files whose metadata could not be analyzed.
    pub skipped_files: u64,
}

impl FragmentationReport {
    /// Fragmented share of the volume, or `None` when there are no files —
    /// the ratio is undefined then, and reported as such rather than as 0.
    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        (self.total_files > 0).then(|| self.fragmented_files as f64 / self.total_files as f64)
    }
}

impl fmt::Display for FragmentationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} fragmented, {} skipped, ratio ",
            self.total_files, self.fragmented_files, self.skipped_files
        )?;
        match self.ratio() {
            Some(ratio) => write!(f, "{ratio:.4}"),
            None => write!(f, "undefined (no files)"),
        }
    }
}

/// Walk a file's sectors and report whether any consecutive pair is more
/// than [`ADJACENCY_TOLERANCE`] apart. Short-circuits on the first hit.
pub fn file_is_fragmented<D: SectorDevice>(walk: SectorWalk<'_, D>) -> Result<bool> {
    let mut prev: Option<SectorNumber> = None;
    for item in walk {
        let sector = item?;
        if let Some(prev) = prev {
            if prev.distance(sector) > ADJACENCY_TOLERANCE {
                return Ok(true);
            }
        }
        prev = Some(sector);
    }
    Ok(false)
}

/// Analyze every file in the root directory.
pub fn analyze<D: SectorDevice>(volume: &Volume<D>) -> Result<FragmentationReport> {
    let mut report = FragmentationReport::default();
    for entry in volume.list()? {
        report.total_files += 1;
        let verdict = volume
            .read_inode_record(entry.inode_sector)
            .and_then(|record| file_is_fragmented(SectorWalk::new(volume.device(), record)));
        match verdict {
            Ok(true) => report.fragmented_files += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(name = %entry.name, %err, "skipping unanalyzable file");
                report.skipped_files += 1;
            }
        }
    }
    info!(
        total = report.total_files,
        fragmented = report.fragmented_files,
        skipped = report.skipped_files,
        "fragmentation analysis complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfs_block::MemSectorDevice;
    use mfs_ondisk::InodeRecord;

    fn record_with_sectors(sectors: &[u32]) -> InodeRecord {
        assert!(sectors.len() <= mfs_types::DIRECT_PTRS);
        let mut record = InodeRecord::with_length(sectors.len() as u32 * 512);
        record.direct[..sectors.len()].copy_from_slice(sectors);
        record
    }

    #[test]
    fn gap_beyond_tolerance_marks_file() {
        let device = MemSectorDevice::new(64);
        let record = record_with_sectors(&[10, 11, 12, 20]);
        // 12 -> 20 jumps by 8 > 3.
        assert!(file_is_fragmented(SectorWalk::new(&device, record)).unwrap());
    }

    #[test]
    fn contiguous_run_is_clean() {
        let device = MemSectorDevice::new(64);
        let record = record_with_sectors(&[10, 11, 12, 13]);
        assert!(!file_is_fragmented(SectorWalk::new(&device, record)).unwrap());
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let device = MemSectorDevice::new(64);
        // Distance of exactly 3 is tolerated; 4 is not.
        let record = record_with_sectors(&[10, 13]);
        assert!(!file_is_fragmented(SectorWalk::new(&device, record)).unwrap());
        let record = record_with_sectors(&[10, 14]);
        assert!(file_is_fragmented(SectorWalk::new(&device, record)).unwrap());
    }

    #[test]
    fn backward_jumps_count_too() {
        let device = MemSectorDevice::new(64);
        // |20 - 10| = 10 even though the run goes downward.
        let record = record_with_sectors(&[20, 10]);
        assert!(file_is_fragmented(SectorWalk::new(&device, record)).unwrap());
    }

    #[test]
    fn short_files_cannot_be_fragmented() {
        let device = MemSectorDevice::new(64);
        assert!(!file_is_fragmented(SectorWalk::new(&device, record_with_sectors(&[]))).unwrap());
        assert!(!file_is_fragmented(SectorWalk::new(&device, record_with_sectors(&[40]))).unwrap());
    }

    #[test]
    fn ratio_is_undefined_without_files() {
        let empty = FragmentationReport::default();
        assert_eq!(empty.ratio(), None);
        assert!(empty.to_string().contains("undefined"));

        let quarter = FragmentationReport {
            total_files: 4,
            fragmented_files: 1,
            skipped_files: 0,
        };
        assert_eq!(quarter.ratio(), Some(0.25));
        assert!(quarter.to_string().contains("0.2500"));
    }
}
