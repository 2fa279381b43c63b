//! Whole-volume defragmentation.
//!
//! Three phases, in order: extract every file's full content into owned
//! in-memory snapshots, remove every file (emptying the free list back to
//! one contiguous run), then recreate each file in extraction order.
//! Contiguity is not arranged explicitly — it emerges from first-fit
//! allocation against the emptied volume.
//!
//! Losing no data dominates everything else. Phase 1 must fully capture
//! every file before phase 2 removes anything; a read failure aborts with
//! the volume untouched. A failure once the clear phase has begun is
//! unrecoverable data loss and escalates as [`MfsError::RestoreFailed`],
//! never a silent partial success. Snapshots are plain owned values, so
//! every exit path — including that abort — releases them.

use mfs_block::SectorDevice;
use mfs_error::{MfsError, Result};
use mfs_vol::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// One extracted file held in memory between clear and recreate.
struct FileSnapshot {
    name: String,
    content: Vec<u8>,
}

/// Summary of a completed defragmentation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefragReport {
    /// Files extracted and recreated.
    pub files: u64,
    /// Total bytes moved through memory.
    pub bytes: u64,
}

impl fmt::Display for DefragReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "defragmented {} files ({} bytes rewritten)",
            self.files, self.bytes
        )
    }
}

/// Defragment the whole volume. Requires exclusive access: the volume
/// passes through a transient empty state no other reader may observe.
pub fn defragment<D: SectorDevice>(volume: &mut Volume<D>) -> Result<DefragReport> {
    // Phase 1 — extract. Nothing is mutated until every file is captured.
    let mut snapshots: Vec<FileSnapshot> = Vec::new();
    for entry in volume.list()? {
        let snapshot = extract_one(volume, &entry.name).map_err(|err| match err {
            err @ MfsError::SourceUnreadable { .. } => err,
            other => MfsError::SourceUnreadable {
                name: entry.name.clone(),
                detail: other.to_string(),
            },
        })?;
        snapshots.push(snapshot);
    }
    info!(files = snapshots.len(), "extraction complete, clearing volume");

    // Phase 2 — clear. From here on, failure means data loss.
    for snapshot in &snapshots {
        volume
            .remove(&snapshot.name)
            .map_err(|err| restore_failed(&snapshot.name, err))?;
    }
    debug!(
        free_sectors = volume.free_sectors(),
        "volume cleared, recreating files"
    );

    // Phase 3 — recreate, in extraction order.
    let mut report = DefragReport::default();
    for snapshot in &snapshots {
        recreate_one(volume, snapshot).map_err(|err| restore_failed(&snapshot.name, err))?;
        report.files += 1;
        report.bytes += snapshot.content.len() as u64;
    }
    info!(files = report.files, bytes = report.bytes, "defragmentation complete");
    Ok(report)
}

fn restore_failed(name: &str, err: MfsError) -> MfsError {
    MfsError::RestoreFailed {
        name: name.to_string(),
        source: Box::new(err),
    }
}

fn extract_one<D: SectorDevice>(volume: &Volume<D>, name: &str) -> Result<FileSnapshot> {
    let handle = volume.open_file(name)?;
    let mut content = vec![0_u8; handle.length() as usize];
    let read = volume.read_at(&handle, 0, &mut content)?;
    if read != content.len() {
        return Err(MfsError::SourceUnreadable {
            name: name.to_string(),
            detail: format!("short read: {read} of {} bytes", content.len()),
        });
    }
    Ok(FileSnapshot {
        name: name.to_string(),
        content,
    })
}

fn recreate_one<D: SectorDevice>(volume: &mut Volume<D>, snapshot: &FileSnapshot) -> Result<()> {
    let requested = snapshot.content.len();
    volume.create(&snapshot.name, requested as u32)?;
    if requested == 0 {
        return Ok(());
    }
    let mut handle = volume.open_file(&snapshot.name)?;
    let written = volume.write_at(&mut handle, 0, &snapshot.content)?;
    if written < requested {
        return Err(MfsError::AllocationExhausted {
            name: snapshot.name.clone(),
            written: written as u64,
            requested: requested as u64,
        });
    }
    Ok(())
}
