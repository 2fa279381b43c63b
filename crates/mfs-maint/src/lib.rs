#![forbid(unsafe_code)]
//! MendFS maintenance core.
//!
//! The algorithms that operate directly on a volume's indexed-allocation
//! structure and free-space bitmap:
//!
//! - [`resolve::SectorWalk`] — lazy resolution of a file's physical sector
//!   sequence across direct, single-indirect, and double-indirect levels.
//! - [`frag::analyze`] — per-file contiguity verdicts and the volume
//!   fragmentation ratio.
//! - [`defrag::defragment`] — extract / clear / recreate, with strict
//!   nothing-deleted-before-captured ordering.
//! - [`recover::recover`] — orphaned-inode, raw-salvage, and tail-slack
//!   recovery, with a JSONL evidence ledger per run.
//!
//! Callers must hold exclusive access to the volume for the duration of
//! any one operation; the volume is an explicit parameter everywhere, not
//! ambient state.

pub mod defrag;
pub mod frag;
pub mod ledger;
pub mod recover;
pub mod resolve;

pub use crate::defrag::{DefragReport, defragment};
pub use crate::frag::{ADJACENCY_TOLERANCE, FragmentationReport, analyze, file_is_fragmented};
pub use crate::ledger::{EvidenceRecord, LEDGER_FILE_NAME, RecoveryLedger, parse_ledger};
pub use crate::recover::{RecoveryMode, RecoveryReport, recover};
pub use crate::resolve::SectorWalk;
