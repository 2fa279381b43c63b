#![forbid(unsafe_code)]
//! Error types for MendFS.
//!
//! # Error Taxonomy
//!
//! MendFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `mfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `MfsError` | `mfs-error` (this crate) | User-facing errors for CLI and API consumers |
//!
//! `mfs-error` is intentionally independent of `mfs-types` to avoid cyclic
//! dependencies; `mfs-ondisk` and `mfs-vol` convert `ParseError` at their
//! boundaries. The rules are: a parse failure while validating a superblock
//! at open time becomes `Format` (wrong or damaged volume, not yet trusted);
//! a parse failure while reading live metadata from a mounted volume becomes
//! `Corruption` with the sector number, for repair triage.
//!
//! # Maintenance-operation variants
//!
//! The maintenance layer adds four variants of its own:
//!
//! - `SourceUnreadable` — defragmentation could not fully capture a file in
//!   memory. This aborts *before* anything destructive happens.
//! - `AllocationExhausted` — a write ran out of free sectors; carries how
//!   much was actually written so the caller never mistakes a short write
//!   for success.
//! - `TargetCreationFailed` — a directory entry could not be added, which is
//!   distinct from running out of data sectors.
//! - `RestoreFailed` — defragmentation failed after the clear phase began.
//!   The source error is preserved; this is unrecoverable data loss and is
//!   never folded into a generic failure.
//!
//! # Exit-code mapping
//!
//! Every variant maps to exactly one BSD `sysexits(3)` code via
//! [`MfsError::exit_code`]. The mapping is exhaustive (no wildcard arm) so
//! adding a variant is a compile error until its code is assigned.

use thiserror::Error;

/// Unified error type for all MendFS operations.
#[derive(Debug, Error)]
pub enum MfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata corruption detected at a known sector.
    #[error("corrupt metadata at sector {sector}: {detail}")]
    Corruption { sector: u32, detail: String },

    /// Invalid on-disk format (bad magic, unsupported version).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Parse-layer error surfaced to the user.
    ///
    /// Carries the string representation of a `ParseError` from `mfs-types`.
    /// Prefer `Corruption` or `Format` when the sector number or open-time
    /// context is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// On-disk geometry is invalid (bitmap extent, root sector, counts).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// No free sectors available.
    #[error("no space left on volume")]
    NoSpace,

    /// File or other named object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target name already exists.
    #[error("file exists: {0}")]
    Exists(String),

    /// Name exceeds the directory entry name limit.
    #[error("name too long: {0}")]
    NameTooLong(String),

    /// A file could not be fully read into memory during extraction.
    ///
    /// Raised by defragmentation phase 1; guarantees nothing has been
    /// removed from the volume yet.
    #[error("source unreadable: {name}: {detail}")]
    SourceUnreadable { name: String, detail: String },

    /// A write ran out of free sectors partway through.
    #[error("allocation exhausted writing {name}: {written} of {requested} bytes written")]
    AllocationExhausted {
        name: String,
        written: u64,
        requested: u64,
    },

    /// A directory entry could not be added for a new or re-linked file.
    #[error("could not create directory entry for {name}: {detail}")]
    TargetCreationFailed { name: String, detail: String },

    /// Defragmentation failed after the clear phase began.
    #[error("unrecoverable data loss restoring {name} during defragmentation")]
    RestoreFailed {
        name: String,
        #[source]
        source: Box<MfsError>,
    },
}

impl MfsError {
    /// Convert this error into a `sysexits(3)` process exit code.
    ///
    /// The mapping is exhaustive — every variant has an explicit arm.
    /// Adding a new variant without updating this function is a compile
    /// error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 74,                                             // EX_IOERR
            Self::Corruption { .. }
            | Self::Format(_)
            | Self::Parse(_)
            | Self::InvalidGeometry(_) => 65, // EX_DATAERR
            Self::NotFound(_) | Self::SourceUnreadable { .. } => 66,       // EX_NOINPUT
            Self::NoSpace
            | Self::Exists(_)
            | Self::AllocationExhausted { .. }
            | Self::TargetCreationFailed { .. } => 73, // EX_CANTCREAT
            Self::NameTooLong(_) => 64,                                    // EX_USAGE
            Self::RestoreFailed { .. } => 70,                              // EX_SOFTWARE
        }
    }
}

/// Result alias using `MfsError`.
pub type Result<T> = std::result::Result<T, MfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_covers_all_variants() {
        let cases: Vec<(MfsError, i32)> = vec![
            (MfsError::Io(std::io::Error::other("test")), 74),
            (
                MfsError::Corruption {
                    sector: 9,
                    detail: "bad magic".into(),
                },
                65,
            ),
            (MfsError::Format("not a mendfs volume".into()), 65),
            (MfsError::Parse("insufficient data".into()), 65),
            (MfsError::InvalidGeometry("bitmap extent".into()), 65),
            (MfsError::NoSpace, 73),
            (MfsError::NotFound("a.txt".into()), 66),
            (MfsError::Exists("a.txt".into()), 73),
            (MfsError::NameTooLong("x".repeat(40)), 64),
            (
                MfsError::SourceUnreadable {
                    name: "a.txt".into(),
                    detail: "short read".into(),
                },
                66,
            ),
            (
                MfsError::AllocationExhausted {
                    name: "a.txt".into(),
                    written: 512,
                    requested: 1024,
                },
                73,
            ),
            (
                MfsError::TargetCreationFailed {
                    name: "a.txt".into(),
                    detail: "directory full".into(),
                },
                73,
            ),
            (
                MfsError::RestoreFailed {
                    name: "a.txt".into(),
                    source: Box::new(MfsError::NoSpace),
                },
                70,
            ),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.exit_code(), *expected, "wrong code for {error:?}");
        }
    }

    #[test]
    fn allocation_exhausted_reports_partial_progress() {
        let err = MfsError::AllocationExhausted {
            name: "big.bin".into(),
            written: 4096,
            requested: 9000,
        };
        assert_eq!(
            err.to_string(),
            "allocation exhausted writing big.bin: 4096 of 9000 bytes written"
        );
    }

    #[test]
    fn restore_failed_preserves_cause() {
        let err = MfsError::RestoreFailed {
            name: "notes.txt".into(),
            source: Box::new(MfsError::NoSpace),
        };
        assert!(err.to_string().contains("notes.txt"));
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "no space left on volume");
    }
}
