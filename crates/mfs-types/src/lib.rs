#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of one sector in bytes. All volume I/O happens in whole sectors.
pub const SECTOR_SIZE: usize = 512;

/// Sector pointers per indirect sector (`SECTOR_SIZE / 4`).
pub const PTRS_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Direct sector pointers held inline in an inode record.
pub const DIRECT_PTRS: usize = 12;

/// Largest file expressible by one inode record, in sectors.
pub const MAX_FILE_SECTORS: usize =
    DIRECT_PTRS + PTRS_PER_SECTOR + PTRS_PER_SECTOR * PTRS_PER_SECTOR;

/// Magic tag of the volume superblock ("MFS1").
pub const SUPER_MAGIC: u32 = 0x4D46_5331;

/// Magic tag identifying a sector as valid inode metadata ("MFIN").
pub const INODE_MAGIC: u32 = 0x4D46_494E;

/// On-disk format version.
pub const VOLUME_VERSION: u32 = 1;

/// Bytes reserved for a name in a directory entry (NUL-padded).
pub const NAME_LEN: usize = 28;

/// Longest usable name (one byte is always left for the NUL terminator).
pub const NAME_MAX: usize = NAME_LEN - 1;

/// Bytes per directory entry slot.
pub const DIR_ENTRY_SIZE: usize = 32;

/// Physical sector number on a volume.
///
/// The on-disk encoding uses `u32` pointers where the value 0 means
/// "unallocated" — sector 0 holds the superblock and is never a valid data
/// sector. A `SectorNumber` is therefore always non-zero when it originates
/// from a pointer slot; use [`SectorNumber::from_ptr`] at decode boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorNumber(pub u32);

impl SectorNumber {
    /// Decode a raw on-disk pointer slot. Zero is the unallocated sentinel.
    #[must_use]
    pub fn from_ptr(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// Byte offset of this sector on the underlying device.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * SECTOR_SIZE as u64
    }

    /// Distance to another sector, ignoring direction.
    #[must_use]
    pub fn distance(self, other: Self) -> u32 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of sectors needed to hold `bytes` bytes (ceiling division).
#[must_use]
pub fn bytes_to_sectors(bytes: u32) -> u32 {
    bytes.div_ceil(SECTOR_SIZE as u32)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Write a little-endian `u32` at `offset`. Panics if the slice is too short;
/// encoders work against fixed-size sector buffers they sized themselves.
#[inline]
pub fn put_le_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}
