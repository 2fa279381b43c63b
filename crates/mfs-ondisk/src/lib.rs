#![forbid(unsafe_code)]
//! On-disk records for MendFS volumes.
//!
//! Three record kinds live on a volume:
//!
//! - [`Superblock`] at sector 0: identifies the volume and its geometry.
//! - [`InodeRecord`], one sector per file: magic tag, logical length, and
//!   the direct / single-indirect / double-indirect sector pointers.
//! - Directory entries, packed 16 to a sector inside the root directory
//!   file: a 32-byte slot of `(inode_sector, name)`.
//!
//! Everything parses field-by-field from little-endian bytes with bounds
//! checks; a pointer value of zero always means "unallocated". Parsing
//! returns `ParseError` — callers convert at their crate boundary.

use mfs_types::{
    DIR_ENTRY_SIZE, DIRECT_PTRS, INODE_MAGIC, NAME_LEN, NAME_MAX, PTRS_PER_SECTOR, ParseError,
    SECTOR_SIZE, SUPER_MAGIC, SectorNumber, VOLUME_VERSION, bytes_to_sectors, ensure_slice,
    put_le_u32, read_fixed, read_le_u32, trim_nul_padded,
};

/// Bits tracked per bitmap sector.
pub const BITS_PER_BITMAP_SECTOR: u32 = (SECTOR_SIZE * 8) as u32;

/// Number of bitmap sectors needed to track `sector_count` sectors.
#[must_use]
pub fn bitmap_sectors_for(sector_count: u32) -> u32 {
    sector_count.div_ceil(BITS_PER_BITMAP_SECTOR)
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Volume superblock, stored in sector 0.
///
/// Layout: magic, version, sector_count, bitmap_start, bitmap_sectors,
/// root_dir_sector — six little-endian `u32`s, rest of the sector zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub sector_count: u32,
    pub bitmap_start: u32,
    pub bitmap_sectors: u32,
    pub root_dir_sector: u32,
}

impl Superblock {
    /// Geometry for a fresh volume of `sector_count` sectors:
    /// superblock, bitmap, root directory inode, then data.
    #[must_use]
    pub fn for_volume(sector_count: u32) -> Self {
        let bitmap_sectors = bitmap_sectors_for(sector_count);
        Self {
            sector_count,
            bitmap_start: 1,
            bitmap_sectors,
            root_dir_sector: 1 + bitmap_sectors,
        }
    }

    /// First sector past the fixed metadata region (superblock + bitmap +
    /// root directory inode). Data allocation and raw salvage start here.
    #[must_use]
    pub fn reserved_sectors(&self) -> u32 {
        self.root_dir_sector + 1
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: SUPER_MAGIC,
                actual: magic,
            });
        }
        let version = read_le_u32(data, 4)?;
        if version != VOLUME_VERSION {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "unsupported volume version",
            });
        }
        Ok(Self {
            sector_count: read_le_u32(data, 8)?,
            bitmap_start: read_le_u32(data, 12)?,
            bitmap_sectors: read_le_u32(data, 16)?,
            root_dir_sector: read_le_u32(data, 20)?,
        })
    }

    /// Validate geometry against the device the superblock was read from.
    pub fn validate(&self, device_sectors: u32) -> Result<(), ParseError> {
        if self.sector_count != device_sectors {
            return Err(ParseError::InvalidField {
                field: "sector_count",
                reason: "does not match device size",
            });
        }
        if self.bitmap_start != 1 {
            return Err(ParseError::InvalidField {
                field: "bitmap_start",
                reason: "must be 1",
            });
        }
        if self.bitmap_sectors != bitmap_sectors_for(self.sector_count) {
            return Err(ParseError::InvalidField {
                field: "bitmap_sectors",
                reason: "does not cover the volume",
            });
        }
        if self.root_dir_sector != self.bitmap_start + self.bitmap_sectors
            || self.root_dir_sector >= self.sector_count
        {
            return Err(ParseError::InvalidField {
                field: "root_dir_sector",
                reason: "outside the metadata region",
            });
        }
        if self.reserved_sectors() >= self.sector_count {
            return Err(ParseError::InvalidField {
                field: "sector_count",
                reason: "no room for data sectors",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0_u8; SECTOR_SIZE];
        put_le_u32(&mut out, 0, SUPER_MAGIC);
        put_le_u32(&mut out, 4, VOLUME_VERSION);
        put_le_u32(&mut out, 8, self.sector_count);
        put_le_u32(&mut out, 12, self.bitmap_start);
        put_le_u32(&mut out, 16, self.bitmap_sectors);
        put_le_u32(&mut out, 20, self.root_dir_sector);
        out
    }
}

// ── Inode record ────────────────────────────────────────────────────────────

/// On-disk inode metadata: one sector per file.
///
/// Pointers populate left-to-right with no gaps; a zero pointer terminates
/// the file's allocation at that position. That invariant is only violated
/// by disk corruption — readers treat the first zero as end-of-allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    /// Logical file length in bytes.
    pub length: u32,
    pub direct: [u32; DIRECT_PTRS],
    pub indirect: u32,
    pub double_indirect: u32,
}

impl InodeRecord {
    /// A fresh record with no allocated sectors.
    #[must_use]
    pub fn with_length(length: u32) -> Self {
        Self {
            length,
            direct: [0; DIRECT_PTRS],
            indirect: 0,
            double_indirect: 0,
        }
    }

    /// Parse a sector as inode metadata. Fails with `InvalidMagic` when the
    /// sector does not carry the inode tag — recovery mode 0 uses exactly
    /// that distinction to probe free sectors.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != INODE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: INODE_MAGIC,
                actual: magic,
            });
        }
        let length = read_le_u32(data, 4)?;
        let mut direct = [0_u32; DIRECT_PTRS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_le_u32(data, 8 + i * 4)?;
        }
        Ok(Self {
            length,
            direct,
            indirect: read_le_u32(data, 8 + DIRECT_PTRS * 4)?,
            double_indirect: read_le_u32(data, 12 + DIRECT_PTRS * 4)?,
        })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0_u8; SECTOR_SIZE];
        put_le_u32(&mut out, 0, INODE_MAGIC);
        put_le_u32(&mut out, 4, self.length);
        for (i, slot) in self.direct.iter().enumerate() {
            put_le_u32(&mut out, 8 + i * 4, *slot);
        }
        put_le_u32(&mut out, 8 + DIRECT_PTRS * 4, self.indirect);
        put_le_u32(&mut out, 12 + DIRECT_PTRS * 4, self.double_indirect);
        out
    }

    #[must_use]
    pub fn direct_ptr(&self, idx: usize) -> Option<SectorNumber> {
        SectorNumber::from_ptr(self.direct[idx])
    }

    #[must_use]
    pub fn indirect_ptr(&self) -> Option<SectorNumber> {
        SectorNumber::from_ptr(self.indirect)
    }

    #[must_use]
    pub fn double_indirect_ptr(&self) -> Option<SectorNumber> {
        SectorNumber::from_ptr(self.double_indirect)
    }

    /// Sectors the logical length implies, not counting indirect tables.
    #[must_use]
    pub fn data_sectors(&self) -> u32 {
        bytes_to_sectors(self.length)
    }
}

// ── Pointer tables ──────────────────────────────────────────────────────────

/// Parse an indirect sector as a table of raw pointers.
pub fn parse_ptr_table(data: &[u8]) -> Result<[u32; PTRS_PER_SECTOR], ParseError> {
    let mut table = [0_u32; PTRS_PER_SECTOR];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = read_le_u32(data, i * 4)?;
    }
    Ok(table)
}

#[must_use]
pub fn encode_ptr_table(table: &[u32; PTRS_PER_SECTOR]) -> Vec<u8> {
    let mut out = vec![0_u8; SECTOR_SIZE];
    for (i, slot) in table.iter().enumerate() {
        put_le_u32(&mut out, i * 4, *slot);
    }
    out
}

// ── Directory entries ───────────────────────────────────────────────────────

/// A live directory entry: name plus the sector of the file's inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode_sector: SectorNumber,
    pub name: String,
}

/// Parse one 32-byte directory slot. `Ok(None)` is a free slot.
pub fn parse_dir_slot(data: &[u8], offset: usize) -> Result<Option<DirEntry>, ParseError> {
    let raw = read_le_u32(data, offset)?;
    let name_bytes: [u8; NAME_LEN] = read_fixed(data, offset + 4)?;
    match SectorNumber::from_ptr(raw) {
        None => Ok(None),
        Some(inode_sector) => Ok(Some(DirEntry {
            inode_sector,
            name: trim_nul_padded(&name_bytes),
        })),
    }
}

/// Encode one directory slot in place. `None` writes a free slot.
///
/// The caller must have validated the name length (`<= NAME_MAX`).
pub fn encode_dir_slot(
    data: &mut [u8],
    offset: usize,
    entry: Option<&DirEntry>,
) -> Result<(), ParseError> {
    ensure_slice(data, offset, DIR_ENTRY_SIZE)?;
    match entry {
        None => {
            data[offset..offset + DIR_ENTRY_SIZE].fill(0);
        }
        Some(entry) => {
            if entry.name.len() > NAME_MAX {
                return Err(ParseError::InvalidField {
                    field: "name",
                    reason: "longer than NAME_MAX",
                });
            }
            put_le_u32(data, offset, entry.inode_sector.0);
            let name_area = &mut data[offset + 4..offset + DIR_ENTRY_SIZE];
            name_area.fill(0);
            name_area[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
        }
    }
    Ok(())
}
