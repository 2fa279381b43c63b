//! Free-space bitmap: one bit per sector, set = allocated.
//!
//! The map is held in memory while a volume is open and written through to
//! its on-disk sectors after every mutating volume operation. Allocation is
//! first-fit from the lowest sector number; reserved metadata sectors are
//! marked allocated at format time, so the scan never hands them out.

use mfs_block::SectorDevice;
use mfs_error::Result;
use mfs_ondisk::Superblock;
use mfs_types::{SECTOR_SIZE, SectorNumber};

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// In-memory copy of the volume's free-space bitmap.
#[derive(Debug, Clone)]
pub struct FreeMap {
    bits: Vec<u8>,
    sector_count: u32,
}

impl FreeMap {
    /// A map for `sector_count` sectors with every sector free.
    ///
    /// Backing storage is whole bitmap sectors, so trailing pad bits exist;
    /// they are never handed out because allocation stops at `sector_count`.
    #[must_use]
    pub fn all_free(sector_count: u32) -> Self {
        let sectors = mfs_ondisk::bitmap_sectors_for(sector_count);
        Self {
            bits: vec![0_u8; sectors as usize * SECTOR_SIZE],
            sector_count,
        }
    }

    /// Read the bitmap from its on-disk sectors.
    pub fn load<D: SectorDevice>(device: &D, superblock: &Superblock) -> Result<Self> {
        let mut bits = Vec::with_capacity(superblock.bitmap_sectors as usize * SECTOR_SIZE);
        for i in 0..superblock.bitmap_sectors {
            let sector = SectorNumber(superblock.bitmap_start + i);
            bits.extend_from_slice(device.read_sector(sector)?.as_slice());
        }
        Ok(Self {
            bits,
            sector_count: superblock.sector_count,
        })
    }

    /// Write the bitmap back to its on-disk sectors.
    pub fn flush<D: SectorDevice>(&self, device: &D, superblock: &Superblock) -> Result<()> {
        for i in 0..superblock.bitmap_sectors {
            let sector = SectorNumber(superblock.bitmap_start + i);
            let start = i as usize * SECTOR_SIZE;
            device.write_sector(sector, &self.bits[start..start + SECTOR_SIZE])?;
        }
        Ok(())
    }

    #[must_use]
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    #[must_use]
    pub fn is_allocated(&self, sector: SectorNumber) -> bool {
        bitmap_get(&self.bits, sector.0)
    }

    pub fn mark(&mut self, sector: SectorNumber) {
        bitmap_set(&mut self.bits, sector.0);
    }

    pub fn release(&mut self, sector: SectorNumber) {
        bitmap_clear(&mut self.bits, sector.0);
    }

    /// Allocate the lowest free sector, marking it in the map.
    pub fn allocate(&mut self) -> Option<SectorNumber> {
        for idx in 0..self.sector_count {
            if !bitmap_get(&self.bits, idx) {
                bitmap_set(&mut self.bits, idx);
                return Some(SectorNumber(idx));
            }
        }
        None
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        (0..self.sector_count)
            .filter(|idx| !bitmap_get(&self.bits, *idx))
            .count() as u32
    }
}
