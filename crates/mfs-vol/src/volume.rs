//! Volume-level operations: format/open, the root directory, and the file
//! lifecycle (create, open, read, write, remove).
//!
//! A [`Volume`] owns its sector device and an in-memory copy of the
//! free-space bitmap, written through after every mutating operation.
//! File content is addressed through the inode record's direct,
//! single-indirect, and double-indirect pointers; sectors are allocated
//! lazily as writes reach them, left-to-right with no gaps.
//!
//! Two deliberate non-behaviors matter to the maintenance layer:
//! freshly allocated data sectors are not zeroed (a partial final sector
//! keeps whatever bytes its previous occupant left past end-of-file), and
//! [`Volume::remove`] frees an inode's sectors without wiping the inode
//! record itself. Both are the raw material the recovery engine works from.

use crate::free_map::FreeMap;
use mfs_block::{SectorBuf, SectorDevice};
use mfs_error::{MfsError, Result};
use mfs_ondisk::{
    DirEntry, InodeRecord, Superblock, encode_dir_slot, encode_ptr_table, parse_dir_slot,
    parse_ptr_table,
};
use mfs_types::{
    DIR_ENTRY_SIZE, DIRECT_PTRS, MAX_FILE_SECTORS, NAME_MAX, PTRS_PER_SECTOR, SECTOR_SIZE,
    SectorNumber, bytes_to_sectors,
};
use tracing::{debug, info};

/// An open file: its directory name, inode sector, and a copy of the
/// on-disk record. Handles are cheap and carry no kernel-style state;
/// `write_at` keeps the embedded record in step with the disk.
#[derive(Debug, Clone)]
pub struct FileHandle {
    name: String,
    inode_sector: SectorNumber,
    record: InodeRecord,
}

impl FileHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn inode_sector(&self) -> SectorNumber {
        self.inode_sector
    }

    #[must_use]
    pub fn record(&self) -> &InodeRecord {
        &self.record
    }

    /// Logical file length in bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.record.length
    }
}

/// A mounted MendFS volume.
pub struct Volume<D: SectorDevice> {
    device: D,
    superblock: Superblock,
    free_map: FreeMap,
}

impl<D: SectorDevice> Volume<D> {
    /// Format `device` with a fresh, empty volume and mount it.
    pub fn format(device: D) -> Result<Self> {
        let sector_count = device.sector_count();
        let superblock = Superblock::for_volume(sector_count);
        superblock
            .validate(sector_count)
            .map_err(|e| MfsError::InvalidGeometry(e.to_string()))?;

        let mut free_map = FreeMap::all_free(sector_count);
        for s in 0..superblock.reserved_sectors() {
            free_map.mark(SectorNumber(s));
        }

        device.write_sector(SectorNumber(0), &superblock.encode())?;
        free_map.flush(&device, &superblock)?;
        device.write_sector(
            SectorNumber(superblock.root_dir_sector),
            &InodeRecord::with_length(0).encode(),
        )?;

        info!(sector_count, "formatted volume");
        Ok(Self {
            device,
            superblock,
            free_map,
        })
    }

    /// Mount an existing volume, validating the superblock against the
    /// device geometry.
    pub fn open(device: D) -> Result<Self> {
        let raw = device.read_sector(SectorNumber(0))?;
        let superblock =
            Superblock::parse(raw.as_slice()).map_err(|e| MfsError::Format(e.to_string()))?;
        superblock
            .validate(device.sector_count())
            .map_err(|e| MfsError::InvalidGeometry(e.to_string()))?;

        let free_map = FreeMap::load(&device, &superblock)?;
        let volume = Self {
            device,
            superblock,
            free_map,
        };
        // The root directory inode must at least parse.
        let root = volume.read_inode_record(SectorNumber(superblock.root_dir_sector))?;
        debug!(
            sector_count = superblock.sector_count,
            root_dir_bytes = root.length,
            "opened volume"
        );
        Ok(volume)
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn free_map(&self) -> &FreeMap {
        &self.free_map
    }

    /// Free data sectors remaining on the volume.
    #[must_use]
    pub fn free_sectors(&self) -> u32 {
        self.free_map.free_count()
    }

    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }

    /// Consume the volume, returning the underlying device.
    pub fn into_device(self) -> D {
        self.device
    }

    // ── Inode records ───────────────────────────────────────────────────

    /// Read and parse the inode record at `sector`.
    pub fn read_inode_record(&self, sector: SectorNumber) -> Result<InodeRecord> {
        let raw = self.device.read_sector(sector)?;
        InodeRecord::parse(raw.as_slice()).map_err(|e| MfsError::Corruption {
            sector: sector.0,
            detail: e.to_string(),
        })
    }

    fn write_inode_record(&self, sector: SectorNumber, record: &InodeRecord) -> Result<()> {
        self.device.write_sector(sector, &record.encode())
    }

    // ── Sector mapping ──────────────────────────────────────────────────

    fn read_ptr_table(&self, sector: SectorNumber) -> Result<[u32; PTRS_PER_SECTOR]> {
        let raw = self.device.read_sector(sector)?;
        parse_ptr_table(raw.as_slice()).map_err(|e| MfsError::Corruption {
            sector: sector.0,
            detail: e.to_string(),
        })
    }

    /// Physical sector backing file-sector `idx`, if allocated.
    fn bmap(&self, record: &InodeRecord, idx: u32) -> Result<Option<SectorNumber>> {
        let idx = idx as usize;
        if idx < DIRECT_PTRS {
            return Ok(record.direct_ptr(idx));
        }

        let idx = idx - DIRECT_PTRS;
        if idx < PTRS_PER_SECTOR {
            let Some(table_sector) = record.indirect_ptr() else {
                return Ok(None);
            };
            let table = self.read_ptr_table(table_sector)?;
            return Ok(SectorNumber::from_ptr(table[idx]));
        }

        let idx = idx - PTRS_PER_SECTOR;
        if idx < PTRS_PER_SECTOR * PTRS_PER_SECTOR {
            let Some(outer_sector) = record.double_indirect_ptr() else {
                return Ok(None);
            };
            let outer = self.read_ptr_table(outer_sector)?;
            let Some(inner_sector) = SectorNumber::from_ptr(outer[idx / PTRS_PER_SECTOR]) else {
                return Ok(None);
            };
            let inner = self.read_ptr_table(inner_sector)?;
            return Ok(SectorNumber::from_ptr(inner[idx % PTRS_PER_SECTOR]));
        }

        Ok(None)
    }

    /// Allocate and zero a pointer-table sector.
    fn allocate_table(&mut self) -> Result<Option<SectorNumber>> {
        let Some(sector) = self.free_map.allocate() else {
            return Ok(None);
        };
        self.device
            .write_sector(sector, SectorBuf::zeroed().as_slice())?;
        Ok(Some(sector))
    }

    /// Map file-sector `idx`, allocating the data sector (and any missing
    /// pointer-table sectors) on demand. Returns `None` when the volume is
    /// out of space. Newly allocated data sectors are NOT zeroed.
    fn map_or_allocate(
        &mut self,
        record: &mut InodeRecord,
        idx: u32,
    ) -> Result<Option<SectorNumber>> {
        let idx = idx as usize;
        if idx < DIRECT_PTRS {
            if let Some(existing) = record.direct_ptr(idx) {
                return Ok(Some(existing));
            }
            let Some(sector) = self.free_map.allocate() else {
                return Ok(None);
            };
            record.direct[idx] = sector.0;
            return Ok(Some(sector));
        }

        let rel = idx - DIRECT_PTRS;
        if rel < PTRS_PER_SECTOR {
            let table_sector = match record.indirect_ptr() {
                Some(s) => s,
                None => {
                    let Some(s) = self.allocate_table()? else {
                        return Ok(None);
                    };
                    record.indirect = s.0;
                    s
                }
            };
            return self.map_in_table(table_sector, rel);
        }

        let rel = rel - PTRS_PER_SECTOR;
        if rel >= PTRS_PER_SECTOR * PTRS_PER_SECTOR {
            return Ok(None);
        }
        let outer_sector = match record.double_indirect_ptr() {
            Some(s) => s,
            None => {
                let Some(s) = self.allocate_table()? else {
                    return Ok(None);
                };
                record.double_indirect = s.0;
                s
            }
        };
        let mut outer = self.read_ptr_table(outer_sector)?;
        let outer_idx = rel / PTRS_PER_SECTOR;
        let inner_sector = match SectorNumber::from_ptr(outer[outer_idx]) {
            Some(s) => s,
            None => {
                let Some(s) = self.allocate_table()? else {
                    return Ok(None);
                };
                outer[outer_idx] = s.0;
                self.device
                    .write_sector(outer_sector, &encode_ptr_table(&outer))?;
                s
            }
        };
        self.map_in_table(inner_sector, rel % PTRS_PER_SECTOR)
    }

    /// Map slot `slot` of the pointer table at `table_sector`, allocating a
    /// data sector if the slot is empty.
    fn map_in_table(
        &mut self,
        table_sector: SectorNumber,
        slot: usize,
    ) -> Result<Option<SectorNumber>> {
        let mut table = self.read_ptr_table(table_sector)?;
        if let Some(existing) = SectorNumber::from_ptr(table[slot]) {
            return Ok(Some(existing));
        }
        let Some(sector) = self.free_map.allocate() else {
            return Ok(None);
        };
        table[slot] = sector.0;
        self.device
            .write_sector(table_sector, &encode_ptr_table(&table))?;
        Ok(Some(sector))
    }

    // ── File I/O ────────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes from `offset`, clamped to the logical
    /// length. Unallocated sectors inside the logical range read as zeroes.
    pub fn read_at(&self, handle: &FileHandle, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let length = handle.record.length;
        if offset >= length || buf.is_empty() {
            return Ok(0);
        }
        let to_read = buf.len().min((length - offset) as usize);

        let mut done = 0_usize;
        while done < to_read {
            let pos = offset as usize + done;
            let idx = (pos / SECTOR_SIZE) as u32;
            let in_sector = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(to_read - done);

            match self.bmap(&handle.record, idx)? {
                Some(sector) => {
                    let raw = self.device.read_sector(sector)?;
                    buf[done..done + chunk]
                        .copy_from_slice(&raw.as_slice()[in_sector..in_sector + chunk]);
                }
                None => {
                    buf[done..done + chunk].fill(0);
                }
            }
            done += chunk;
        }
        Ok(to_read)
    }

    /// Write `data` at `offset`, allocating sectors as needed and extending
    /// the logical length when the write runs past it. Returns the number
    /// of bytes actually written — short when the volume runs out of free
    /// sectors, never an error for that case.
    pub fn write_at(&mut self, handle: &mut FileHandle, offset: u32, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = u64::from(offset) + data.len() as u64;
        if end > u64::from(u32::MAX) || (end as usize).div_ceil(SECTOR_SIZE) > MAX_FILE_SECTORS {
            return Err(MfsError::Format(format!(
                "write past maximum file size: end={end}"
            )));
        }
        let end = end as u32;
        let last_idx = (end - 1) / SECTOR_SIZE as u32;

        // Extend the allocation densely through the write range so pointers
        // stay packed left-to-right. Writes in this tool are sequential, so
        // the scan almost always starts at the allocation tail.
        let mut record = handle.record;
        let mut writable_end = end;
        for idx in 0..=last_idx {
            if self.bmap(&record, idx)?.is_some() {
                continue;
            }
            if self.map_or_allocate(&mut record, idx)?.is_none() {
                writable_end = idx * SECTOR_SIZE as u32;
                break;
            }
        }

        let written = if writable_end > offset {
            let write_end = writable_end.min(end);
            let mut done = 0_usize;
            let total = (write_end - offset) as usize;
            while done < total {
                let pos = offset as usize + done;
                let idx = (pos / SECTOR_SIZE) as u32;
                let in_sector = pos % SECTOR_SIZE;
                let chunk = (SECTOR_SIZE - in_sector).min(total - done);

                let sector = self
                    .bmap(&record, idx)?
                    .ok_or_else(|| MfsError::Corruption {
                        sector: handle.inode_sector.0,
                        detail: "mapped sector vanished during write".to_string(),
                    })?;

                if chunk == SECTOR_SIZE {
                    self.device.write_sector(sector, &data[done..done + chunk])?;
                } else {
                    // Read-modify-write; bytes outside the written range
                    // keep whatever the sector already held.
                    let mut raw = self.device.read_sector(sector)?;
                    raw.as_mut_slice()[in_sector..in_sector + chunk]
                        .copy_from_slice(&data[done..done + chunk]);
                    self.device.write_sector(sector, raw.as_slice())?;
                }
                done += chunk;
            }
            total
        } else {
            0
        };

        if written > 0 {
            record.length = record.length.max(offset + written as u32);
        }
        if record != handle.record {
            self.write_inode_record(handle.inode_sector, &record)?;
            handle.record = record;
        }
        self.free_map.flush(&self.device, &self.superblock)?;
        Ok(written)
    }

    // ── Directory ───────────────────────────────────────────────────────

    fn dir_handle(&self) -> Result<FileHandle> {
        let sector = SectorNumber(self.superblock.root_dir_sector);
        Ok(FileHandle {
            name: "/".to_string(),
            inode_sector: sector,
            record: self.read_inode_record(sector)?,
        })
    }

    fn dir_content(&self) -> Result<Vec<u8>> {
        let handle = self.dir_handle()?;
        let mut content = vec![0_u8; handle.length() as usize];
        let read = self.read_at(&handle, 0, &mut content)?;
        content.truncate(read);
        Ok(content)
    }

    /// Every live directory entry, in slot order. The order is stable for
    /// one pass: nothing reorders slots except remove-then-create reuse.
    pub fn list(&self) -> Result<Vec<DirEntry>> {
        let content = self.dir_content()?;
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset + DIR_ENTRY_SIZE <= content.len() {
            if let Some(entry) =
                parse_dir_slot(&content, offset).map_err(|e| MfsError::Parse(e.to_string()))?
            {
                entries.push(entry);
            }
            offset += DIR_ENTRY_SIZE;
        }
        Ok(entries)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<DirEntry>> {
        Ok(self.list()?.into_iter().find(|e| e.name == name))
    }

    /// Add a directory entry pointing at an existing inode sector, without
    /// touching allocation. This is both the tail of [`Volume::create`] and
    /// the re-link primitive orphan recovery uses.
    pub fn link_entry(&mut self, name: &str, inode_sector: SectorNumber) -> Result<()> {
        if name.is_empty() {
            return Err(MfsError::Format("empty file name".to_string()));
        }
        if name.len() > NAME_MAX {
            return Err(MfsError::NameTooLong(name.to_string()));
        }
        if self.lookup(name)?.is_some() {
            return Err(MfsError::Exists(name.to_string()));
        }

        let content = self.dir_content()?;
        let mut offset = 0;
        while offset + DIR_ENTRY_SIZE <= content.len() {
            if parse_dir_slot(&content, offset)
                .map_err(|e| MfsError::Parse(e.to_string()))?
                .is_none()
            {
                break;
            }
            offset += DIR_ENTRY_SIZE;
        }
        // Either a free slot inside the directory, or one past the end.

        let entry = DirEntry {
            inode_sector,
            name: name.to_string(),
        };
        let mut slot = [0_u8; DIR_ENTRY_SIZE];
        encode_dir_slot(&mut slot, 0, Some(&entry))
            .map_err(|e| MfsError::Parse(e.to_string()))?;

        let mut dir = self.dir_handle()?;
        let written = self.write_at(&mut dir, offset as u32, &slot)?;
        if written < DIR_ENTRY_SIZE {
            return Err(MfsError::TargetCreationFailed {
                name: name.to_string(),
                detail: "no free sector to extend the root directory".to_string(),
            });
        }
        debug!(name, inode_sector = inode_sector.0, "linked directory entry");
        Ok(())
    }

    fn unlink_entry(&mut self, name: &str) -> Result<()> {
        let content = self.dir_content()?;
        let mut offset = 0;
        while offset + DIR_ENTRY_SIZE <= content.len() {
            let slot =
                parse_dir_slot(&content, offset).map_err(|e| MfsError::Parse(e.to_string()))?;
            if slot.is_some_and(|e| e.name == name) {
                let mut dir = self.dir_handle()?;
                let zero = [0_u8; DIR_ENTRY_SIZE];
                let written = self.write_at(&mut dir, offset as u32, &zero)?;
                debug_assert_eq!(written, DIR_ENTRY_SIZE);
                return Ok(());
            }
            offset += DIR_ENTRY_SIZE;
        }
        Err(MfsError::NotFound(name.to_string()))
    }

    // ── File lifecycle ──────────────────────────────────────────────────

    /// Create an empty file of logical length `length`. Sectors are
    /// allocated lazily as writes arrive.
    pub fn create(&mut self, name: &str, length: u32) -> Result<()> {
        if name.is_empty() {
            return Err(MfsError::Format("empty file name".to_string()));
        }
        if name.len() > NAME_MAX {
            return Err(MfsError::NameTooLong(name.to_string()));
        }
        if bytes_to_sectors(length) as usize > MAX_FILE_SECTORS {
            return Err(MfsError::Format(format!(
                "file too large for inode record: {length} bytes"
            )));
        }
        if self.lookup(name)?.is_some() {
            return Err(MfsError::Exists(name.to_string()));
        }

        let Some(inode_sector) = self.free_map.allocate() else {
            return Err(MfsError::NoSpace);
        };
        self.write_inode_record(inode_sector, &InodeRecord::with_length(length))?;

        if let Err(err) = self.link_entry(name, inode_sector) {
            self.free_map.release(inode_sector);
            self.free_map.flush(&self.device, &self.superblock)?;
            return Err(err);
        }
        self.free_map.flush(&self.device, &self.superblock)?;
        debug!(name, length, inode_sector = inode_sector.0, "created file");
        Ok(())
    }

    /// Open a file by name.
    pub fn open_file(&self, name: &str) -> Result<FileHandle> {
        let entry = self
            .lookup(name)?
            .ok_or_else(|| MfsError::NotFound(name.to_string()))?;
        Ok(FileHandle {
            name: entry.name,
            inode_sector: entry.inode_sector,
            record: self.read_inode_record(entry.inode_sector)?,
        })
    }

    /// Remove a file: drop its directory entry and release its data,
    /// pointer-table, and inode sectors.
    ///
    /// The freed sectors are not wiped. In particular the inode record's
    /// bytes stay intact in the now-free sector, which is what orphan
    /// recovery later probes for.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let entry = self
            .lookup(name)?
            .ok_or_else(|| MfsError::NotFound(name.to_string()))?;
        let record = self.read_inode_record(entry.inode_sector)?;

        for sector in self.sectors_to_release(&record)? {
            self.free_map.release(sector);
        }
        self.free_map.release(entry.inode_sector);
        self.unlink_entry(name)?;
        self.free_map.flush(&self.device, &self.superblock)?;
        debug!(name, inode_sector = entry.inode_sector.0, "removed file");
        Ok(())
    }

    /// Data and pointer-table sectors owned by `record`, honoring the
    /// first-gap-terminates rule at every level.
    fn sectors_to_release(&self, record: &InodeRecord) -> Result<Vec<SectorNumber>> {
        let mut sectors = Vec::new();

        for idx in 0..DIRECT_PTRS {
            match record.direct_ptr(idx) {
                Some(s) => sectors.push(s),
                None => return Ok(sectors),
            }
        }

        let Some(table_sector) = record.indirect_ptr() else {
            return Ok(sectors);
        };
        let table = self.read_ptr_table(table_sector)?;
        sectors.push(table_sector);
        for raw in table {
            match SectorNumber::from_ptr(raw) {
                Some(s) => sectors.push(s),
                None => return Ok(sectors),
            }
        }

        let Some(outer_sector) = record.double_indirect_ptr() else {
            return Ok(sectors);
        };
        let outer = self.read_ptr_table(outer_sector)?;
        sectors.push(outer_sector);
        for raw in outer {
            let Some(inner_sector) = SectorNumber::from_ptr(raw) else {
                return Ok(sectors);
            };
            let inner = self.read_ptr_table(inner_sector)?;
            sectors.push(inner_sector);
            for raw in inner {
                match SectorNumber::from_ptr(raw) {
                    Some(s) => sectors.push(s),
                    None => return Ok(sectors),
                }
            }
        }
        Ok(sectors)
    }
}
