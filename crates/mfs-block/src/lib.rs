#![forbid(unsafe_code)]
//! Sector-level I/O for MendFS volumes.
//!
//! Provides the [`SectorDevice`] trait, a file-backed implementation using
//! `pread`/`pwrite` style positioned I/O, an in-memory implementation for
//! tests and scratch volumes, and a write-through LRU cache wrapper.
//!
//! All I/O is whole-sector: there is no partial-sector read or write at this
//! layer. Callers that need sub-sector access read the sector, splice, and
//! write it back.

use mfs_error::{MfsError, Result};
use mfs_types::{SECTOR_SIZE, SectorNumber};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned sector buffer.
///
/// Invariant: length == `SECTOR_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorBuf {
    bytes: Vec<u8>,
}

impl SectorBuf {
    /// Wrap an owned buffer. `bytes.len()` must equal `SECTOR_SIZE`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), SECTOR_SIZE);
        Self { bytes }
    }

    /// A sector of all zeroes.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0_u8; SECTOR_SIZE],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }

    /// True if every byte in the sector is zero.
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

/// Sector-addressed I/O interface.
pub trait SectorDevice: Send + Sync {
    /// Read a sector by number.
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf>;

    /// Write a sector by number. `data.len()` MUST equal `SECTOR_SIZE`.
    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()>;

    /// Total number of sectors.
    fn sector_count(&self) -> u32;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

impl<D: SectorDevice + ?Sized> SectorDevice for Arc<D> {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        (**self).read_sector(sector)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        (**self).write_sector(sector, data)
    }

    fn sector_count(&self) -> u32 {
        (**self).sector_count()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

fn check_bounds(sector: SectorNumber, count: u32) -> Result<()> {
    if sector.0 >= count {
        return Err(MfsError::Format(format!(
            "sector out of range: sector={} sector_count={count}",
            sector.0
        )));
    }
    Ok(())
}

fn check_write_len(data: &[u8]) -> Result<()> {
    if data.len() != SECTOR_SIZE {
        return Err(MfsError::Format(format!(
            "write_sector data size mismatch: got={} expected={SECTOR_SIZE}",
            data.len()
        )));
    }
    Ok(())
}

// ── File-backed device ──────────────────────────────────────────────────────

/// File-backed sector device using `pread`/`pwrite` style I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileSectorDevice {
    file: Arc<File>,
    sector_count: u32,
}

impl FileSectorDevice {
    /// Open an existing image. The image length must be sector-aligned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Self::from_file(file, len)
    }

    /// Create (or truncate) an image of exactly `sector_count` sectors.
    pub fn create(path: impl AsRef<Path>, sector_count: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let len = u64::from(sector_count) * SECTOR_SIZE as u64;
        file.set_len(len)?;
        Self::from_file(file, len)
    }

    fn from_file(file: File, len: u64) -> Result<Self> {
        let remainder = len % SECTOR_SIZE as u64;
        if remainder != 0 {
            return Err(MfsError::Format(format!(
                "image length is not sector-aligned: len_bytes={len} remainder={remainder}"
            )));
        }
        let sector_count = u32::try_from(len / SECTOR_SIZE as u64)
            .map_err(|_| MfsError::Format(format!("image too large: len_bytes={len}")))?;
        Ok(Self {
            file: Arc::new(file),
            sector_count,
        })
    }
}

impl SectorDevice for FileSectorDevice {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        check_bounds(sector, self.sector_count)?;
        let mut buf = vec![0_u8; SECTOR_SIZE];
        self.file.read_exact_at(&mut buf, sector.byte_offset())?;
        Ok(SectorBuf::new(buf))
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        check_write_len(data)?;
        check_bounds(sector, self.sector_count)?;
        self.file.write_all_at(data, sector.byte_offset())?;
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ── In-memory device ────────────────────────────────────────────────────────

/// In-memory sector device for tests, benches, and scratch volumes.
#[derive(Debug)]
pub struct MemSectorDevice {
    bytes: Mutex<Vec<u8>>,
    sector_count: u32,
}

impl MemSectorDevice {
    #[must_use]
    pub fn new(sector_count: u32) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; sector_count as usize * SECTOR_SIZE]),
            sector_count,
        }
    }
}

impl SectorDevice for MemSectorDevice {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        check_bounds(sector, self.sector_count)?;
        let start = sector.0 as usize * SECTOR_SIZE;
        let bytes = self.bytes.lock();
        let buf = bytes[start..start + SECTOR_SIZE].to_vec();
        drop(bytes);
        Ok(SectorBuf::new(buf))
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        check_write_len(data)?;
        check_bounds(sector, self.sector_count)?;
        let start = sector.0 as usize * SECTOR_SIZE;
        let mut bytes = self.bytes.lock();
        bytes[start..start + SECTOR_SIZE].copy_from_slice(data);
        drop(bytes);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

// ── Write-through LRU cache ─────────────────────────────────────────────────

#[derive(Debug)]
struct LruState {
    capacity: usize,
    resident: HashMap<SectorNumber, Vec<u8>>,
    order: VecDeque<SectorNumber>,
}

impl LruState {
    fn touch(&mut self, sector: SectorNumber) {
        if let Some(pos) = self.order.iter().position(|s| *s == sector) {
            let _ = self.order.remove(pos);
        }
        self.order.push_back(sector);
    }

    fn insert(&mut self, sector: SectorNumber, data: Vec<u8>) {
        self.resident.insert(sector, data);
        self.touch(sector);
        while self.resident.len() > self.capacity {
            let Some(victim) = self.order.pop_front() else {
                break;
            };
            let _ = self.resident.remove(&victim);
        }
    }
}

/// Write-through LRU cache wrapper around a [`SectorDevice`].
///
/// Reads are served from the cache when resident; writes go to the inner
/// device first and then update the cached copy, so the cache never holds
/// data the device does not. Eviction is plain LRU.
#[derive(Debug)]
pub struct SectorCache<D: SectorDevice> {
    inner: D,
    state: Mutex<LruState>,
}

impl<D: SectorDevice> SectorCache<D> {
    /// Wrap `inner` with a cache holding up to `capacity` sectors.
    #[must_use]
    pub fn new(inner: D, capacity: usize) -> Self {
        Self {
            inner,
            state: Mutex::new(LruState {
                capacity: capacity.max(1),
                resident: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: SectorDevice> SectorDevice for SectorCache<D> {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        let mut state = self.state.lock();
        if let Some(data) = state.resident.get(&sector) {
            let buf = SectorBuf::new(data.clone());
            state.touch(sector);
            return Ok(buf);
        }
        drop(state);

        let buf = self.inner.read_sector(sector)?;
        let mut state = self.state.lock();
        state.insert(sector, buf.as_slice().to_vec());
        drop(state);
        Ok(buf)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        self.inner.write_sector(sector, data)?;
        let mut state = self.state.lock();
        state.insert(sector, data.to_vec());
        drop(state);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.inner.sector_count()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
