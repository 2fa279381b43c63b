//! Block address resolution: the ordered sequence of physical sectors a
//! file occupies.
//!
//! [`SectorWalk`] is a lazy iterator over an inode record's allocation —
//! all direct pointers, then the single-indirect table, then each table
//! reachable from the double-indirect table. Each indirect sector is read
//! exactly once, into a staging table that is dropped when its level is
//! consumed. The first zero pointer at any level ends the walk: a gap is
//! end-of-allocation, not a hole to skip over.
//!
//! The walk never mutates metadata, and a fully unallocated record yields
//! an empty sequence rather than an error.

use mfs_block::SectorDevice;
use mfs_error::{MfsError, Result};
use mfs_ondisk::{InodeRecord, parse_ptr_table};
use mfs_types::{DIRECT_PTRS, PTRS_PER_SECTOR, SectorNumber};

type PtrTable = Box<[u32; PTRS_PER_SECTOR]>;

enum Stage {
    Direct(usize),
    Indirect {
        table: PtrTable,
        idx: usize,
    },
    Double {
        outer: PtrTable,
        outer_idx: usize,
        inner: Option<(PtrTable, usize)>,
    },
    Done,
}

/// Lazy walk over a file's allocated physical sectors, in logical order.
pub struct SectorWalk<'a, D: SectorDevice> {
    device: &'a D,
    record: InodeRecord,
    stage: Stage,
}

impl<'a, D: SectorDevice> SectorWalk<'a, D> {
    #[must_use]
    pub fn new(device: &'a D, record: InodeRecord) -> Self {
        Self {
            device,
            record,
            stage: Stage::Direct(0),
        }
    }

    /// A fresh walk over the same record, starting from the beginning.
    #[must_use]
    pub fn restart(&self) -> Self {
        Self::new(self.device, self.record)
    }

    fn read_table(&self, sector: SectorNumber) -> Result<PtrTable> {
        let raw = self.device.read_sector(sector)?;
        parse_ptr_table(raw.as_slice())
            .map(Box::new)
            .map_err(|e| MfsError::Corruption {
                sector: sector.0,
                detail: e.to_string(),
            })
    }
}

impl<D: SectorDevice> Iterator for SectorWalk<'_, D> {
    type Item = Result<SectorNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Take the stage out; every arm either returns with the stage
            // left at Done (end of walk) or installs the successor stage.
            match std::mem::replace(&mut self.stage, Stage::Done) {
                Stage::Direct(idx) => {
                    if idx < DIRECT_PTRS {
                        match self.record.direct_ptr(idx) {
                            Some(sector) => {
                                self.stage = Stage::Direct(idx + 1);
                                return Some(Ok(sector));
                            }
                            None => return None,
                        }
                    }
                    let Some(table_sector) = self.record.indirect_ptr() else {
                        return None;
                    };
                    match self.read_table(table_sector) {
                        Ok(table) => self.stage = Stage::Indirect { table, idx: 0 },
                        Err(err) => return Some(Err(err)),
                    }
                }
                Stage::Indirect { table, idx } => {
                    if idx < PTRS_PER_SECTOR {
                        match SectorNumber::from_ptr(table[idx]) {
                            Some(sector) => {
                                self.stage = Stage::Indirect {
                                    table,
                                    idx: idx + 1,
                                };
                                return Some(Ok(sector));
                            }
                            None => return None,
                        }
                    }
                    let Some(outer_sector) = self.record.double_indirect_ptr() else {
                        return None;
                    };
                    match self.read_table(outer_sector) {
                        Ok(outer) => {
                            self.stage = Stage::Double {
                                outer,
                                outer_idx: 0,
                                inner: None,
                            };
                        }
                        Err(err) => return Some(Err(err)),
                    }
                }
                Stage::Double {
                    outer,
                    outer_idx,
                    inner,
                } => match inner {
                    Some((inner_table, inner_idx)) if inner_idx < PTRS_PER_SECTOR => {
                        match SectorNumber::from_ptr(inner_table[inner_idx]) {
                            Some(sector) => {
                                self.stage = Stage::Double {
                                    outer,
                                    outer_idx,
                                    inner: Some((inner_table, inner_idx + 1)),
                                };
                                return Some(Ok(sector));
                            }
                            None => return None,
                        }
                    }
                    Some(_) => {
                        // Inner table consumed; its staging buffer drops here.
                        self.stage = Stage::Double {
                            outer,
                            outer_idx: outer_idx + 1,
                            inner: None,
                        };
                    }
                    None => {
                        if outer_idx >= PTRS_PER_SECTOR {
                            return None;
                        }
                        let Some(inner_sector) = SectorNumber::from_ptr(outer[outer_idx]) else {
                            return None;
                        };
                        match self.read_table(inner_sector) {
                            Ok(inner_table) => {
                                self.stage = Stage::Double {
                                    outer,
                                    outer_idx,
                                    inner: Some((inner_table, 0)),
                                };
                            }
                            Err(err) => return Some(Err(err)),
                        }
                    }
                },
                Stage::Done => return None,
            }
        }
    }
}
