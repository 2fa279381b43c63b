#![forbid(unsafe_code)]

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use mfs_block::{MemSectorDevice, SectorCache, SectorDevice};
use mfs_maint::SectorWalk;
use mfs_ondisk::{InodeRecord, encode_ptr_table};
use mfs_types::{DIRECT_PTRS, PTRS_PER_SECTOR, SECTOR_SIZE, SectorNumber};

/// An inode spanning all three index levels: 12 direct + 128 indirect +
/// one inner double-indirect table.
fn build_record(device: &MemSectorDevice, data_sectors: usize) -> InodeRecord {
    let mut record = InodeRecord::with_length((data_sectors * SECTOR_SIZE) as u32);
    let mut next = 2000_u32;
    let mut assign = |slot: &mut u32| {
        *slot = next;
        next += 1;
    };

    for i in 0..data_sectors.min(DIRECT_PTRS) {
        assign(&mut record.direct[i]);
    }
    if data_sectors > DIRECT_PTRS {
        record.indirect = 1000;
        let mut table = [0_u32; PTRS_PER_SECTOR];
        for slot in table
            .iter_mut()
            .take((data_sectors - DIRECT_PTRS).min(PTRS_PER_SECTOR))
        {
            assign(slot);
        }
        device
            .write_sector(SectorNumber(1000), &encode_ptr_table(&table))
            .unwrap();
    }
    if data_sectors > DIRECT_PTRS + PTRS_PER_SECTOR {
        record.double_indirect = 1001;
        let mut outer = [0_u32; PTRS_PER_SECTOR];
        outer[0] = 1002;
        device
            .write_sector(SectorNumber(1001), &encode_ptr_table(&outer))
            .unwrap();
        let mut inner = [0_u32; PTRS_PER_SECTOR];
        for slot in inner
            .iter_mut()
            .take(data_sectors - DIRECT_PTRS - PTRS_PER_SECTOR)
        {
            assign(slot);
        }
        device
            .write_sector(SectorNumber(1002), &encode_ptr_table(&inner))
            .unwrap();
    }
    record
}

fn bench_walk(c: &mut Criterion) {
    let device = MemSectorDevice::new(4096);
    let record = build_record(&device, 200);

    c.bench_function("walk_200_sectors_uncached", |b| {
        b.iter(|| {
            let count = SectorWalk::new(&device, black_box(record))
                .filter_map(Result::ok)
                .count();
            assert_eq!(count, 200);
        });
    });

    let cached = SectorCache::new(MemSectorDevice::new(4096), 64);
    let record = build_record(cached.inner(), 200);
    c.bench_function("walk_200_sectors_cached", |b| {
        b.iter(|| {
            let count = SectorWalk::new(&cached, black_box(record))
                .filter_map(Result::ok)
                .count();
            assert_eq!(count, 200);
        });
    });
}

criterion_group!(benches, bench_walk);
criterion_main!(benches);
