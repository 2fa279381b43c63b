#![forbid(unsafe_code)]

use mfs_block::{MemSectorDevice, SectorDevice};
use mfs_maint::analyze;
use mfs_types::SECTOR_SIZE;
use mfs_vol::Volume;
use std::sync::Arc;

fn fresh_volume(sectors: u32) -> (Arc<MemSectorDevice>, Volume<Arc<MemSectorDevice>>) {
    let device = Arc::new(MemSectorDevice::new(sectors));
    let volume = Volume::format(Arc::clone(&device)).expect("format");
    (device, volume)
}

fn write_file(volume: &mut Volume<Arc<MemSectorDevice>>, name: &str, content: &[u8]) {
    volume.create(name, content.len() as u32).expect("create");
    let mut handle = volume.open_file(name).expect("open");
    let written = volume.write_at(&mut handle, 0, content).expect("write");
    assert_eq!(written, content.len());
}

#[test]
fn empty_volume_reports_undefined_ratio() {
    let (_, volume) = fresh_volume(128);
    let report = analyze(&volume).expect("analyze");
    assert_eq!(report.total_files, 0);
    assert_eq!(report.ratio(), None, "no files: ratio must be undefined");
}

#[test]
fn one_fragmented_file_in_four_gives_a_quarter() {
    let (device, mut volume) = fresh_volume(512);
    for name in ["a.bin", "b.bin", "c.bin", "d.bin"] {
        write_file(&mut volume, name, &vec![0x33_u8; 2 * SECTOR_SIZE]);
    }

    // Rewrite d's pointers to the synthetic shape {10, 11, 12, 20}:
    // the 12 -> 20 jump exceeds the tolerance of 3.
    let handle = volume.open_file("d.bin").expect("open");
    let inode_sector = handle.inode_sector();
    let mut record = *handle.record();
    record.direct = [0; mfs_types::DIRECT_PTRS];
    record.direct[..4].copy_from_slice(&[10, 11, 12, 20]);
    record.length = 4 * SECTOR_SIZE as u32;
    device
        .write_sector(inode_sector, &record.encode())
        .expect("tamper");

    let report = analyze(&volume).expect("analyze");
    assert_eq!(report.total_files, 4);
    assert_eq!(report.fragmented_files, 1);
    assert_eq!(report.ratio(), Some(0.25));
}

#[test]
fn naturally_contiguous_files_are_clean() {
    let (_, mut volume) = fresh_volume(512);
    write_file(&mut volume, "one.bin", &vec![1_u8; 3 * SECTOR_SIZE]);
    write_file(&mut volume, "two.bin", &vec![2_u8; 5 * SECTOR_SIZE]);

    let report = analyze(&volume).expect("analyze");
    assert_eq!(report.total_files, 2);
    assert_eq!(report.fragmented_files, 0);
    assert_eq!(report.ratio(), Some(0.0));
}

#[test]
fn unparsable_inode_is_skipped_not_fatal() {
    let (device, mut volume) = fresh_volume(512);
    write_file(&mut volume, "ok.bin", &vec![1_u8; 2 * SECTOR_SIZE]);
    write_file(&mut volume, "broken.bin", &vec![2_u8; 2 * SECTOR_SIZE]);

    let inode_sector = volume.open_file("broken.bin").expect("open").inode_sector();
    device
        .write_sector(inode_sector, &vec![0xEE_u8; SECTOR_SIZE])
        .expect("corrupt");

    let report = analyze(&volume).expect("analyze");
    assert_eq!(report.total_files, 2);
    assert_eq!(report.fragmented_files, 0);
    assert_eq!(report.skipped_files, 1);
}

#[test]
fn analysis_does_not_mutate_the_volume() {
    let (device, mut volume) = fresh_volume(256);
    write_file(&mut volume, "frozen.bin", &vec![9_u8; 3 * SECTOR_SIZE]);

    let before: Vec<Vec<u8>> = (0..device.sector_count())
        .map(|s| {
            device
                .read_sector(mfs_types::SectorNumber(s))
                .expect("read")
                .into_inner()
        })
        .collect();

    let _ = analyze(&volume).expect("analyze");

    for (s, snapshot) in before.iter().enumerate() {
        let after = device
            .read_sector(mfs_types::SectorNumber(s as u32))
            .expect("read");
        assert_eq!(after.as_slice(), snapshot.as_slice(), "sector {s} changed");
    }
}
