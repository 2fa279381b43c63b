#![forbid(unsafe_code)]

use mfs_block::{MemSectorDevice, SectorDevice};
use mfs_error::MfsError;
use mfs_maint::{analyze, defragment};
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
    if content.is_empty() {
        return;
    }
    let mut handle = volume.open_file(name).expect("open");
    let written = volume.write_at(&mut handle, 0, content).expect("write");
    assert_eq!(written, content.len());
}

fn read_file(volume: &Volume<Arc<MemSectorDevice>>, name: &str) -> Vec<u8> {
    let handle = volume.open_file(name).expect("open");
    let mut buf = vec![0_u8; handle.length() as usize];
    let read = volume.read_at(&handle, 0, &mut buf).expect("read");
    assert_eq!(read, buf.len());
    buf
}

#[test]
fn round_trip_preserves_every_file() {
    let (_, mut volume) = fresh_volume(1024);
    let originals: Vec<(&str, Vec<u8>)> = vec![
        ("empty.txt", Vec::new()),
        ("one-byte.txt", vec![0x41]),
        ("exact-sector.bin", vec![0x42; SECTOR_SIZE]),
        (
            "multi-sector.bin",
            (0..5 * SECTOR_SIZE + 99).map(|i| (i % 250) as u8).collect(),
        ),
    ];
    for (name, content) in &originals {
        write_file(&mut volume, name, content);
    }

    let report = defragment(&mut volume).expect("defragment");
    assert_eq!(report.files, originals.len() as u64);

    for (name, content) in &originals {
        let after = read_file(&volume, name);
        assert_eq!(&after, content, "content drifted for {name}");
        assert_eq!(after.len(), content.len(), "length drifted for {name}");
    }
}

#[test]
fn recreation_keeps_directory_order() {
    let (_, mut volume) = fresh_volume(512);
    for name in ["first", "second", "third"] {
        write_file(&mut volume, name, name.as_bytes());
    }
    let before: Vec<String> = volume.list().expect("list").into_iter().map(|e| e.name).collect();

    defragment(&mut volume).expect("defragment");

    let after: Vec<String> = volume.list().expect("list").into_iter().map(|e| e.name).collect();
    assert_eq!(before, after);
}

#[test]
fn fragmented_volume_comes_back_contiguous() {
    let (_, mut volume) = fresh_volume(1024);
    write_file(&mut volume, "a.bin", &vec![0xAA_u8; 5 * SECTOR_SIZE]);
    write_file(&mut volume, "b.bin", &vec![0xBB_u8; 4 * SECTOR_SIZE]);
    volume.remove("a.bin").expect("remove");
    // d lands in a's freed run, then jumps past b to the frontier.
    write_file(&mut volume, "d.bin", &vec![0xDD_u8; 8 * SECTOR_SIZE]);

    let before = analyze(&volume).expect("analyze");
    assert_eq!(before.fragmented_files, 1, "setup must fragment d.bin");

    defragment(&mut volume).expect("defragment");

    let after = analyze(&volume).expect("analyze");
    assert_eq!(after.fragmented_files, 0);
    assert_eq!(after.total_files, 2);
    assert_eq!(read_file(&volume, "d.bin"), vec![0xDD_u8; 8 * SECTOR_SIZE]);
    assert_eq!(read_file(&volume, "b.bin"), vec![0xBB_u8; 4 * SECTOR_SIZE]);
}

#[test]
fn unreadable_file_aborts_before_anything_is_removed() {
    let (device, mut volume) = fresh_volume(512);
    write_file(&mut volume, "good.txt", b"keep me");
    write_file(&mut volume, "bad.txt", b"metadata about to rot");

    // Rot bad.txt's inode record so extraction cannot trust it.
    let inode_sector = volume.open_file("bad.txt").expect("open").inode_sector();
    device
        .write_sector(inode_sector, &vec![0xFF_u8; SECTOR_SIZE])
        .expect("corrupt");

    let err = defragment(&mut volume).expect_err("must abort");
    assert!(
        matches!(err, MfsError::SourceUnreadable { ref name, .. } if name == "bad.txt"),
        "unexpected error: {err:?}"
    );

    // All-or-nothing: the directory is untouched and good.txt still reads.
    let names: Vec<String> = volume.list().expect("list").into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["good.txt".to_string(), "bad.txt".to_string()]);
    assert_eq!(read_file(&volume, "good.txt"), b"keep me");
}
