#![forbid(unsafe_code)]

use mfs_block::{MemSectorDevice, SectorDevice};
use mfs_maint::{LEDGER_FILE_NAME, RecoveryMode, parse_ledger, recover};
use mfs_types::SECTOR_SIZE;
use mfs_vol::Volume;
use std::collections::BTreeMap;
use std::path::Path;
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

/// Artifact files in `dir` (ledger excluded), name -> content.
fn artifacts_in(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut found = BTreeMap::new();
    for entry in std::fs::read_dir(dir).expect("read_dir") {
        let entry = entry.expect("entry");
        let name = entry.file_name().to_string_lossy().to_string();
        if name == LEDGER_FILE_NAME {
            continue;
        }
        found.insert(name, std::fs::read(entry.path()).expect("read artifact"));
    }
    found
}

#[test]
fn orphaned_inode_is_relinked_with_content_reachable() {
    let (_, mut volume) = fresh_volume(512);
    let secret = b"deleted but not yet overwritten".to_vec();
    write_file(&mut volume, "ghost.txt", &secret);
    let inode_sector = volume.open_file("ghost.txt").expect("open").inode_sector();
    volume.remove("ghost.txt").expect("remove");

    let dir = tempfile::tempdir().expect("tempdir");
    let report = recover(&mut volume, RecoveryMode::OrphanedInodes, dir.path()).expect("recover");

    assert_eq!(report.recovered, 1);
    assert_eq!(report.failures, 0);
    let expected_name = format!("recovered0-{}", inode_sector.0);
    assert_eq!(report.artifacts, vec![expected_name.clone()]);

    // The re-linked entry points at the surviving record; its pointers are
    // trusted as-is, so the old content reads back.
    let handle = volume.open_file(&expected_name).expect("open recovered");
    assert_eq!(handle.length() as usize, secret.len());
    let mut content = vec![0_u8; secret.len()];
    volume.read_at(&handle, 0, &mut content).expect("read");
    assert_eq!(content, secret);

    // Evidence ledger has exactly one matching line.
    let ledger = std::fs::read_to_string(dir.path().join(LEDGER_FILE_NAME)).expect("ledger");
    let records = parse_ledger(&ledger).expect("parse ledger");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mode, RecoveryMode::OrphanedInodes);
    assert_eq!(records[0].sector, Some(inode_sector.0));
    assert_eq!(records[0].artifact, expected_name);
}

#[test]
fn orphan_recovery_second_run_adds_nothing() {
    let (_, mut volume) = fresh_volume(512);
    write_file(&mut volume, "ghost.txt", b"payload");
    volume.remove("ghost.txt").expect("remove");

    let dir = tempfile::tempdir().expect("tempdir");
    let first = recover(&mut volume, RecoveryMode::OrphanedInodes, dir.path()).expect("first");
    assert_eq!(first.recovered, 1);

    let second = recover(&mut volume, RecoveryMode::OrphanedInodes, dir.path()).expect("second");
    assert_eq!(second.recovered, 0, "already-linked orphan must be skipped");
    assert_eq!(second.failures, 0);
}

#[test]
fn raw_salvage_is_idempotent_on_an_unmodified_volume() {
    let (_, mut volume) = fresh_volume(256);
    write_file(&mut volume, "alpha.bin", &vec![0x11_u8; SECTOR_SIZE + 40]);
    write_file(&mut volume, "beta.bin", b"short");
    // Leave stale content behind in free sectors too.
    volume.remove("alpha.bin").expect("remove");

    let first_dir = tempfile::tempdir().expect("tempdir");
    let second_dir = tempfile::tempdir().expect("tempdir");
    let first = recover(&mut volume, RecoveryMode::RawSalvage, first_dir.path()).expect("first");
    let second = recover(&mut volume, RecoveryMode::RawSalvage, second_dir.path()).expect("second");

    assert_eq!(first.recovered, second.recovered);
    assert_eq!(first.scanned, second.scanned);

    let first_artifacts = artifacts_in(first_dir.path());
    let second_artifacts = artifacts_in(second_dir.path());
    assert!(!first_artifacts.is_empty());
    assert_eq!(first_artifacts, second_artifacts);
    for name in first_artifacts.keys() {
        assert!(name.starts_with("recovered1-") && name.ends_with(".txt"));
    }
}

#[test]
fn raw_salvage_skips_reserved_and_zero_sectors() {
    let (_, mut volume) = fresh_volume(128);
    let report = recover(&mut volume, RecoveryMode::RawSalvage, tempfile::tempdir().unwrap().path())
        .expect("recover");
    // Freshly formatted volume: data region is all zeroes, nothing rescued.
    let reserved = u64::from(volume.superblock().reserved_sectors());
    assert_eq!(report.scanned, u64::from(volume.superblock().sector_count) - reserved);
    assert_eq!(report.recovered, 0);
}

#[test]
fn tail_slack_rescues_the_exact_residual_bytes() {
    let (device, mut volume) = fresh_volume(512);
    write_file(&mut volume, "slack.txt", b"0123456789"); // length 10

    // Plant one residual byte at offset 50 of the file's final sector,
    // as a previous larger occupant would have left it.
    let handle = volume.open_file("slack.txt").expect("open");
    let sector = handle.record().direct_ptr(0).expect("mapped");
    let mut raw = device.read_sector(sector).expect("read").into_inner();
    raw[50] = 0x5A;
    device.write_sector(sector, &raw).expect("write");

    // A sector-aligned neighbor must produce nothing.
    write_file(&mut volume, "aligned.bin", &vec![0x77_u8; SECTOR_SIZE]);

    let dir = tempfile::tempdir().expect("tempdir");
    let report = recover(&mut volume, RecoveryMode::TailSlack, dir.path()).expect("recover");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.recovered, 1);
    let artifacts = artifacts_in(dir.path());
    assert_eq!(artifacts.len(), 1);
    assert_eq!(
        artifacts.get("recovered2-slack.txt.txt").map(Vec::as_slice),
        Some(&[0x5A_u8][..]),
        "exactly the one residual byte"
    );
}

#[test]
fn tail_slack_ignores_clean_partial_sectors() {
    let (_, mut volume) = fresh_volume(256);
    write_file(&mut volume, "clean.txt", b"no residue here");

    let dir = tempfile::tempdir().expect("tempdir");
    let report = recover(&mut volume, RecoveryMode::TailSlack, dir.path()).expect("recover");
    assert_eq!(report.recovered, 0);
    assert!(artifacts_in(dir.path()).is_empty());
}
