//! Moving an entry to the other volume and back restores it exactly, and the
//! patched snapshots agree with a fresh scan at every step.

use filetime::FileTime;
use pkgshelf::{
    Catalog, Config, EntryKind, Library, LocalDevice, NoProgress, NoTitles, PendingOperation,
    TransactionOrchestrator, VolumeConfig,
};
use std::fs;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

fn two_volumes() -> (TempDir, TempDir, Library) {
    let (a, b) = (tempdir().unwrap(), tempdir().unwrap());
    for t in [&a, &b] {
        fs::create_dir_all(t.path().join("ISO/CAT_Action")).unwrap();
        fs::create_dir_all(t.path().join("PSP/GAME/CAT_RPG")).unwrap();
    }
    let cfg = Config::new(vec![
        VolumeConfig::new("ms0", a.path()),
        VolumeConfig::new("ef0", b.path()),
    ]);
    (a, b, Library::new(cfg, Arc::new(LocalDevice), Arc::new(NoTitles)))
}

/// Fresh scan of `id` through a second library over the same config.
fn fresh(lib: &Library, id: &str) -> Catalog {
    let mut other = Library::new(lib.config().clone(), Arc::new(LocalDevice), Arc::new(NoTitles));
    other.open_volume(id).unwrap().clone()
}

fn run(lib: &mut Library, op: PendingOperation) {
    let summary = TransactionOrchestrator::new(lib, None)
        .run(op, &mut NoProgress)
        .unwrap();
    assert!(summary.is_clean(), "{:?}", summary.failed);
}

fn assert_snapshot_matches_disk(lib: &mut Library, id: &str) {
    let patched = lib.open_volume(id).unwrap().clone();
    patched.check_invariants().unwrap();
    assert_eq!(patched.flattened, fresh(lib, id).flattened, "volume {id}");
}

#[test]
fn container_round_trip_restores_entry() {
    let (a, b, mut lib) = two_volumes();
    let src = a.path().join("ISO/CAT_Action/game.iso");
    fs::write(&src, vec![9u8; 300_000]).unwrap();
    filetime::set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let before = lib.open_volume("ms0").unwrap().entry(&src).unwrap().clone();
    lib.open_volume("ef0").unwrap();

    run(
        &mut lib,
        PendingOperation::moving(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", Some("Action")),
    );
    let away = b.path().join("ISO/CAT_Action/game.iso");
    assert!(away.is_file() && !src.exists());
    assert!(!lib.cache().is_dirty("ef0"));
    assert_snapshot_matches_disk(&mut lib, "ms0");
    assert_snapshot_matches_disk(&mut lib, "ef0");

    run(
        &mut lib,
        PendingOperation::moving(vec![(away.clone(), EntryKind::ContainerFile)], "ms0", Some("CAT_Action")),
    );
    let back = lib.open_volume("ms0").unwrap().entry(&src).unwrap().clone();
    assert_eq!(back.path, before.path);
    assert_eq!(back.size_bytes, before.size_bytes);
    assert_eq!(back.sort_key, before.sort_key);
    assert_eq!(
        lib.cache().peek("ms0").unwrap().category_of(&src),
        Some(Some("CAT_Action"))
    );
    assert!(lib.cache().peek("ef0").unwrap().entry(&away).is_none());
    assert_snapshot_matches_disk(&mut lib, "ms0");
    assert_snapshot_matches_disk(&mut lib, "ef0");
}

#[test]
fn package_round_trip_keeps_contents() {
    let (a, _b, mut lib) = two_volumes();
    let app = a.path().join("PSP/GAME/CAT_RPG/Quest");
    fs::create_dir_all(app.join("DATA")).unwrap();
    fs::write(app.join("EBOOT.PBP"), b"eboot").unwrap();
    fs::write(app.join("DATA/save.bin"), vec![1u8; 70_000]).unwrap();

    let size = lib.open_volume("ms0").unwrap().entry(&app).unwrap().size_bytes;
    lib.open_volume("ef0").unwrap();

    run(
        &mut lib,
        PendingOperation::moving(vec![(app.clone(), EntryKind::PackageFolder)], "ef0", Some("RPG")),
    );
    let away = lib.volume("ef0").unwrap().root.join("PSP/GAME/CAT_RPG/Quest");
    assert!(away.join("EBOOT.PBP").is_file());
    run(
        &mut lib,
        PendingOperation::moving(vec![(away, EntryKind::PackageFolder)], "ms0", Some("RPG")),
    );

    let cat = lib.open_volume("ms0").unwrap();
    let e = cat.entry(&app).unwrap();
    assert_eq!(e.kind, EntryKind::PackageFolder);
    assert_eq!(e.size_bytes, size);
    assert_eq!(fs::read(app.join("DATA/save.bin")).unwrap().len(), 70_000);
    assert_snapshot_matches_disk(&mut lib, "ms0");
}

#[test]
fn copy_leaves_source_and_adds_destination() {
    let (a, b, mut lib) = two_volumes();
    let src = a.path().join("ISO/loose.iso");
    fs::write(&src, b"abcdef").unwrap();
    lib.open_volume("ms0").unwrap();
    lib.open_volume("ef0").unwrap();

    run(
        &mut lib,
        PendingOperation::copying(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", None),
    );
    let dst = b.path().join("ISO/loose.iso");
    assert_eq!(fs::read(&dst).unwrap(), b"abcdef");
    assert!(lib.cache().peek("ms0").unwrap().entry(&src).is_some());
    assert_eq!(lib.cache().peek("ef0").unwrap().category_of(&dst), Some(None));
    assert_snapshot_matches_disk(&mut lib, "ef0");
}
