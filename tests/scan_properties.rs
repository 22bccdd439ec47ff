//! Structural properties of full scans.

use pkgshelf::catalog::Scan;
use pkgshelf::{Config, DirectoryScanner, EntryKind, ListFile, NoTitles, VolumeConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn touch(root: &Path, rel: &str, bytes: &[u8]) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, bytes).unwrap();
}

fn populate(root: &Path) {
    touch(root, "ISO/CAT_Action/a.iso", b"aa");
    touch(root, "ISO/CAT_Action/B.CSO", b"b");
    touch(root, "ISO/CAT_Action/._a.iso", b"junk");
    touch(root, "ISO/CAT_Action/.DS_Store", b"junk");
    touch(root, "ISO/Demos/demo.iso", b"d");
    touch(root, "ISO/root.zso", b"r");
    touch(root, "ISO/readme.txt", b"ignored");
    touch(root, "PSP/GAME/cat_action/Shooter/EBOOT.PBP", b"e");
    touch(root, "PSP/GAME/cat_action/Shooter/DATA/x.bin", b"xyz");
    touch(root, "PSP/GAME/Loose/EBOOT.PBP", b"l");
    touch(root, "PSP/GAME/CAT_Empty/NotAPackage/readme.txt", b"n");
}

fn scanner() -> DirectoryScanner {
    DirectoryScanner::new(&Config::default(), Arc::new(NoTitles))
}

#[test]
fn scanning_twice_gives_equal_catalogs() {
    let td = tempdir().unwrap();
    populate(td.path());
    let vol = VolumeConfig::new("ms0", td.path());
    let s = scanner();
    let first = s.scan(&vol, &ListFile::default()).unwrap();
    let second = s.scan(&vol, &ListFile::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn case_variant_categories_merge_across_roots() {
    let td = tempdir().unwrap();
    populate(td.path());
    let vol = VolumeConfig::new("ms0", td.path());
    let cat = scanner().scan(&vol, &ListFile::default()).unwrap();
    cat.check_invariants().unwrap();

    let keys: Vec<&String> = cat
        .categories
        .keys()
        .filter(|k| k.eq_ignore_ascii_case("CAT_Action"))
        .collect();
    assert_eq!(keys.len(), 1);
    let action = &cat.categories[keys[0]];
    let labels: Vec<&str> = action.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["a.iso", "B.CSO", "Shooter"]);
    let shooter = action.iter().find(|e| e.label == "Shooter").unwrap();
    assert_eq!(shooter.kind, EntryKind::PackageFolder);
    assert_eq!(shooter.size_bytes, 4);

    assert!(cat.categories.contains_key("CAT_Empty"));
    assert!(cat.categories["CAT_Empty"].is_empty());
    assert_eq!(cat.len(), 6);
    assert!(cat.flattened.iter().all(|e| !e.label.starts_with("._")));
}

#[test]
fn blacklisted_base_never_becomes_a_category() {
    let td = tempdir().unwrap();
    populate(td.path());
    let vol = VolumeConfig::new("ms0", td.path());
    let bl = ListFile::parse("ACTION\r\ndemos\r\n");
    let cat = scanner().scan(&vol, &bl).unwrap();
    cat.check_invariants().unwrap();

    assert!(cat.category_key("CAT_Action").is_none());
    assert!(cat.category_key("Demos").is_none());
    let unc: Vec<&str> = cat.uncategorized.iter().map(|e| e.label.as_str()).collect();
    for label in ["a.iso", "B.CSO", "demo.iso", "Shooter", "root.zso", "Loose"] {
        assert!(unc.contains(&label), "{label} should be uncategorized: {unc:?}");
    }
    assert_eq!(cat.flattened.len(), 6);
}

#[test]
fn missing_roots_give_an_empty_catalog() {
    let td = tempdir().unwrap();
    let vol = VolumeConfig::new("ms0", td.path());
    let cat = scanner().scan(&vol, &ListFile::default()).unwrap();
    assert!(cat.is_empty());
    assert!(!cat.has_categories);
    assert!(cat.display_order().is_empty());
}
