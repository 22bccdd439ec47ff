//! Multi-item transactions.
//!
//! A [`PendingOperation`] is resolved against its destination, checked for
//! space up front, then handed item by item to the engine. Cache effects are
//! applied after every item so the snapshot never lags the disk.

use anyhow::{Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::catalog::{CacheEffect, CacheEffects, EntryKind, RootFamily, new_category_name};
use crate::config::VolumeConfig;
use crate::errors::{OpError, ShelfError};
use crate::fs_ops::{Mode, ProgressSink, ensure_space, required_bytes};
use crate::library::{Library, ListKind, PROBE_PAUSE_TIMEOUT};
use crate::paths::{base_category_name, is_plain_name, relative_to_volume, volume_of};
use crate::probe::FreeSpaceProbe;

/// A confirmed action, consumed by [`TransactionOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub items: Vec<(PathBuf, EntryKind)>,
    /// Unused for deletes
    pub destination_volume: Option<String>,
    /// `None` files the items directly under the root
    pub destination_category: Option<String>,
    pub mode: Mode,
}

impl PendingOperation {
    pub fn moving(items: Vec<(PathBuf, EntryKind)>, volume: &str, category: Option<&str>) -> Self {
        Self::transfer(Mode::Move, items, volume, category)
    }

    pub fn copying(items: Vec<(PathBuf, EntryKind)>, volume: &str, category: Option<&str>) -> Self {
        Self::transfer(Mode::Copy, items, volume, category)
    }

    pub fn deleting(items: Vec<(PathBuf, EntryKind)>) -> Self {
        Self {
            items,
            destination_volume: None,
            destination_category: None,
            mode: Mode::Delete,
        }
    }

    fn transfer(mode: Mode, items: Vec<(PathBuf, EntryKind)>, volume: &str, category: Option<&str>) -> Self {
        Self {
            items,
            destination_volume: Some(volume.to_string()),
            destination_category: category.map(str::to_string),
            mode,
        }
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|(p, _)| p.clone()).collect()
    }
}

/// Outcome of one transaction.
#[derive(Debug, Default, Serialize)]
pub struct TransactionSummary {
    /// Final locations (source paths for deletes)
    pub succeeded: Vec<PathBuf>,
    /// (source, reason) for every failed item, guard failures included
    pub failed: Vec<(PathBuf, String)>,
    /// Sources whose critical files could not be verified
    pub guard_failures: Vec<PathBuf>,
}

impl TransactionSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn has_guard_failures(&self) -> bool {
        !self.guard_failures.is_empty()
    }
}

/// Space outlook of one prospective destination.
#[derive(Debug, Clone, Serialize)]
pub struct Eligibility {
    pub volume: String,
    pub required: u64,
    pub free: u64,
    /// Free figure came from a successful query
    pub known: bool,
    pub eligible: bool,
}

pub struct TransactionOrchestrator<'a> {
    library: &'a mut Library,
    probe: Option<&'a FreeSpaceProbe>,
}

impl<'a> TransactionOrchestrator<'a> {
    pub fn new(library: &'a mut Library, probe: Option<&'a FreeSpaceProbe>) -> Self {
        Self { library, probe }
    }

    /// Free bytes on `volume`: the probe's reading when good, else a direct query.
    fn free_bytes(&self, volume: &VolumeConfig) -> (u64, bool) {
        if let Some(p) = self.probe {
            let r = p.get(&volume.id);
            if r.ok {
                return (r.free, true);
            }
        }
        match self.library.device().capacity(volume) {
            Ok((free, _)) => (free, true),
            Err(e) => {
                warn!(volume = %volume.id, error = %e, "capacity query failed");
                (0, false)
            }
        }
    }

    /// Where `src` lands on `dest`: same root family and root, under the category
    /// or the root itself. An existing folder of the same base name is reused in
    /// whatever case it has; otherwise the folder is named per the active scheme.
    pub fn destination_for(
        &mut self,
        src: &Path,
        kind: EntryKind,
        dest: &VolumeConfig,
        category: Option<&str>,
    ) -> Result<PathBuf> {
        let blacklist = match category {
            Some(_) => Some(self.library.list(&dest.id, ListKind::Blacklist)?.clone()),
            None => None,
        };
        let config = self.library.config();
        let scanner = self.library.cache().scanner();
        let src_vol = volume_of(&config.volumes, src)
            .ok_or_else(|| ShelfError::OutsideVolumes(src.to_path_buf()))?;
        let Some(name) = src.file_name() else {
            bail!(ShelfError::NotAnEntry(src.to_path_buf()));
        };
        let family = match kind {
            EntryKind::ContainerFile => RootFamily::Containers,
            EntryKind::PackageFolder => RootFamily::Packages,
        };

        let src_roots = scanner.roots(src_vol);
        let rel_root = src_roots
            .iter()
            .filter(|(f, r)| *f == family && src.starts_with(r))
            .max_by_key(|(_, r)| r.components().count())
            .or_else(|| src_roots.iter().find(|(f, _)| *f == family))
            .and_then(|(_, r)| relative_to_volume(src_vol, r).map(Path::to_path_buf))
            .ok_or_else(|| ShelfError::NotAnEntry(src.to_path_buf()))?;
        let dest_root = dest.root.join(&rel_root);

        let (Some(category), Some(blacklist)) = (category, blacklist) else {
            return Ok(dest_root.join(name));
        };
        if !is_plain_name(category) {
            bail!(ShelfError::InvalidName(category.to_string()));
        }
        let prefix = &config.category_prefix;
        let wanted = base_category_name(category, prefix);
        let on_disk: Vec<(PathBuf, String)> = scanner
            .category_dirs(dest)
            .unwrap_or_default()
            .into_iter()
            .map(|(_, p, n)| (p, n))
            .collect();
        let existing = on_disk
            .iter()
            .find(|(p, n)| {
                p.parent() == Some(dest_root.as_path()) && base_category_name(n, prefix).eq_ignore_ascii_case(wanted)
            })
            .map(|(_, n)| n.clone());
        let folder = existing.unwrap_or_else(|| {
            new_category_name(config, on_disk.iter().map(|(_, n)| n.as_str()), wanted, &blacklist)
        });
        Ok(dest_root.join(folder).join(name))
    }

    /// Refuse anything the catalog would not list as an entry of `kind`.
    fn check_entry(&self, src: &Path, kind: EntryKind) -> Result<()> {
        let config = self.library.config();
        let vol = volume_of(&config.volumes, src).ok_or_else(|| ShelfError::OutsideVolumes(src.to_path_buf()))?;
        if !self.library.cache().scanner().is_entry(vol, src, kind) {
            bail!(ShelfError::NotAnEntry(src.to_path_buf()));
        }
        Ok(())
    }

    /// Space outlook for every configured volume as a destination.
    pub fn eligible_destinations(&self, items: &[PathBuf], mode: Mode) -> Vec<Eligibility> {
        let config = self.library.config();
        config
            .volumes
            .iter()
            .map(|v| {
                let required = required_bytes(&config.volumes, items, v, mode);
                let (free, known) = self.free_bytes(v);
                Eligibility {
                    volume: v.id.clone(),
                    required,
                    free,
                    known,
                    eligible: known && ensure_space(&v.id, required, free, config.headroom_bytes).is_ok(),
                }
            })
            .collect()
    }

    /// Refuse up front when the destination cannot absorb the items.
    pub fn preflight(&self, op: &PendingOperation) -> Result<()> {
        let Some(id) = op.destination_volume.as_deref() else {
            return Ok(());
        };
        if op.mode == Mode::Delete {
            return Ok(());
        }
        let dest = self.library.volume(id)?;
        let config = self.library.config();
        let required = required_bytes(&config.volumes, &op.paths(), &dest, op.mode);
        if required == 0 {
            return Ok(());
        }
        let (free, _) = self.free_bytes(&dest);
        ensure_space(&dest.id, required, free, config.headroom_bytes)?;
        Ok(())
    }

    /// Execute `op`. Item failures are collected, never raised; only
    /// preflight and destination errors abort before any item runs.
    pub fn run(&mut self, op: PendingOperation, sink: &mut dyn ProgressSink) -> Result<TransactionSummary> {
        self.preflight(&op)?;
        let dest = match (op.mode, op.destination_volume.as_deref()) {
            (Mode::Delete, _) => None,
            (_, Some(id)) => Some(self.library.volume(id)?),
            (_, None) => bail!("{:?} needs a destination volume", op.mode),
        };

        let probe = self.probe;
        let _pause = match op.mode {
            Mode::Delete => probe.map(|p| p.pause_guard(PROBE_PAUSE_TIMEOUT)),
            _ => None,
        };

        let mut summary = TransactionSummary::default();
        for (src, kind) in &op.items {
            if let Err(e) = self.check_entry(src, *kind) {
                warn!(src = %src.display(), error = %e, "refusing item");
                summary.failed.push((src.clone(), format!("{e:#}")));
                continue;
            }
            let outcome = match &dest {
                None => self.library.engine().delete_one(src, sink),
                Some(d) => {
                    let target = match self.destination_for(src, *kind, d, op.destination_category.as_deref()) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(src = %src.display(), error = %e, "no destination");
                            summary.failed.push((src.clone(), format!("{e:#}")));
                            continue;
                        }
                    };
                    match op.mode {
                        Mode::Move => self.library.engine().move_one(src, &target, *kind, sink),
                        _ => self.library.engine().copy_one(src, &target, *kind, sink),
                    }
                }
            };
            if outcome.is_err() {
                // Either side may have been partly written or removed.
                let mut effects = CacheEffects::none();
                if let Some(v) = volume_of(&self.library.config().volumes, src) {
                    effects.push(CacheEffect::invalidate(&v.id));
                }
                if let Some(d) = &dest {
                    effects.push(CacheEffect::invalidate(&d.id));
                }
                self.library.apply_effects(effects)?;
            }
            match outcome {
                Ok(report) => {
                    self.library.apply_effects(report.effects)?;
                    summary
                        .succeeded
                        .push(report.dest.unwrap_or_else(|| src.clone()));
                }
                Err(OpError::Guard(e)) => {
                    error!(src = %src.display(), code = e.code(), error = %e, "guard failure");
                    summary.guard_failures.push(src.clone());
                    summary.failed.push((src.clone(), e.to_string()));
                }
                Err(OpError::Failed(e)) => {
                    warn!(src = %src.display(), error = %format!("{e:#}"), "item failed");
                    summary.failed.push((src.clone(), format!("{e:#}")));
                }
            }
        }

        if let Some(p) = probe
            && op.mode != Mode::Delete
        {
            p.request_refresh();
        }
        info!(
            mode = ?op.mode,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            guard_failures = summary.guard_failures.len(),
            "transaction finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NoTitles;
    use crate::config::Config;
    use crate::fs_ops::NoProgress;
    use crate::platform::{Device, LocalDevice};
    use std::fs;
    use std::io;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    /// Local filesystem with a fixed free-space figure.
    struct FixedFree(u64);

    impl Device for FixedFree {
        fn relocate(&self, v: &VolumeConfig, s: &Path, d: &Path) -> io::Result<()> {
            LocalDevice.relocate(v, s, d)
        }
        fn capacity(&self, _v: &VolumeConfig) -> io::Result<(u64, u64)> {
            Ok((self.0, self.0 * 2))
        }
    }

    fn two_volumes(free: u64) -> (TempDir, TempDir, Library) {
        let (a, b) = (tempdir().unwrap(), tempdir().unwrap());
        for t in [&a, &b] {
            fs::create_dir_all(t.path().join("ISO")).unwrap();
            fs::create_dir_all(t.path().join("PSP/GAME")).unwrap();
        }
        let cfg = Config::new(vec![VolumeConfig::new("ms0", a.path()), VolumeConfig::new("ef0", b.path())]);
        let lib = Library::new(cfg, Arc::new(FixedFree(free)), Arc::new(NoTitles));
        (a, b, lib)
    }

    #[test]
    fn destination_reuses_existing_category_case() {
        let (a, b, mut lib) = two_volumes(u64::MAX / 4);
        fs::create_dir_all(b.path().join("ISO/CAT_action")).unwrap();
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, b"1").unwrap();
        let ef0 = lib.volume("ef0").unwrap();
        let mut orch = TransactionOrchestrator::new(&mut lib, None);
        let d = orch
            .destination_for(&src, EntryKind::ContainerFile, &ef0, Some("CAT_Action"))
            .unwrap();
        assert_eq!(d, b.path().join("ISO/CAT_action/x.iso"));
        let root = orch.destination_for(&src, EntryKind::ContainerFile, &ef0, None).unwrap();
        assert_eq!(root, b.path().join("ISO/x.iso"));
    }

    #[test]
    fn move_patches_both_snapshots() {
        let (a, b, mut lib) = two_volumes(u64::MAX / 4);
        fs::create_dir_all(a.path().join("ISO/CAT_Action")).unwrap();
        let src = a.path().join("ISO/CAT_Action/x.iso");
        fs::write(&src, vec![3u8; 2048]).unwrap();
        lib.open_volume("ms0").unwrap();
        lib.open_volume("ef0").unwrap();

        let op = PendingOperation::moving(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", Some("CAT_Action"));
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert!(summary.is_clean());
        let moved = b.path().join("ISO/CAT_Action/x.iso");
        assert_eq!(summary.succeeded, vec![moved.clone()]);

        assert!(!lib.cache().is_dirty("ms0"));
        assert!(!lib.cache().is_dirty("ef0"));
        assert!(lib.cache().peek("ms0").unwrap().entry(&src).is_none());
        let ef0 = lib.cache().peek("ef0").unwrap();
        assert_eq!(ef0.category_of(&moved), Some(Some("CAT_Action")));
        assert_eq!(ef0.entry(&moved).unwrap().size_bytes, 2048);
    }

    #[test]
    fn preflight_refuses_before_touching_anything() {
        let (a, _b, mut lib) = two_volumes(1024);
        let src = a.path().join("ISO/big.iso");
        fs::write(&src, vec![0u8; 8192]).unwrap();
        let op = PendingOperation::copying(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", None);
        let err = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ShelfError>(),
            Some(ShelfError::InsufficientSpace { .. })
        ));
        assert!(src.exists());
    }

    #[test]
    fn same_volume_move_needs_no_space() {
        let (a, _b, mut lib) = two_volumes(0);
        fs::create_dir_all(a.path().join("ISO/CAT_Other")).unwrap();
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, b"abc").unwrap();
        let op = PendingOperation::moving(vec![(src, EntryKind::ContainerFile)], "ms0", Some("Other"));
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert_eq!(summary.succeeded, vec![a.path().join("ISO/CAT_Other/x.iso")]);
    }

    #[test]
    fn delete_reports_each_item() {
        let (a, _b, mut lib) = two_volumes(0);
        let app = a.path().join("PSP/GAME/App");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("EBOOT.PBP"), b"x").unwrap();
        let missing = a.path().join("ISO/gone.iso");
        let op = PendingOperation::deleting(vec![
            (app.clone(), EntryKind::PackageFolder),
            (missing.clone(), EntryKind::ContainerFile),
        ]);
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert_eq!(summary.succeeded, vec![app.clone()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, missing);
        assert!(!summary.has_guard_failures());
        assert!(!app.exists());
    }

    #[test]
    fn eligibility_lists_every_volume() {
        let (a, _b, mut lib) = two_volumes(10 * 1024 * 1024);
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, vec![0u8; 1024]).unwrap();
        let orch = TransactionOrchestrator::new(&mut lib, None);
        let e = orch.eligible_destinations(&[src], Mode::Move);
        assert_eq!(e.len(), 2);
        assert_eq!(e[0].required, 0);
        assert_eq!(e[1].required, 1024);
        assert!(e.iter().all(|x| x.eligible));
    }

    #[test]
    fn new_category_folder_follows_the_scheme() {
        let (a, b, mut lib) = two_volumes(u64::MAX / 4);
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, b"1").unwrap();
        let op = PendingOperation::copying(vec![(src, EntryKind::ContainerFile)], "ef0", Some("RPG"));
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert_eq!(summary.succeeded, vec![b.path().join("ISO/CAT_RPG/x.iso")]);
        assert!(!b.path().join("ISO/RPG").exists());
    }

    #[test]
    fn category_with_path_segments_is_refused() {
        let (a, b, mut lib) = two_volumes(u64::MAX / 4);
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, b"1").unwrap();
        let outside = b.path().parent().unwrap().join("escaped");
        for category in ["../../escaped", "CAT_A/B", ".."] {
            let op = PendingOperation::copying(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", Some(category));
            let summary = TransactionOrchestrator::new(&mut lib, None)
                .run(op, &mut NoProgress)
                .unwrap();
            assert!(summary.succeeded.is_empty(), "{category}");
            assert_eq!(summary.failed.len(), 1);
        }
        assert!(!outside.exists());
        assert!(!b.path().join("ISO/CAT_A").exists());
        assert!(src.exists());
    }

    #[test]
    fn roots_and_volume_are_not_deletable() {
        let (a, _b, mut lib) = two_volumes(0);
        fs::write(a.path().join("ISO/x.iso"), b"1").unwrap();
        let op = PendingOperation::deleting(vec![
            (a.path().join("ISO"), EntryKind::PackageFolder),
            (a.path().join("PSP/GAME"), EntryKind::PackageFolder),
            (a.path().to_path_buf(), EntryKind::PackageFolder),
            (a.path().join("ISO/x.iso"), EntryKind::PackageFolder),
        ]);
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failed.len(), 4);
        assert!(summary.failed.iter().all(|(_, why)| why.contains("Not a catalog entry")));
        assert!(a.path().join("ISO/x.iso").exists());
        assert!(a.path().join("PSP/GAME").is_dir());
    }

    #[test]
    fn failed_item_invalidates_both_volumes() {
        let (a, b, mut lib) = two_volumes(u64::MAX / 4);
        let src = a.path().join("ISO/x.iso");
        fs::write(&src, b"1").unwrap();
        // A file where the category folder would go.
        fs::write(b.path().join("ISO/CAT_RPG"), b"in the way").unwrap();
        lib.open_volume("ms0").unwrap();
        lib.open_volume("ef0").unwrap();

        let op = PendingOperation::moving(vec![(src.clone(), EntryKind::ContainerFile)], "ef0", Some("RPG"));
        let summary = TransactionOrchestrator::new(&mut lib, None)
            .run(op, &mut NoProgress)
            .unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(!summary.has_guard_failures());
        assert!(lib.cache().is_dirty("ms0"));
        assert!(lib.cache().is_dirty("ef0"));
        assert!(src.exists());
    }
}
