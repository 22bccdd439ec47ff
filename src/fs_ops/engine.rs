//! File-operation engine: move, copy and delete of one catalog entry.
//!
//! Each call walks the tier chain for its scenario (see [`chain`]), stopping
//! at the first tier that succeeds. Items holding critical files are then
//! verified through the device; an unverifiable destination re-runs the whole
//! operation once and then fails with a guard error.

use anyhow::{Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::audit::{copy_tree, tree_bytes};
use super::helpers::{io_error_with_help, is_cross_device};
use super::io_copy::{CopyPolicy, copy_file};
use super::prepare::{clear_collisions, ensure_parent_dirs};
use super::progress::{ProgressSink, TreeProgress};
use super::remove::remove_tree;
use super::space::Mode;
use super::strategy::{Tier, TierError, chain};
use crate::catalog::{CacheEffect, CacheEffects, CatalogPatch, EntryKind};
use crate::config::{Config, VolumeConfig};
use crate::errors::{OpError, ShelfError};
use crate::paths::{is_critical, is_junk_name, same_volume, volume_of};
use crate::platform::Device;

/// Attempts per operation when critical files fail verification.
pub const VERIFY_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub replace_on_collision: bool,
    pub critical_extensions: Vec<String>,
    pub presence_repoll: Duration,
    pub copy: CopyPolicy,
}

impl EnginePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            replace_on_collision: config.replace_on_collision,
            critical_extensions: config.critical_extensions.clone(),
            presence_repoll: config.presence_repoll,
            copy: CopyPolicy::with_budget(config.write_retry_budget),
        }
    }
}

/// Successful engine call.
#[derive(Debug)]
#[must_use = "the report carries cache effects that must be applied"]
pub struct OpReport {
    /// Final location (`None` for delete)
    pub dest: Option<PathBuf>,
    pub tier: Tier,
    /// 1, or 2 when the first attempt failed verification
    pub attempts: u32,
    pub effects: CacheEffects,
}

/// One item in flight.
struct Job<'a> {
    src: &'a Path,
    dst: &'a Path,
    src_vol: &'a VolumeConfig,
    dst_vol: &'a VolumeConfig,
    is_dir: bool,
    label: String,
    /// Destination paths that must be visible afterwards
    critical: Vec<PathBuf>,
}

pub struct FileOperationEngine {
    volumes: Vec<VolumeConfig>,
    device: Arc<dyn Device>,
    policy: EnginePolicy,
}

impl FileOperationEngine {
    pub fn new(volumes: Vec<VolumeConfig>, device: Arc<dyn Device>, policy: EnginePolicy) -> Self {
        Self {
            volumes,
            device,
            policy,
        }
    }

    pub fn from_config(config: &Config, device: Arc<dyn Device>) -> Self {
        Self::new(config.volumes.clone(), device, EnginePolicy::from_config(config))
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    fn volume_for(&self, path: &Path) -> Result<&VolumeConfig, OpError> {
        volume_of(&self.volumes, path)
            .ok_or_else(|| OpError::Failed(ShelfError::OutsideVolumes(path.to_path_buf()).into()))
    }

    /// Critical files of `src`, mapped to where they will live under `dst`.
    /// Folders contribute their top-level files only.
    fn critical_targets(&self, src: &Path, dst: &Path, is_dir: bool) -> Vec<PathBuf> {
        let exts = &self.policy.critical_extensions;
        if !is_dir {
            return if is_critical(src, exts) {
                vec![dst.to_path_buf()]
            } else {
                Vec::new()
            };
        }
        let Ok(rd) = fs::read_dir(src) else {
            return Vec::new();
        };
        let mut out: Vec<PathBuf> = rd
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| !is_junk_name(&e.file_name()) && is_critical(&e.path(), exts))
            .map(|e| dst.join(e.file_name()))
            .collect();
        out.sort();
        out
    }

    /// First critical target still invisible after one re-poll.
    fn unverified(&self, targets: &[PathBuf]) -> Option<PathBuf> {
        let missing = || targets.iter().find(|p| !self.device.exists(p)).cloned();
        missing()?;
        debug!(delay = ?self.policy.presence_repoll, "critical file not visible yet; re-polling");
        thread::sleep(self.policy.presence_repoll);
        missing()
    }

    fn prepare(&self, job: &Job<'_>) -> Result<()> {
        ensure_parent_dirs(&job.dst_vol.root, job.dst)?;
        if self.policy.replace_on_collision {
            clear_collisions(job.dst, job.src)?;
        }
        Ok(())
    }

    fn run_chain(&self, tiers: &[Tier], job: &Job<'_>, sink: &mut dyn ProgressSink) -> Result<Tier, OpError> {
        let mut last: Option<anyhow::Error> = None;
        for &tier in tiers {
            match self.run_tier(tier, job, sink) {
                Ok(()) => {
                    debug!(%tier, src = %job.src.display(), "tier succeeded");
                    return Ok(tier);
                }
                Err(TierError::NotApplicable) => continue,
                Err(TierError::Retryable(e)) => {
                    debug!(%tier, error = %e, "tier failed; falling back");
                    last = Some(e);
                }
                Err(TierError::Fatal(e)) => return Err(e),
            }
        }
        Err(OpError::Failed(
            last.unwrap_or_else(|| anyhow!("no strategy applies to '{}'", job.src.display())),
        ))
    }

    fn run_tier(&self, tier: Tier, job: &Job<'_>, sink: &mut dyn ProgressSink) -> Result<(), TierError> {
        let same = same_volume(&self.volumes, job.src, job.dst);
        match tier {
            Tier::Relocate => {
                if !same {
                    return Err(TierError::NotApplicable);
                }
                let (Ok(rs), Ok(rd)) = (
                    job.src.strip_prefix(&job.src_vol.root),
                    job.dst.strip_prefix(&job.dst_vol.root),
                ) else {
                    return Err(TierError::NotApplicable);
                };
                self.device
                    .relocate(job.src_vol, rs, rd)
                    .map_err(|e| TierError::Retryable(io_error_with_help("relocate", job.src)(e)))?;
                self.report_done(job, sink);
                Ok(())
            }
            Tier::Rename => {
                if !same {
                    return Err(TierError::NotApplicable);
                }
                fs::rename(job.src, job.dst).map_err(|e| {
                    if is_cross_device(&e) {
                        debug!(src = %job.src.display(), "volume spans filesystems");
                    }
                    TierError::Retryable(io_error_with_help("rename", job.src)(e))
                })?;
                self.report_done(job, sink);
                Ok(())
            }
            Tier::ChildRename => {
                if !job.is_dir || !same {
                    return Err(TierError::NotApplicable);
                }
                self.child_rename(job.src, job.dst).map_err(TierError::Retryable)?;
                self.report_done(job, sink);
                Ok(())
            }
            Tier::Copy => self.copy_entry(job, sink),
            Tier::CopyDelete => {
                self.copy_entry(job, sink)?;
                if let Some(missing) = self.unverified(&job.critical) {
                    warn!(missing = %missing.display(), "copied entry failed verification; keeping source");
                    if let Err(e) = remove_tree(job.dst) {
                        debug!(dst = %job.dst.display(), error = %e, "could not remove unverified copy");
                    }
                    return Err(TierError::Fatal(OpError::guard(missing)));
                }
                remove_tree(job.src)
                    .map_err(|e| TierError::Fatal(io_error_with_help("remove source", job.src)(e).into()))
            }
            Tier::Delete => {
                remove_tree(job.src)
                    .map_err(|e| TierError::Fatal(io_error_with_help("delete", job.src)(e).into()))?;
                self.report_done(job, sink);
                Ok(())
            }
        }
    }

    fn report_done(&self, job: &Job<'_>, sink: &mut dyn ProgressSink) {
        sink.on_progress(&job.label, 1, 1);
    }

    fn copy_entry(&self, job: &Job<'_>, sink: &mut dyn ProgressSink) -> Result<(), TierError> {
        let policy = &self.policy.copy;
        if job.is_dir {
            let total = tree_bytes(job.src);
            let mut progress = TreeProgress::new(sink, job.label.clone(), total);
            return copy_tree(job.src, job.dst, policy, &mut progress).map_err(|e| {
                match e.downcast::<ShelfError>() {
                    Ok(s @ ShelfError::RepairExhausted { .. }) => TierError::Fatal(OpError::Guard(s)),
                    Ok(s) => TierError::Fatal(OpError::Failed(s.into())),
                    Err(e) => TierError::Fatal(OpError::Failed(e)),
                }
            });
        }
        let label = job.label.as_str();
        copy_file(job.src, job.dst, policy, &mut |done, total| sink.on_progress(label, done, total))
            .map(|r| debug!(bytes = r.bytes, buf = r.buf_size, retries = r.retries, "copied"))
            .map_err(|e| TierError::Fatal(OpError::Failed(e.into())))
    }

    /// Move `src` into `dst` child by child. Subfolders are handled before files;
    /// a file whose rename fails is copied and its source removed.
    fn child_rename(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::create_dir_all(dst).map_err(io_error_with_help("create directory", dst))?;
        let mut children: Vec<(bool, fs::DirEntry)> = fs::read_dir(src)
            .map_err(io_error_with_help("read dir", src))?
            .flatten()
            .map(|e| (e.file_type().map(|t| t.is_dir()).unwrap_or(false), e))
            .collect();
        children.sort_by_key(|(is_dir, e)| (!*is_dir, e.file_name()));

        for (is_dir, child) in children {
            let name = child.file_name();
            let from = child.path();
            if is_junk_name(&name) {
                remove_tree(&from).map_err(io_error_with_help("remove junk", &from))?;
                continue;
            }
            let to = dst.join(&name);
            if is_dir {
                self.child_rename(&from, &to)?;
                continue;
            }
            if let Err(e) = fs::rename(&from, &to) {
                debug!(file = %from.display(), error = %e, "child rename failed; copying");
                copy_file(&from, &to, &self.policy.copy, &mut |_, _| {})?;
                fs::remove_file(&from).map_err(io_error_with_help("remove source file", &from))?;
            }
        }
        fs::remove_dir(src).map_err(io_error_with_help("remove source directory", src))
    }

    /// Run `tiers`, verifying critical files and re-running once on failure.
    fn execute(&self, mode: Mode, job: &Job<'_>, sink: &mut dyn ProgressSink) -> Result<(Tier, u32), OpError> {
        let tiers = chain(mode, same_volume(&self.volumes, job.src, job.dst), job.is_dir);
        let mut guard: Option<OpError> = None;
        let mut used = tiers.last().copied().unwrap_or(Tier::CopyDelete);

        for attempt in 1..=VERIFY_ATTEMPTS {
            if attempt > 1 && !self.device.exists(job.src) {
                // Source already gone: re-running cannot help, only re-check.
                if let Some(missing) = self.unverified(&job.critical) {
                    guard = Some(OpError::guard(missing));
                    break;
                }
                return Ok((used, attempt));
            }
            if mode != Mode::Delete {
                self.prepare(job).map_err(OpError::Failed)?;
            }
            match self.run_chain(tiers, job, sink) {
                Ok(tier) => match self.unverified(&job.critical) {
                    None => return Ok((tier, attempt)),
                    Some(missing) => {
                        used = tier;
                        warn!(attempt, %tier, missing = %missing.display(), "critical file not visible after operation");
                        guard = Some(OpError::guard(missing));
                    }
                },
                Err(e @ OpError::Guard(_)) => {
                    warn!(attempt, error = %e, "guard failure");
                    guard = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Never leave a half-written copy beside an intact source.
        if self.device.exists(job.src) && fs::symlink_metadata(job.dst).is_ok() && mode != Mode::Delete {
            if let Err(e) = remove_tree(job.dst) {
                warn!(dst = %job.dst.display(), error = %e, "could not remove partial destination");
            }
        }
        let err = guard.unwrap_or_else(|| OpError::guard(job.dst));
        error!(src = %job.src.display(), dest = %job.dst.display(), error = %err, "operation failed verification");
        Err(err)
    }

    fn job<'a>(&'a self, src: &'a Path, dst: &'a Path) -> Result<Job<'a>, OpError> {
        let meta = fs::symlink_metadata(src)
            .map_err(|e| OpError::Failed(io_error_with_help("stat source", src)(e)))?;
        let is_dir = meta.is_dir();
        let src_vol = self.volume_for(src)?;
        let dst_vol = self.volume_for(dst)?;
        for (p, v) in [(src, src_vol), (dst, dst_vol)] {
            if p == v.root.as_path() {
                return Err(OpError::Failed(ShelfError::NotAnEntry(p.to_path_buf()).into()));
            }
        }
        if is_dir && dst != src && dst.starts_with(src) {
            return Err(OpError::Failed(anyhow!(
                "cannot move '{}' into itself ('{}')",
                src.display(),
                dst.display()
            )));
        }
        Ok(Job {
            src,
            dst,
            src_vol,
            dst_vol,
            is_dir,
            label: src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            critical: self.critical_targets(src, dst, is_dir),
        })
    }

    /// Move one entry. Same-volume moves try relocation, rename and (for folders)
    /// per-child rename before falling back to copy+delete.
    pub fn move_one(
        &self,
        src: &Path,
        dst: &Path,
        kind: EntryKind,
        sink: &mut dyn ProgressSink,
    ) -> Result<OpReport, OpError> {
        let job = self.job(src, dst)?;
        if src == dst {
            return Ok(OpReport {
                dest: Some(dst.to_path_buf()),
                tier: Tier::Rename,
                attempts: 0,
                effects: CacheEffects::none(),
            });
        }
        let (tier, attempts) = self.execute(Mode::Move, &job, sink)?;
        info!(src = %src.display(), dest = %dst.display(), %tier, "moved");

        let mut effects = CacheEffects::none();
        effects.push(CacheEffect::patch(
            &job.src_vol.id,
            CatalogPatch::Removed {
                path: src.to_path_buf(),
            },
        ));
        effects.push(CacheEffect::patch(
            &job.dst_vol.id,
            CatalogPatch::Added {
                path: dst.to_path_buf(),
                kind,
            },
        ));
        Ok(OpReport {
            dest: Some(dst.to_path_buf()),
            tier,
            attempts,
            effects,
        })
    }

    /// Copy one entry (file or folder tree with audit).
    pub fn copy_one(
        &self,
        src: &Path,
        dst: &Path,
        kind: EntryKind,
        sink: &mut dyn ProgressSink,
    ) -> Result<OpReport, OpError> {
        let job = self.job(src, dst)?;
        if src == dst {
            return Err(OpError::Failed(anyhow!("source and destination are the same: '{}'", src.display())));
        }
        let (tier, attempts) = self.execute(Mode::Copy, &job, sink)?;
        info!(src = %src.display(), dest = %dst.display(), "copied");
        let mut effects = CacheEffects::none();
        effects.push(CacheEffect::patch(
            &job.dst_vol.id,
            CatalogPatch::Added {
                path: dst.to_path_buf(),
                kind,
            },
        ));
        Ok(OpReport {
            dest: Some(dst.to_path_buf()),
            tier,
            attempts,
            effects,
        })
    }

    /// Delete one entry recursively.
    pub fn delete_one(&self, path: &Path, sink: &mut dyn ProgressSink) -> Result<OpReport, OpError> {
        let mut job = self.job(path, path)?;
        job.critical.clear();
        let (tier, attempts) = self.execute(Mode::Delete, &job, sink)?;
        info!(path = %path.display(), "deleted");
        let mut effects = CacheEffects::none();
        effects.push(CacheEffect::patch(
            &job.src_vol.id,
            CatalogPatch::Removed {
                path: path.to_path_buf(),
            },
        ));
        Ok(OpReport {
            dest: None,
            tier,
            attempts,
            effects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_ops::progress::NoProgress;
    use crate::platform::LocalDevice;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    /// Relocation that reports success but never touches the medium.
    struct LyingDevice {
        relocates: AtomicUsize,
    }

    impl Device for LyingDevice {
        fn relocate(&self, _v: &VolumeConfig, _s: &Path, _d: &Path) -> io::Result<()> {
            self.relocates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn capacity(&self, _v: &VolumeConfig) -> io::Result<(u64, u64)> {
            Ok((u64::MAX, u64::MAX))
        }
    }

    /// Refuses relocation so rename is used.
    struct NoRelocate;

    impl Device for NoRelocate {
        fn relocate(&self, _v: &VolumeConfig, _s: &Path, _d: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no relocation"))
        }
        fn capacity(&self, _v: &VolumeConfig) -> io::Result<(u64, u64)> {
            Ok((0, 0))
        }
    }

    fn engine(vols: Vec<VolumeConfig>, device: Arc<dyn Device>) -> FileOperationEngine {
        let mut policy = EnginePolicy::from_config(&Config::default());
        policy.presence_repoll = Duration::from_millis(5);
        FileOperationEngine::new(vols, device, policy)
    }

    fn one_volume() -> (TempDir, VolumeConfig) {
        let td = tempdir().unwrap();
        let v = VolumeConfig::new("ms0", td.path());
        (td, v)
    }

    #[test]
    fn lying_relocation_ends_in_guard_failure_with_source_intact() {
        let (td, vol) = one_volume();
        let app = td.path().join("PSP/GAME/APP");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("EBOOT.BIN"), b"code").unwrap();
        let device = Arc::new(LyingDevice {
            relocates: AtomicUsize::new(0),
        });
        let eng = engine(vec![vol], device.clone());

        let dst = td.path().join("PSP/GAME/CAT_RPG/APP");
        let err = eng
            .move_one(&app, &dst, EntryKind::PackageFolder, &mut NoProgress)
            .unwrap_err();
        assert!(err.is_guard());
        assert!(app.join("EBOOT.BIN").exists());
        assert_eq!(device.relocates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn same_volume_file_move_uses_rename_not_copy() {
        let (td, vol) = one_volume();
        fs::create_dir_all(td.path().join("ISO")).unwrap();
        let src = td.path().join("ISO/game.iso");
        fs::write(&src, b"data").unwrap();
        let eng = engine(vec![vol], Arc::new(NoRelocate));

        let dst = td.path().join("ISO/CAT_Action/game.iso");
        let report = eng
            .move_one(&src, &dst, EntryKind::ContainerFile, &mut NoProgress)
            .unwrap();
        assert_eq!(report.tier, Tier::Rename);
        assert_eq!(report.attempts, 1);
        assert!(dst.exists() && !src.exists());
        assert_eq!(report.effects.0.len(), 2);
    }

    #[test]
    fn cross_volume_copy_delete_preserves_bytes() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let vols = vec![VolumeConfig::new("ms0", a.path()), VolumeConfig::new("ef0", b.path())];
        let src = a.path().join("PSP/GAME/Quest");
        fs::create_dir_all(src.join("DATA")).unwrap();
        fs::write(src.join("EBOOT.PBP"), b"eboot").unwrap();
        fs::write(src.join("DATA/x.dat"), vec![7u8; 100_000]).unwrap();
        let eng = engine(vols, Arc::new(LocalDevice));

        let dst = b.path().join("PSP/GAME/Quest");
        let mut last = (0, 0);
        let mut sink = |_: &str, c: u64, t: u64| last = (c, t);
        let report = eng.move_one(&src, &dst, EntryKind::PackageFolder, &mut sink).unwrap();
        assert_eq!(report.tier, Tier::CopyDelete);
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("DATA/x.dat")).unwrap().len(), 100_000);
        assert_eq!(last, (100_005, 100_005));
    }

    #[test]
    fn collision_is_replaced_case_insensitively() {
        let (td, vol) = one_volume();
        let iso = td.path().join("ISO");
        fs::create_dir_all(iso.join("CAT_A")).unwrap();
        fs::write(iso.join("game.iso"), b"new").unwrap();
        fs::write(iso.join("CAT_A/GAME.ISO"), b"old").unwrap();
        let eng = engine(vec![vol], Arc::new(NoRelocate));

        let _ = eng
            .move_one(&iso.join("game.iso"), &iso.join("CAT_A/game.iso"), EntryKind::ContainerFile, &mut NoProgress)
            .unwrap();
        let names: Vec<_> = fs::read_dir(iso.join("CAT_A"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["game.iso"]);
    }

    #[test]
    fn copy_one_folder_and_delete_one() {
        let (td, vol) = one_volume();
        let src = td.path().join("PSP/GAME/Quest");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("EBOOT.PBP"), b"x").unwrap();
        let eng = engine(vec![vol], Arc::new(LocalDevice));

        let dst = td.path().join("PSP/GAME/CAT_Copy/Quest");
        let r = eng.copy_one(&src, &dst, EntryKind::PackageFolder, &mut NoProgress).unwrap();
        assert_eq!(r.tier, Tier::Copy);
        assert!(src.join("EBOOT.PBP").exists() && dst.join("EBOOT.PBP").exists());

        let d = eng.delete_one(&dst, &mut NoProgress).unwrap();
        assert!(d.dest.is_none());
        assert!(!dst.exists());
    }

    #[test]
    fn rejects_paths_outside_volumes() {
        let (td, vol) = one_volume();
        let other = tempdir().unwrap();
        let f = other.path().join("a.iso");
        fs::write(&f, b"x").unwrap();
        let eng = engine(vec![vol], Arc::new(LocalDevice));
        let err = eng
            .move_one(&f, &td.path().join("ISO/a.iso"), EntryKind::ContainerFile, &mut NoProgress)
            .unwrap_err();
        assert!(!err.is_guard());
    }

    #[test]
    fn child_rename_merges_into_existing_folder() {
        let (td, vol) = one_volume();
        let src = td.path().join("src");
        fs::create_dir_all(src.join("SUB")).unwrap();
        fs::write(src.join("SUB/a.bin"), b"a").unwrap();
        fs::write(src.join("._junk"), b"j").unwrap();
        let dst = td.path().join("dst");
        let eng = engine(vec![vol], Arc::new(LocalDevice));
        eng.child_rename(&src, &dst).unwrap();
        assert!(dst.join("SUB/a.bin").exists());
        assert!(!dst.join("._junk").exists());
        assert!(!src.exists());
    }

    /// Real relocation whose target only shows up on the third lookup.
    struct SlowToShow {
        target: PathBuf,
        lookups: AtomicUsize,
    }

    impl Device for SlowToShow {
        fn relocate(&self, v: &VolumeConfig, s: &Path, d: &Path) -> io::Result<()> {
            fs::rename(v.root.join(s), v.root.join(d))
        }
        fn capacity(&self, _v: &VolumeConfig) -> io::Result<(u64, u64)> {
            Ok((u64::MAX, u64::MAX))
        }
        fn exists(&self, path: &Path) -> bool {
            if path == self.target && self.lookups.fetch_add(1, Ordering::SeqCst) < 2 {
                return false;
            }
            fs::symlink_metadata(path).is_ok()
        }
    }

    #[test]
    fn late_visibility_reports_the_tier_that_ran() {
        let (td, vol) = one_volume();
        fs::create_dir_all(td.path().join("ISO")).unwrap();
        let src = td.path().join("ISO/game.iso");
        fs::write(&src, b"data").unwrap();
        let dst = td.path().join("ISO/CAT_RPG/game.iso");
        let device = Arc::new(SlowToShow {
            target: dst.clone(),
            lookups: AtomicUsize::new(0),
        });
        let eng = engine(vec![vol], device);

        let report = eng
            .move_one(&src, &dst, EntryKind::ContainerFile, &mut NoProgress)
            .unwrap();
        assert_eq!(report.tier, Tier::Relocate);
        assert_eq!(report.attempts, 2);
        assert!(dst.exists() && !src.exists());
    }

    #[test]
    fn dotted_destination_is_refused() {
        let (td, vol) = one_volume();
        fs::create_dir_all(td.path().join("ISO")).unwrap();
        let src = td.path().join("ISO/game.iso");
        fs::write(&src, b"data").unwrap();
        let eng = engine(vec![vol], Arc::new(LocalDevice));

        let dst = td.path().join("ISO/../../escaped/game.iso");
        let err = eng
            .copy_one(&src, &dst, EntryKind::ContainerFile, &mut NoProgress)
            .unwrap_err();
        assert!(!err.is_guard());
        assert!(src.exists());
        assert!(!td.path().parent().unwrap().join("escaped").exists());
    }

    #[test]
    fn volume_root_is_not_an_entry() {
        let (td, vol) = one_volume();
        fs::create_dir_all(td.path().join("ISO")).unwrap();
        fs::write(td.path().join("ISO/game.iso"), b"data").unwrap();
        let eng = engine(vec![vol], Arc::new(LocalDevice));

        let err = eng.delete_one(td.path(), &mut NoProgress).unwrap_err();
        assert!(matches!(
            &err,
            OpError::Failed(e) if matches!(e.downcast_ref::<ShelfError>(), Some(ShelfError::NotAnEntry(_)))
        ));
        assert!(td.path().join("ISO/game.iso").exists());
    }

    #[cfg(unix)]
    #[test]
    fn exhausted_folder_repair_is_a_guard_failure() {
        let (td, vol) = one_volume();
        let src = td.path().join("PSP/GAME/Quest");
        fs::create_dir_all(src.join("DATA")).unwrap();
        fs::write(src.join("EBOOT.PBP"), b"x").unwrap();
        std::os::unix::fs::symlink(td.path().join("nowhere"), src.join("DATA/dead.bin")).unwrap();
        let eng = engine(vec![vol], Arc::new(LocalDevice));

        let dst = td.path().join("PSP/GAME/CAT_Copy/Quest");
        let err = eng
            .copy_one(&src, &dst, EntryKind::PackageFolder, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, OpError::Guard(ShelfError::RepairExhausted { .. })));
        assert!(!dst.exists());
        assert!(src.join("EBOOT.PBP").exists());
    }
}
