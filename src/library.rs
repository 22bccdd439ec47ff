//! Per-session library context.
//!
//! Owns the configuration, the scan cache, the operation engine and one
//! [`VolumeSession`] per touched volume. Every mutation that reaches disk goes
//! through here so its cache effects are routed to the right snapshot.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{
    BLACKLIST_FILE, CacheEffects, Catalog, CategorySchemeEnforcer, DirectoryScanner, EnforceReport,
    FILTER_FILE, ListFile, ScanCache, TitleParser, create_category_dirs, list_path,
};
use crate::config::{Config, VolumeConfig};
use crate::errors::ShelfError;
use crate::fs_ops::{FileOperationEngine, remove_tree};
use crate::paths::base_category_name;
use crate::platform::Device;
use crate::probe::FreeSpaceProbe;

/// How long destructive operations wait for the probe to acknowledge a pause.
pub const PROBE_PAUSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session state of one volume.
#[derive(Debug)]
pub struct VolumeSession {
    pub volume: VolumeConfig,
    blacklist: Option<ListFile>,
    filter: Option<ListFile>,
    /// Scheme enforcement already ran this session
    pub scheme_enforced: bool,
}

impl VolumeSession {
    fn new(volume: VolumeConfig) -> Self {
        Self {
            volume,
            blacklist: None,
            filter: None,
            scheme_enforced: false,
        }
    }
}

/// Which per-volume list a call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Blacklist,
    Filter,
}

impl ListKind {
    fn file_name(self) -> &'static str {
        match self {
            ListKind::Blacklist => BLACKLIST_FILE,
            ListKind::Filter => FILTER_FILE,
        }
    }
}

pub struct Library {
    config: Config,
    titles: Arc<dyn TitleParser>,
    device: Arc<dyn Device>,
    cache: ScanCache<DirectoryScanner>,
    engine: FileOperationEngine,
    sessions: HashMap<String, VolumeSession>,
}

impl Library {
    pub fn new(config: Config, device: Arc<dyn Device>, titles: Arc<dyn TitleParser>) -> Self {
        let scanner = DirectoryScanner::new(&config, titles.clone());
        let engine = FileOperationEngine::from_config(&config, device.clone());
        Self {
            config,
            titles,
            device,
            cache: ScanCache::new(scanner),
            engine,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &FileOperationEngine {
        &self.engine
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn cache(&self) -> &ScanCache<DirectoryScanner> {
        &self.cache
    }

    /// Swap in a new configuration. Enforcement markers and loaded lists are
    /// reset and every snapshot is invalidated.
    pub fn set_config(&mut self, config: Config) {
        self.cache
            .replace_scanner(DirectoryScanner::new(&config, self.titles.clone()));
        self.engine = FileOperationEngine::from_config(&config, self.device.clone());
        self.sessions.clear();
        self.config = config;
        info!("configuration replaced; sessions reset");
    }

    pub fn volume(&self, id: &str) -> Result<VolumeConfig, ShelfError> {
        self.config
            .volume(id)
            .cloned()
            .ok_or_else(|| ShelfError::UnknownVolume(id.to_string()))
    }

    fn session(&mut self, id: &str) -> Result<&mut VolumeSession, ShelfError> {
        let volume = self.volume(id)?;
        Ok(self
            .sessions
            .entry(volume.id.to_ascii_lowercase())
            .or_insert_with(|| VolumeSession::new(volume)))
    }

    /// Load a list file once per session.
    fn ensure_list(&mut self, id: &str, kind: ListKind) -> Result<()> {
        let path = self.list_file_path(id, kind)?;
        let session = self.session(id)?;
        let slot = match kind {
            ListKind::Blacklist => &mut session.blacklist,
            ListKind::Filter => &mut session.filter,
        };
        if slot.is_none() {
            let list = ListFile::load(&path)?;
            debug!(volume = id, path = %path.display(), entries = list.len(), "list loaded");
            *slot = Some(list);
        }
        Ok(())
    }

    pub fn list_file_path(&self, id: &str, kind: ListKind) -> Result<PathBuf, ShelfError> {
        let volume = self.volume(id)?;
        Ok(list_path(&self.config, &volume, kind.file_name()))
    }

    /// The volume's list, loaded lazily and cached for the session.
    pub fn list(&mut self, id: &str, kind: ListKind) -> Result<&ListFile> {
        self.ensure_list(id, kind)?;
        let session = self.session(id)?;
        let slot = match kind {
            ListKind::Blacklist => &session.blacklist,
            ListKind::Filter => &session.filter,
        };
        slot.as_ref()
            .ok_or_else(|| anyhow!("{} for volume {id} was not loaded", kind.file_name()))
    }

    fn blacklist_clone(&mut self, id: &str) -> Result<ListFile> {
        Ok(self.list(id, ListKind::Blacklist)?.clone())
    }

    /// Forget the loaded lists of a volume; the next access re-reads them.
    pub fn reset_lists(&mut self, id: &str) -> Result<()> {
        let session = self.session(id)?;
        session.blacklist = None;
        session.filter = None;
        Ok(())
    }

    /// Catalog of a volume. The naming scheme is enforced the first time a
    /// volume is opened in a session.
    pub fn open_volume(&mut self, id: &str) -> Result<&Catalog> {
        let volume = self.volume(id)?;
        if !self.session(id)?.scheme_enforced {
            let report = self.enforce_scheme(id)?;
            if !report.failed.is_empty() {
                warn!(volume = id, failed = report.failed.len(), "some category folders were not renamed");
            }
        }
        let blacklist = self.blacklist_clone(id)?;
        self.cache.open(&volume, &blacklist)
    }

    /// Run the scheme enforcer now, regardless of the session marker.
    pub fn enforce_scheme(&mut self, id: &str) -> Result<EnforceReport> {
        let volume = self.volume(id)?;
        let blacklist = self.blacklist_clone(id)?;
        let mut report =
            CategorySchemeEnforcer::new(&self.config, self.cache.scanner()).enforce(&volume, &blacklist)?;
        let effects = std::mem::take(&mut report.effects);
        self.apply_effects(effects)?;
        self.session(id)?.scheme_enforced = true;
        Ok(report)
    }

    /// Route engine or enforcer effects to the owning snapshots.
    pub fn apply_effects(&mut self, effects: CacheEffects) -> Result<()> {
        for effect in effects.0 {
            let id = effect.volume().to_string();
            let volume = self.volume(&id)?;
            let blacklist = self.blacklist_clone(&id)?;
            self.cache.apply(effect, &volume, &blacklist);
        }
        Ok(())
    }

    /// Exclude `base` from category treatment on a volume.
    pub fn blacklist_add(&mut self, id: &str, base: &str) -> Result<bool> {
        let volume = self.volume(id)?;
        let path = self.list_file_path(id, ListKind::Blacklist)?;
        self.ensure_list(id, ListKind::Blacklist)?;
        let session = self.session(id)?;
        let Some(list) = session.blacklist.as_mut() else {
            return Ok(false);
        };
        if !list.add(base) {
            return Ok(false);
        }
        list.save(&path)?;
        info!(volume = %volume.id, base, "blacklisted");

        // Strip any decoration from the folder, then rescan on next open.
        let blacklist = list.clone();
        let report =
            CategorySchemeEnforcer::new(&self.config, self.cache.scanner()).enforce(&volume, &blacklist)?;
        drop(report.effects);
        self.cache.invalidate(&volume.id);
        Ok(true)
    }

    /// Re-admit `base` as a category. The live snapshot picks it up without a full rescan.
    pub fn blacklist_remove(&mut self, id: &str, base: &str) -> Result<bool> {
        let volume = self.volume(id)?;
        let path = self.list_file_path(id, ListKind::Blacklist)?;
        self.ensure_list(id, ListKind::Blacklist)?;
        let session = self.session(id)?;
        let enforced = session.scheme_enforced;
        let Some(list) = session.blacklist.as_mut() else {
            return Ok(false);
        };
        if !list.remove(base) {
            return Ok(false);
        }
        list.save(&path)?;
        info!(volume = %volume.id, base, "removed from blacklist");

        let blacklist = list.clone();
        let bases = [base.to_string()];
        self.cache.refresh_with(&volume.id, |s, catalog| {
            s.refresh_categories_for_bases(&volume, &blacklist, catalog, &bases)?;
            s.refresh_missing_categories(&volume, &blacklist, catalog).map(|_| ())
        })?;
        if enforced {
            self.enforce_scheme(id)?;
        }
        Ok(true)
    }

    pub fn filter_add(&mut self, id: &str, name: &str) -> Result<bool> {
        self.edit_filter(id, |l| l.add(name))
    }

    pub fn filter_remove(&mut self, id: &str, name: &str) -> Result<bool> {
        self.edit_filter(id, |l| l.remove(name))
    }

    fn edit_filter(&mut self, id: &str, f: impl FnOnce(&mut ListFile) -> bool) -> Result<bool> {
        let path = self.list_file_path(id, ListKind::Filter)?;
        self.ensure_list(id, ListKind::Filter)?;
        let session = self.session(id)?;
        let Some(list) = session.filter.as_mut() else {
            return Ok(false);
        };
        if !f(list) {
            return Ok(false);
        }
        list.save(&path)?;
        Ok(true)
    }

    /// Create a category folder named per the active scheme.
    pub fn create_category(&mut self, id: &str, base: &str) -> Result<Vec<PathBuf>> {
        let volume = self.volume(id)?;
        let blacklist = self.blacklist_clone(id)?;
        let made = create_category_dirs(&self.config, self.cache.scanner(), &volume, base, &blacklist)?;
        if !made.is_empty() {
            info!(volume = %volume.id, base, created = made.len(), "category created");
            self.cache.invalidate(&volume.id);
        }
        Ok(made)
    }

    /// Delete every folder of a category (decorated or not) in every root.
    /// The probe, when given, is paused for the duration.
    pub fn delete_category(&mut self, id: &str, name: &str, probe: Option<&FreeSpaceProbe>) -> Result<Vec<PathBuf>> {
        let volume = self.volume(id)?;
        let prefix = self.config.category_prefix.clone();
        let base = base_category_name(name, &prefix).to_string();
        let targets: Vec<PathBuf> = self
            .cache
            .scanner()
            .category_dirs(&volume)?
            .into_iter()
            .filter(|(_, _, n)| base_category_name(n, &prefix).eq_ignore_ascii_case(&base))
            .map(|(_, p, _)| p)
            .collect();
        if targets.is_empty() {
            return Ok(targets);
        }

        let pause = probe.map(|p| p.pause_guard(PROBE_PAUSE_TIMEOUT));
        let mut result = Ok(());
        for dir in &targets {
            if let Err(e) = remove_tree(dir) {
                warn!(dir = %dir.display(), error = %e, "category delete failed");
                result = Err(e);
                break;
            }
        }
        self.cache.invalidate(&volume.id);
        // Resuming wakes the probe for fresh figures.
        drop(pause);
        result?;
        info!(volume = %volume.id, base, removed = targets.len(), "category deleted");
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NoTitles;
    use crate::platform::LocalDevice;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn library(dirs: &[&str]) -> (TempDir, Library) {
        let td = tempdir().unwrap();
        for d in dirs {
            fs::create_dir_all(td.path().join(d)).unwrap();
        }
        let cfg = Config::new(vec![VolumeConfig::new("ms0", td.path())]);
        (td, Library::new(cfg, Arc::new(LocalDevice), Arc::new(NoTitles)))
    }

    #[test]
    fn open_enforces_scheme_once() {
        let (td, mut lib) = library(&["ISO/Action"]);
        let cat = lib.open_volume("ms0").unwrap();
        assert!(cat.categories.contains_key("CAT_Action"));
        assert!(td.path().join("ISO/CAT_Action").is_dir());

        // A folder added behind the session's back is not renamed again.
        fs::create_dir(td.path().join("ISO/Racing")).unwrap();
        lib.cache.invalidate("ms0");
        let cat = lib.open_volume("ms0").unwrap();
        assert!(cat.categories.contains_key("Racing"));
    }

    #[test]
    fn blacklist_round_trip() {
        let (td, mut lib) = library(&["ISO/CAT_Demos"]);
        fs::write(td.path().join("ISO/CAT_Demos/d.iso"), b"1").unwrap();
        lib.open_volume("ms0").unwrap();

        assert!(lib.blacklist_add("ms0", "Demos").unwrap());
        assert!(td.path().join("ISO/Demos").is_dir());
        assert!(lib.cache().is_dirty("ms0"));
        let cat = lib.open_volume("ms0").unwrap();
        assert!(cat.categories.is_empty());
        assert_eq!(cat.uncategorized.len(), 1);

        assert!(lib.blacklist_remove("ms0", "demos").unwrap());
        assert!(!lib.cache().is_dirty("ms0"));
        let cat = lib.cache().peek("ms0").unwrap();
        assert!(cat.categories.contains_key("CAT_Demos"));
        assert!(cat.uncategorized.is_empty());
        assert!(td.path().join("ISO/CAT_Demos").is_dir());

        let saved = fs::read_to_string(lib.list_file_path("ms0", ListKind::Blacklist).unwrap()).unwrap();
        assert!(saved.trim().is_empty());
    }

    #[test]
    fn filter_persists_and_hides() {
        let (_td, mut lib) = library(&["ISO/CAT_Action"]);
        assert!(lib.filter_add("ms0", "Action").unwrap());
        assert!(!lib.filter_add("ms0", "ACTION").unwrap());
        lib.reset_lists("ms0").unwrap();
        let filter = lib.list("ms0", ListKind::Filter).unwrap().clone();
        assert!(filter.contains("action"));
        let cat = lib.open_volume("ms0").unwrap();
        assert!(cat.visible_categories(&filter).is_empty());
    }

    #[test]
    fn create_and_delete_category_invalidate() {
        let (td, mut lib) = library(&["ISO", "PSP/GAME"]);
        lib.open_volume("ms0").unwrap();
        let made = lib.create_category("ms0", "Sports").unwrap();
        assert_eq!(made.len(), 2);
        assert!(lib.cache().is_dirty("ms0"));
        assert!(lib.open_volume("ms0").unwrap().categories.contains_key("CAT_Sports"));

        let removed = lib.delete_category("ms0", "CAT_Sports", None).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!td.path().join("ISO/CAT_Sports").exists());
        assert!(lib.open_volume("ms0").unwrap().categories.is_empty());
    }

    #[test]
    fn unknown_volume_is_typed() {
        let (_td, mut lib) = library(&[]);
        let err = lib.open_volume("ef0").unwrap_err();
        assert!(matches!(err.downcast_ref::<ShelfError>(), Some(ShelfError::UnknownVolume(_))));
    }

    #[test]
    fn set_config_resets_markers() {
        let (td, mut lib) = library(&["ISO/Action"]);
        lib.open_volume("ms0").unwrap();
        let mut cfg = lib.config().clone();
        cfg.scheme.prefix_enabled = false;
        lib.set_config(cfg);
        assert!(lib.cache().is_dirty("ms0"));
        assert!(lib.open_volume("ms0").unwrap().categories.contains_key("Action"));
        assert!(td.path().join("ISO/Action").is_dir());
    }
}
