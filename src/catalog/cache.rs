//! Per-volume snapshot cache.
//!
//! Every mutation of a volume reaches the cache as a [`CacheEffect`]: either
//! an exact patch or an invalidation. Engine results carry their effects as
//! `#[must_use]` values so a caller cannot silently drop them.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::lists::ListFile;
use super::model::{Catalog, CatalogPatch};
use super::scanner::{DirectoryScanner, Scan};
use crate::config::VolumeConfig;

/// What a mutation did to a volume's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "route every effect through ScanCache::apply"]
pub enum CacheEffect {
    Patch { volume: String, patch: CatalogPatch },
    Invalidate { volume: String },
}

impl CacheEffect {
    pub fn patch(volume: &str, patch: CatalogPatch) -> Self {
        CacheEffect::Patch {
            volume: volume.to_string(),
            patch,
        }
    }

    pub fn invalidate(volume: &str) -> Self {
        CacheEffect::Invalidate {
            volume: volume.to_string(),
        }
    }

    pub fn volume(&self) -> &str {
        match self {
            CacheEffect::Patch { volume, .. } | CacheEffect::Invalidate { volume } => volume,
        }
    }
}

/// Ordered effects of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "route every effect through ScanCache::apply_all"]
pub struct CacheEffects(pub Vec<CacheEffect>);

impl CacheEffects {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, e: CacheEffect) {
        self.0.push(e);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScanCacheEntry {
    pub snapshot: Catalog,
    pub dirty: bool,
}

impl Default for ScanCacheEntry {
    /// Created empty and dirty; the first `open` performs the full scan.
    fn default() -> Self {
        Self {
            snapshot: Catalog::default(),
            dirty: true,
        }
    }
}

pub struct ScanCache<S: Scan = DirectoryScanner> {
    scanner: S,
    entries: HashMap<String, ScanCacheEntry>,
}

impl<S: Scan> ScanCache<S> {
    pub fn new(scanner: S) -> Self {
        Self {
            scanner,
            entries: HashMap::new(),
        }
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Swap the scanner (after a configuration change); every snapshot goes dirty.
    pub fn replace_scanner(&mut self, scanner: S) {
        self.scanner = scanner;
        for e in self.entries.values_mut() {
            e.dirty = true;
        }
    }

    fn slot(&mut self, volume: &str) -> &mut ScanCacheEntry {
        self.entries.entry(volume.to_ascii_lowercase()).or_default()
    }

    /// Cached catalog, rescanning first when dirty.
    pub fn open(&mut self, volume: &VolumeConfig, blacklist: &ListFile) -> Result<&Catalog> {
        let key = volume.id.to_ascii_lowercase();
        let needs_scan = self.entries.get(&key).is_none_or(|e| e.dirty);
        if needs_scan {
            let catalog = self.scanner.scan(volume, blacklist)?;
            let slot = self.slot(&key);
            slot.snapshot = catalog;
            slot.dirty = false;
        } else {
            debug!(volume = %volume.id, "scan cache hit");
        }
        Ok(&self.slot(&key).snapshot)
    }

    /// Snapshot without scanning; `None` when never populated or dirty.
    pub fn peek(&self, volume: &str) -> Option<&Catalog> {
        self.entries
            .get(&volume.to_ascii_lowercase())
            .filter(|e| !e.dirty)
            .map(|e| &e.snapshot)
    }

    pub fn is_dirty(&self, volume: &str) -> bool {
        self.entries
            .get(&volume.to_ascii_lowercase())
            .is_none_or(|e| e.dirty)
    }

    pub fn invalidate(&mut self, volume: &str) {
        debug!(volume, "scan cache invalidated");
        self.slot(volume).dirty = true;
    }

    /// Edit the live snapshot in place. A dirty snapshot is left alone (it will be
    /// rescanned anyway); a failed edit invalidates. Returns whether the edit landed.
    pub fn patch(&mut self, volume: &str, f: impl FnOnce(&mut Catalog) -> bool) -> bool {
        let slot = self.slot(volume);
        if slot.dirty {
            return false;
        }
        if f(&mut slot.snapshot) {
            true
        } else {
            warn!(volume, "catalog patch did not apply; invalidating");
            slot.dirty = true;
            false
        }
    }

    /// Rebuild part of a clean snapshot through the scanner.
    pub fn refresh_with(
        &mut self,
        volume: &str,
        f: impl FnOnce(&S, &mut Catalog) -> Result<()>,
    ) -> Result<()> {
        let key = volume.to_ascii_lowercase();
        let Some(slot) = self.entries.get_mut(&key) else {
            return Ok(());
        };
        if slot.dirty {
            return Ok(());
        }
        if let Err(e) = f(&self.scanner, &mut slot.snapshot) {
            slot.dirty = true;
            return Err(e);
        }
        Ok(())
    }
}

impl ScanCache<DirectoryScanner> {
    /// Apply one effect. `Added` patches are described from disk through the scanner.
    pub fn apply(&mut self, effect: CacheEffect, volume: &VolumeConfig, blacklist: &ListFile) {
        match effect {
            CacheEffect::Invalidate { volume: id } => self.invalidate(&id),
            CacheEffect::Patch {
                volume: id,
                patch: CatalogPatch::Added { path, kind },
            } => {
                let described = self
                    .scanner
                    .placement(volume, &path, blacklist)
                    .map(|cat| (cat, self.scanner.entry_for(&path, kind)));
                self.patch(&id, |c| match described {
                    Some((cat, Ok(entry))) => {
                        c.insert(cat.as_deref(), entry);
                        true
                    }
                    _ => false,
                });
            }
            CacheEffect::Patch { volume: id, patch } => {
                self.patch(&id, |c| c.apply(&patch));
            }
        }
    }
}
