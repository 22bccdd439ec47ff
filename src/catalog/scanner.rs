//! Directory scanner: walks the container and package root families of a
//! volume and builds a [`Catalog`].

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::lists::ListFile;
use super::model::{Catalog, CatalogEntry, EntryKind, OrderRule};
use crate::config::{Config, VolumeConfig};
use crate::fs_ops::io_error_with_help;
use crate::paths::{base_category_name, is_container_file, is_junk_name, is_package_dir};

/// Display-name lookup provided by the container/package format layer.
pub trait TitleParser: Send + Sync {
    fn parse_title(&self, path: &Path, kind: EntryKind) -> Option<String>;
}

/// Leaves every title unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTitles;

impl TitleParser for NoTitles {
    fn parse_title(&self, _path: &Path, _kind: EntryKind) -> Option<String> {
        None
    }
}

/// Anything able to produce a full catalog for a volume.
pub trait Scan {
    fn scan(&self, volume: &VolumeConfig, blacklist: &ListFile) -> Result<Catalog>;
}

/// Which root family a directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFamily {
    Containers,
    Packages,
}

#[derive(Debug, Clone)]
struct ScanOptions {
    container_roots: Vec<PathBuf>,
    package_roots: Vec<PathBuf>,
    container_exts: Vec<String>,
    descriptors: Vec<String>,
    prefix: String,
    numeric_order: bool,
    show_uncategorized: bool,
}

pub struct DirectoryScanner {
    opts: ScanOptions,
    titles: Arc<dyn TitleParser>,
}

/// Immediate children of `dir` minus platform junk, sorted by name.
fn list_children(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let rd = fs::read_dir(dir).map_err(io_error_with_help("read dir", dir))?;
    let mut out: Vec<fs::DirEntry> = rd
        .flatten()
        .filter(|e| !is_junk_name(&e.file_name()))
        .collect();
    out.sort_by_key(|e| e.file_name());
    Ok(out)
}

fn is_dir_entry(e: &fs::DirEntry) -> bool {
    e.file_type().map(|t| t.is_dir()).unwrap_or(false)
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Total size of the regular files under `dir`, junk excluded.
fn tree_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_junk_name(e.file_name()))
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

type Found = (Option<String>, CatalogEntry);

impl DirectoryScanner {
    pub fn new(config: &Config, titles: Arc<dyn TitleParser>) -> Self {
        Self {
            opts: ScanOptions {
                container_roots: config.container_roots.clone(),
                package_roots: config.package_roots.clone(),
                container_exts: config.container_extensions.clone(),
                descriptors: config.package_descriptors.clone(),
                prefix: config.category_prefix.clone(),
                numeric_order: config.scheme.sort_enabled,
                show_uncategorized: config.scheme.show_uncategorized,
            },
            titles,
        }
    }

    fn empty_catalog(&self) -> Catalog {
        Catalog::new(
            OrderRule {
                numeric: self.opts.numeric_order,
                prefix: self.opts.prefix.clone(),
            },
            self.opts.show_uncategorized,
        )
    }

    fn is_blacklisted(&self, folder: &str, blacklist: &ListFile) -> bool {
        blacklist.contains(base_category_name(folder, &self.opts.prefix))
    }

    /// Absolute root directories of both families on `volume`.
    pub fn roots(&self, volume: &VolumeConfig) -> Vec<(RootFamily, PathBuf)> {
        let c = self
            .opts
            .container_roots
            .iter()
            .map(|r| (RootFamily::Containers, volume.root.join(r)));
        let p = self
            .opts
            .package_roots
            .iter()
            .map(|r| (RootFamily::Packages, volume.root.join(r)));
        c.chain(p).collect()
    }

    /// Category folders on disk: (family, folder path, folder name).
    pub fn category_dirs(&self, volume: &VolumeConfig) -> Result<Vec<(RootFamily, PathBuf, String)>> {
        let mut out = Vec::new();
        for (family, root) in self.roots(volume) {
            if !root.is_dir() {
                continue;
            }
            for child in list_children(&root)? {
                if !is_dir_entry(&child) {
                    continue;
                }
                let path = child.path();
                if family == RootFamily::Packages && is_package_dir(&path, &self.opts.descriptors) {
                    continue;
                }
                let name = child.file_name().to_string_lossy().into_owned();
                out.push((family, path, name));
            }
        }
        Ok(out)
    }

    /// Describe one entry from disk.
    pub fn entry_for(&self, path: &Path, kind: EntryKind) -> Result<CatalogEntry> {
        let meta = fs::metadata(path).map_err(io_error_with_help("stat entry", path))?;
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let size = match kind {
            EntryKind::ContainerFile => meta.len(),
            EntryKind::PackageFolder => tree_size(path),
        };
        let mut entry = CatalogEntry::new(kind, path.to_path_buf(), mtime, size);
        entry.title = self.titles.parse_title(path, kind);
        trace!(path = %path.display(), ?kind, size, "entry");
        Ok(entry)
    }

    /// Category an entry at `path` would be filed under, from its position on disk.
    /// `None` when the path is not inside any root of `volume`.
    pub fn placement(
        &self,
        volume: &VolumeConfig,
        path: &Path,
        blacklist: &ListFile,
    ) -> Option<Option<String>> {
        let parent = path.parent()?;
        for (_, root) in self.roots(volume) {
            if parent == root {
                return Some(None);
            }
            if parent.parent() == Some(root.as_path()) {
                let name = parent.file_name()?.to_string_lossy().into_owned();
                if self.is_blacklisted(&name, blacklist) {
                    return Some(None);
                }
                return Some(Some(name));
            }
        }
        None
    }

    /// Whether `path` is something the catalog lists as a `kind` entry: a
    /// container file or package folder sitting directly in a root of its
    /// family or in one of that root's category folders.
    pub fn is_entry(&self, volume: &VolumeConfig, path: &Path, kind: EntryKind) -> bool {
        let family = if kind.is_folder() {
            RootFamily::Packages
        } else {
            RootFamily::Containers
        };
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        if is_junk_name(name) {
            return false;
        }
        let placed = self.roots(volume).iter().any(|(f, root)| {
            if *f != family {
                return false;
            }
            if parent == root {
                return true;
            }
            parent.parent() == Some(root.as_path())
                && parent.file_name().is_some_and(|n| !is_junk_name(n))
                && !(family == RootFamily::Packages && is_package_dir(parent, &self.opts.descriptors))
        });
        if !placed {
            return false;
        }
        match fs::symlink_metadata(path) {
            Ok(m) if kind.is_folder() => m.is_dir() && is_package_dir(path, &self.opts.descriptors),
            Ok(m) => m.is_file() && is_container_file(path, &self.opts.container_exts),
            Err(_) => false,
        }
    }

    /// Entries directly inside a container category (or root) directory.
    fn containers_in(&self, dir: &Path, category: Option<&str>, out: &mut Vec<Found>) -> Result<()> {
        for child in list_children(dir)? {
            let path = child.path();
            if is_dir_entry(&child) || !is_container_file(&path, &self.opts.container_exts) {
                continue;
            }
            self.push_entry(&path, EntryKind::ContainerFile, category, out);
        }
        Ok(())
    }

    /// Package folders directly inside a package category directory.
    fn packages_in(&self, dir: &Path, category: Option<&str>, out: &mut Vec<Found>) -> Result<()> {
        for child in list_children(dir)? {
            let path = child.path();
            if !is_dir_entry(&child) || !is_package_dir(&path, &self.opts.descriptors) {
                continue;
            }
            self.push_entry(&path, EntryKind::PackageFolder, category, out);
        }
        Ok(())
    }

    /// Describe `path` into `out`; an unreadable entry is logged and left out.
    fn push_entry(&self, path: &Path, kind: EntryKind, category: Option<&str>, out: &mut Vec<Found>) {
        match self.entry_for(path, kind) {
            Ok(e) => out.push((category.map(str::to_string), e)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable entry"),
        }
    }

    /// Scan one category folder. Blacklisted folders contribute uncategorized entries.
    fn scan_category_dir(
        &self,
        family: RootFamily,
        dir: &Path,
        name: &str,
        blacklist: &ListFile,
        catalog: &mut Catalog,
        out: &mut Vec<Found>,
    ) -> Result<()> {
        let category = if self.is_blacklisted(name, blacklist) {
            debug!(folder = %dir.display(), "blacklisted; scanning as ordinary folder");
            None
        } else {
            Some(catalog.ensure_category(name, modified(dir)))
        };
        match family {
            RootFamily::Containers => self.containers_in(dir, category.as_deref(), out),
            RootFamily::Packages => self.packages_in(dir, category.as_deref(), out),
        }
    }

    /// Add categories present on disk but absent from `catalog`. Returns how many were added.
    pub fn refresh_missing_categories(
        &self,
        volume: &VolumeConfig,
        blacklist: &ListFile,
        catalog: &mut Catalog,
    ) -> Result<usize> {
        let missing: Vec<_> = self
            .category_dirs(volume)?
            .into_iter()
            .filter(|(_, _, name)| {
                !self.is_blacklisted(name, blacklist) && catalog.category_key(name).is_none()
            })
            .collect();
        let before = catalog.categories.len();
        let mut found = Vec::new();
        for (family, dir, name) in &missing {
            self.scan_category_dir(*family, dir, name, blacklist, catalog, &mut found)?;
        }
        for (cat, entry) in found {
            catalog.insert(cat.as_deref(), entry);
        }
        catalog.finish();
        let added = catalog.categories.len() - before;
        debug!(volume = %volume.id, added, "refreshed missing categories");
        Ok(added)
    }

    /// Rescan only the categories whose base name is in `bases`.
    pub fn refresh_categories_for_bases(
        &self,
        volume: &VolumeConfig,
        blacklist: &ListFile,
        catalog: &mut Catalog,
        bases: &[String],
    ) -> Result<()> {
        let prefix = self.opts.prefix.clone();
        let wanted =
            |name: &str| bases.iter().any(|b| b.eq_ignore_ascii_case(base_category_name(name, &prefix)));

        let stale: Vec<String> = catalog.categories.keys().filter(|k| wanted(k.as_str())).cloned().collect();
        for k in stale {
            catalog.remove_category(&k);
        }
        // Entries that were filed as uncategorized because their folder was blacklisted.
        let roots: Vec<PathBuf> = self.roots(volume).into_iter().map(|(_, r)| r).collect();
        let orphans: Vec<PathBuf> = catalog
            .uncategorized
            .iter()
            .filter(|e| {
                let Some(parent) = e.path.parent() else { return false };
                let in_category_dir = parent.parent().is_some_and(|gp| roots.iter().any(|r| r == gp));
                in_category_dir
                    && parent
                        .file_name()
                        .is_some_and(|n| wanted(n.to_string_lossy().as_ref()))
            })
            .map(|e| e.path.clone())
            .collect();
        for p in orphans {
            catalog.remove(&p);
        }

        let mut found = Vec::new();
        for (family, dir, name) in self.category_dirs(volume)? {
            if wanted(&name) {
                self.scan_category_dir(family, &dir, &name, blacklist, catalog, &mut found)?;
            }
        }
        for (cat, entry) in found {
            catalog.insert(cat.as_deref(), entry);
        }
        catalog.finish();
        Ok(())
    }
}

impl Scan for DirectoryScanner {
    fn scan(&self, volume: &VolumeConfig, blacklist: &ListFile) -> Result<Catalog> {
        let mut catalog = self.empty_catalog();
        let mut found = Vec::new();

        for (family, root) in self.roots(volume) {
            if !root.is_dir() {
                trace!(root = %root.display(), "root absent");
                continue;
            }
            for child in list_children(&root)? {
                let path = child.path();
                let name = child.file_name().to_string_lossy().into_owned();
                match family {
                    RootFamily::Containers => {
                        if is_dir_entry(&child) {
                            self.scan_category_dir(family, &path, &name, blacklist, &mut catalog, &mut found)?;
                        } else if is_container_file(&path, &self.opts.container_exts) {
                            self.push_entry(&path, EntryKind::ContainerFile, None, &mut found);
                        }
                    }
                    RootFamily::Packages => {
                        if !is_dir_entry(&child) {
                            continue;
                        }
                        if is_package_dir(&path, &self.opts.descriptors) {
                            self.push_entry(&path, EntryKind::PackageFolder, None, &mut found);
                        } else {
                            self.scan_category_dir(family, &path, &name, blacklist, &mut catalog, &mut found)?;
                        }
                    }
                }
            }
        }

        for (cat, entry) in found {
            catalog.push_raw(cat.as_deref(), entry);
        }
        catalog.finish();
        debug!(
            volume = %volume.id,
            entries = catalog.len(),
            categories = catalog.categories.len(),
            "scan complete"
        );
        Ok(catalog)
    }
}
