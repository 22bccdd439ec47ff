//! Category naming scheme enforcement.
//!
//! Renames category folders on disk so they read `<prefix><NN><base>` under the
//! active toggles. Blacklisted bases are stripped back to the bare base name.
//! Running twice in a row renames nothing the second time.

use anyhow::{Context, Result, bail};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::cache::{CacheEffect, CacheEffects};
use super::lists::ListFile;
use super::model::CatalogPatch;
use super::scanner::{DirectoryScanner, RootFamily};
use crate::config::{Config, VolumeConfig};
use crate::fs_ops::io_error_with_help;
use crate::paths::{base_category_name, decorate, sort_number};
use crate::platform::tmp_sibling_name;

#[derive(Debug, Default)]
pub struct EnforceReport {
    /// (old path, new path) per renamed folder
    pub renamed: Vec<(PathBuf, PathBuf)>,
    /// (folder, reason) per folder left alone
    pub failed: Vec<(PathBuf, String)>,
    pub effects: CacheEffects,
}

/// Rename `from` to `to`, hopping through a temporary sibling when the two names
/// differ only by case and the direct rename fails.
pub fn case_aware_rename(from: &Path, to: &Path) -> Result<()> {
    let direct = fs::rename(from, to);
    let Err(e) = direct else {
        return Ok(());
    };
    let case_only = match (from.file_name(), to.file_name()) {
        (Some(a), Some(b)) => {
            a != b && a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
        }
        _ => false,
    };
    if !case_only || from.parent() != to.parent() {
        return Err(io_error_with_help("rename", from)(e));
    }

    let hop = tmp_sibling_name(from);
    debug!(from = %from.display(), hop = %hop.display(), "case-only rename via temporary name");
    fs::rename(from, &hop).map_err(io_error_with_help("rename to temporary", from))?;
    if let Err(e2) = fs::rename(&hop, to) {
        if let Err(back) = fs::rename(&hop, from) {
            warn!(hop = %hop.display(), error = %back, "rollback of case-only rename failed");
        }
        return Err(io_error_with_help("rename from temporary", to)(e2));
    }
    Ok(())
}

fn names_differ_only_by_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Stateless enforcer over one configuration.
pub struct CategorySchemeEnforcer<'a> {
    config: &'a Config,
    scanner: &'a DirectoryScanner,
}

impl<'a> CategorySchemeEnforcer<'a> {
    pub fn new(config: &'a Config, scanner: &'a DirectoryScanner) -> Self {
        Self { config, scanner }
    }

    /// Target on-disk name for every base, in numbering order.
    fn targets(&self, folders: &[(PathBuf, String)], blacklist: &ListFile) -> BTreeMap<String, String> {
        let prefix = &self.config.category_prefix;
        // base (lower-cased) -> (display base, lowest existing number)
        let mut bases: BTreeMap<String, (String, Option<u32>)> = BTreeMap::new();
        for (_, name) in folders {
            let base = base_category_name(name, prefix);
            let n = sort_number(name, prefix);
            let slot = bases
                .entry(base.to_lowercase())
                .or_insert_with(|| (base.to_string(), n));
            slot.1 = match (slot.1, n) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        let mut ordered: Vec<(String, Option<u32>)> = bases
            .into_values()
            .filter(|(b, _)| !blacklist.contains(b))
            .collect();
        ordered.sort_by(|(a, na), (b, nb)| match (na, nb) {
            (Some(x), Some(y)) => x.cmp(y).then_with(|| a.to_lowercase().cmp(&b.to_lowercase())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
        });

        let sort = self.config.scheme.sort_enabled;
        let mut out = BTreeMap::new();
        for (i, (base, _)) in ordered.into_iter().enumerate() {
            let number = sort.then_some(i as u32 + 1);
            out.insert(base.to_lowercase(), decorate(&base, self.config.active_prefix(), number));
        }
        out
    }

    /// Rename every category folder of `volume` to its scheme name.
    pub fn enforce(&self, volume: &VolumeConfig, blacklist: &ListFile) -> Result<EnforceReport> {
        let folders: Vec<(PathBuf, String)> = self
            .scanner
            .category_dirs(volume)?
            .into_iter()
            .map(|(_, p, n)| (p, n))
            .collect();
        let targets = self.targets(&folders, blacklist);
        let prefix = &self.config.category_prefix;

        let mut report = EnforceReport::default();
        let mut renamed_keys: BTreeMap<String, String> = BTreeMap::new();
        let mut stripped = false;
        for (path, name) in folders {
            let base = base_category_name(&name, prefix);
            let target = match targets.get(&base.to_lowercase()) {
                Some(t) => t.clone(),
                None => base.to_string(),
            };
            if target == name {
                continue;
            }
            let dest = path.with_file_name(&target);
            if dest.exists() && !names_differ_only_by_case(&name, &target) {
                warn!(from = %path.display(), to = %dest.display(), "target category name already taken");
                report.failed.push((path, format!("'{target}' already exists")));
                continue;
            }
            match case_aware_rename(&path, &dest)
                .with_context(|| format!("enforce scheme on '{}'", path.display()))
            {
                Ok(()) => {
                    info!(from = %path.display(), to = %dest.display(), "renamed category");
                    if blacklist.contains(base) {
                        stripped = true;
                    } else {
                        renamed_keys.insert(name, target);
                    }
                    report.renamed.push((path, dest));
                }
                Err(e) => {
                    warn!(error = %e, "category rename failed");
                    report.failed.push((path, format!("{e:#}")));
                }
            }
        }

        if stripped {
            report.effects.push(CacheEffect::invalidate(&volume.id));
        } else {
            for (from, to) in renamed_keys {
                report
                    .effects
                    .push(CacheEffect::patch(&volume.id, CatalogPatch::CategoryRenamed { from, to }));
            }
        }
        debug!(volume = %volume.id, renamed = report.renamed.len(), failed = report.failed.len(), "scheme enforced");
        Ok(report)
    }
}

/// On-disk name for a category `base` that does not exist yet, numbered after
/// the `existing` folder names when sorting is on. Blacklisted bases stay bare.
pub fn new_category_name<'n>(
    config: &Config,
    existing: impl Iterator<Item = &'n str>,
    base: &str,
    blacklist: &ListFile,
) -> String {
    if blacklist.contains(base) {
        return base.to_string();
    }
    let mut bases: Vec<String> = existing
        .map(|n| base_category_name(n, &config.category_prefix).to_lowercase())
        .filter(|b| !blacklist.contains(b))
        .collect();
    bases.sort();
    bases.dedup();
    let number = config.scheme.sort_enabled.then_some(bases.len() as u32 + 1);
    decorate(base, config.active_prefix(), number)
}

/// Create a category folder under every root family, named per the active scheme.
pub fn create_category_dirs(
    config: &Config,
    scanner: &DirectoryScanner,
    volume: &VolumeConfig,
    base: &str,
    blacklist: &ListFile,
) -> Result<Vec<PathBuf>> {
    let base = crate::paths::sanitize_name(base);
    if base.is_empty() {
        bail!("category name is empty after sanitizing");
    }
    let existing: Vec<(PathBuf, String)> = scanner
        .category_dirs(volume)?
        .into_iter()
        .map(|(_, p, n)| (p, n))
        .collect();
    let name = new_category_name(config, existing.iter().map(|(_, n)| n.as_str()), &base, blacklist);

    // First root of each family only.
    let roots = scanner.roots(volume);
    let firsts = [RootFamily::Containers, RootFamily::Packages]
        .into_iter()
        .filter_map(|f| roots.iter().find(|(rf, _)| *rf == f).map(|(_, r)| r.clone()));
    let mut created = Vec::new();
    let mut seen_roots = Vec::new();
    for root in firsts {
        if seen_roots.contains(&root) {
            continue;
        }
        seen_roots.push(root.clone());
        let clash = existing.iter().find(|(p, n)| {
            p.parent() == Some(root.as_path())
                && base_category_name(n, &config.category_prefix).eq_ignore_ascii_case(&base)
        });
        if let Some((p, _)) = clash {
            debug!(existing = %p.display(), "category already present");
            continue;
        }
        let dir = root.join(&name);
        fs::create_dir_all(&dir).map_err(io_error_with_help("create category", &dir))?;
        created.push(dir);
    }
    Ok(created)
}
