//! In-memory catalog of one volume.
//!
//! Invariants kept by every mutating method:
//! - an entry `path` is unique across the whole catalog;
//! - category keys are unique case-insensitively;
//! - every entry sits in exactly one of {a category bucket, `uncategorized`}
//!   and also in `flattened`.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::lists::ListFile;
use crate::paths::{base_category_name, sort_key, sort_number};

/// Name of the pseudo-category appended to the display order.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryKind {
    /// Disc-image file
    ContainerFile,
    /// Directory holding a package descriptor
    PackageFolder,
}

impl EntryKind {
    pub fn is_folder(self) -> bool {
        matches!(self, EntryKind::PackageFolder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub kind: EntryKind,
    /// On-disk name
    pub label: String,
    /// Display name from the title parser
    pub title: Option<String>,
    /// File path, or folder path without trailing separator
    pub path: PathBuf,
    pub mod_time: SystemTime,
    pub sort_key: String,
    pub size_bytes: u64,
}

impl CatalogEntry {
    pub fn new(kind: EntryKind, path: PathBuf, mod_time: SystemTime, size_bytes: u64) -> Self {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind,
            label,
            title: None,
            path,
            mod_time,
            sort_key: sort_key(mod_time),
            size_bytes,
        }
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.label)
    }
}

/// How `category_order` is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRule {
    /// Sort by the two-digit number after `prefix`
    pub numeric: bool,
    pub prefix: String,
}

/// In-place edit applied to a cached catalog instead of a rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogPatch {
    /// A new entry appeared at `path`; the cache describes it from disk.
    Added { path: PathBuf, kind: EntryKind },
    Removed { path: PathBuf },
    /// Entry moved to `to` within the same bucket.
    Renamed { from: PathBuf, to: PathBuf },
    /// Category folder `from` is now called `to` in every root.
    CategoryRenamed { from: String, to: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub categories: BTreeMap<String, Vec<CatalogEntry>>,
    pub category_order: Vec<String>,
    pub uncategorized: Vec<CatalogEntry>,
    pub flattened: Vec<CatalogEntry>,
    pub has_categories: bool,
    /// Append [`UNCATEGORIZED`] to the display order when non-empty
    pub show_uncategorized: bool,
    #[serde(skip)]
    pub(crate) category_mtimes: BTreeMap<String, SystemTime>,
    #[serde(skip)]
    pub(crate) order_rule: OrderRule,
}

fn cmp_ci(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

fn cmp_bucket(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    cmp_ci(&a.label, &b.label).then_with(|| a.path.cmp(&b.path))
}

fn cmp_flat(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    b.sort_key
        .cmp(&a.sort_key)
        .then_with(|| cmp_ci(&a.label, &b.label))
        .then_with(|| a.path.cmp(&b.path))
}

impl Catalog {
    pub fn new(order_rule: OrderRule, show_uncategorized: bool) -> Self {
        Self {
            order_rule,
            show_uncategorized,
            ..Default::default()
        }
    }

    /// Existing key matching `name` case-insensitively.
    pub fn category_key(&self, name: &str) -> Option<&str> {
        self.categories
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Create (or find) a category bucket; returns the key actually used.
    pub fn ensure_category(&mut self, name: &str, mtime: SystemTime) -> String {
        let key = match self.category_key(name) {
            Some(k) => k.to_string(),
            None => {
                self.categories.insert(name.to_string(), Vec::new());
                name.to_string()
            }
        };
        let slot = self.category_mtimes.entry(key.clone()).or_insert(mtime);
        if mtime > *slot {
            *slot = mtime;
        }
        key
    }

    pub fn entry(&self, path: &Path) -> Option<&CatalogEntry> {
        self.flattened.iter().find(|e| e.path == path)
    }

    /// Category holding `path`: `Some(Some(key))`, `Some(None)` when uncategorized.
    pub fn category_of(&self, path: &Path) -> Option<Option<&str>> {
        for (k, bucket) in &self.categories {
            if bucket.iter().any(|e| e.path == path) {
                return Some(Some(k.as_str()));
            }
        }
        self.uncategorized
            .iter()
            .any(|e| e.path == path)
            .then_some(None)
    }

    pub fn len(&self) -> usize {
        self.flattened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened.is_empty()
    }

    /// Append without dedupe or re-sorting; call [`Catalog::finish`] afterwards.
    pub(crate) fn push_raw(&mut self, category: Option<&str>, entry: CatalogEntry) {
        match category.and_then(|c| self.category_key(c).map(str::to_string)) {
            Some(k) => self.categories.entry(k).or_default().push(entry),
            None => self.uncategorized.push(entry),
        }
    }

    /// Insert, replacing any entry with the same path, then re-index.
    pub fn insert(&mut self, category: Option<&str>, entry: CatalogEntry) {
        self.detach(&entry.path);
        let key = category.map(|c| self.ensure_category(c, entry.mod_time));
        self.push_raw(key.as_deref(), entry);
        self.finish();
    }

    pub fn remove(&mut self, path: &Path) -> Option<CatalogEntry> {
        let removed = self.detach(path);
        if removed.is_some() {
            self.finish();
        }
        removed
    }

    fn detach(&mut self, path: &Path) -> Option<CatalogEntry> {
        for bucket in self.categories.values_mut() {
            if let Some(i) = bucket.iter().position(|e| e.path == path) {
                return Some(bucket.remove(i));
            }
        }
        let i = self.uncategorized.iter().position(|e| e.path == path)?;
        Some(self.uncategorized.remove(i))
    }

    /// Rename an entry in place, keeping its bucket. False if `from` is unknown
    /// or `to` already names another entry.
    pub fn rename_entry(&mut self, from: &Path, to: &Path) -> bool {
        if from != to && self.entry(to).is_some() {
            return false;
        }
        let all = self
            .categories
            .values_mut()
            .flat_map(|b| b.iter_mut())
            .chain(self.uncategorized.iter_mut());
        for e in all {
            if e.path == from {
                e.path = to.to_path_buf();
                e.label = to
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.finish();
                return true;
            }
        }
        false
    }

    /// Rename a category key and rewrite the paths of its entries.
    pub fn rename_category(&mut self, from: &str, to: &str) -> bool {
        let Some(key) = self.category_key(from).map(str::to_string) else {
            return false;
        };
        if let Some(existing) = self.category_key(to)
            && !existing.eq_ignore_ascii_case(&key)
        {
            return false;
        }
        let Some(mut bucket) = self.categories.remove(&key) else {
            return false;
        };
        for e in &mut bucket {
            let Some(parent) = e.path.parent() else { continue };
            let matches = parent
                .file_name()
                .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(&key));
            if matches {
                let new_parent = parent.with_file_name(to);
                e.path = new_parent.join(&e.label);
            }
        }
        self.categories.insert(to.to_string(), bucket);
        if let Some(t) = self.category_mtimes.remove(&key) {
            self.category_mtimes.insert(to.to_string(), t);
        }
        self.finish();
        true
    }

    /// Drop a category and its entries; returns them.
    pub fn remove_category(&mut self, name: &str) -> Vec<CatalogEntry> {
        let Some(key) = self.category_key(name).map(str::to_string) else {
            return Vec::new();
        };
        self.category_mtimes.remove(&key);
        let out = self.categories.remove(&key).unwrap_or_default();
        self.finish();
        out
    }

    /// Apply a path-level patch. `Added` needs disk access and is handled by the cache.
    pub fn apply(&mut self, patch: &CatalogPatch) -> bool {
        match patch {
            CatalogPatch::Added { .. } => false,
            CatalogPatch::Removed { path } => {
                self.remove(path);
                true
            }
            CatalogPatch::Renamed { from, to } => self.rename_entry(from, to),
            CatalogPatch::CategoryRenamed { from, to } => self.rename_category(from, to),
        }
    }

    /// Re-sort buckets, rebuild `flattened` and `category_order`.
    pub fn finish(&mut self) {
        for bucket in self.categories.values_mut() {
            bucket.sort_by(cmp_bucket);
        }
        self.uncategorized.sort_by(cmp_bucket);

        let mut flat: Vec<CatalogEntry> = self
            .categories
            .values()
            .flatten()
            .chain(self.uncategorized.iter())
            .cloned()
            .collect();
        flat.sort_by(cmp_flat);
        self.flattened = flat;

        self.category_order = self.compute_order();
        self.has_categories = !self.categories.is_empty();
    }

    fn compute_order(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.keys().cloned().collect();
        let rule = &self.order_rule;
        if rule.numeric {
            names.sort_by(|a, b| {
                match (sort_number(a, &rule.prefix), sort_number(b, &rule.prefix)) {
                    (Some(x), Some(y)) => x.cmp(&y).then_with(|| cmp_ci(a, b)),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => cmp_ci(a, b),
                }
            });
        } else {
            // Newest folder first; matches the launcher's legacy ordering.
            names.sort_by(|a, b| {
                let ta = self.category_mtimes.get(a);
                let tb = self.category_mtimes.get(b);
                tb.cmp(&ta).then_with(|| cmp_ci(a, b))
            });
        }
        names
    }

    /// Category list as shown to the user, with the uncategorized bucket appended
    /// when enabled and non-empty.
    pub fn display_order(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.category_order.iter().map(String::as_str).collect();
        if self.show_uncategorized && !self.uncategorized.is_empty() {
            out.push(UNCATEGORIZED);
        }
        out
    }

    /// Base name of a category key under the current rule.
    pub fn base_name<'a>(&self, key: &'a str) -> &'a str {
        base_category_name(key, &self.order_rule.prefix)
    }

    /// Categories not hidden by the launcher filter.
    pub fn visible_categories(&self, filter: &ListFile) -> Vec<&str> {
        self.display_order()
            .into_iter()
            .filter(|k| !filter.contains(self.base_name(k)))
            .collect()
    }

    /// Whether the launcher filter hides `entry` (by label or by its category).
    pub fn is_hidden(&self, entry: &CatalogEntry, filter: &ListFile) -> bool {
        if filter.contains(&entry.label) {
            return true;
        }
        match self.category_of(&entry.path) {
            Some(Some(k)) => filter.contains(self.base_name(k)),
            _ => false,
        }
    }

    /// Verify the structural invariants; returns a description of the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        for e in self.categories.values().flatten().chain(self.uncategorized.iter()) {
            if !seen.insert(e.path.clone()) {
                return Err(format!("duplicate path {}", e.path.display()));
            }
            count += 1;
        }
        if count != self.flattened.len() {
            return Err(format!(
                "flattened has {} entries, buckets hold {}",
                self.flattened.len(),
                count
            ));
        }
        let keys: Vec<&String> = self.categories.keys().collect();
        for (i, a) in keys.iter().enumerate() {
            if keys[i + 1..].iter().any(|b| b.eq_ignore_ascii_case(a)) {
                return Err(format!("category {a} duplicated case-insensitively"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn entry(path: &str, secs: u64) -> CatalogEntry {
        CatalogEntry::new(EntryKind::ContainerFile, PathBuf::from(path), at(secs), 10)
    }

    #[test]
    fn insert_replaces_same_path() {
        let mut c = Catalog::default();
        c.insert(Some("CAT_A"), entry("/v/ISO/CAT_A/x.iso", 100));
        c.insert(None, entry("/v/ISO/CAT_A/x.iso", 200));
        assert_eq!(c.len(), 1);
        assert_eq!(c.category_of(Path::new("/v/ISO/CAT_A/x.iso")), Some(None));
        c.check_invariants().unwrap();
    }

    #[test]
    fn category_keys_merge_case_insensitively() {
        let mut c = Catalog::default();
        c.ensure_category("CAT_Action", at(1));
        let k = c.ensure_category("cat_action", at(5));
        assert_eq!(k, "CAT_Action");
        assert_eq!(c.categories.len(), 1);
        assert_eq!(c.category_mtimes["CAT_Action"], at(5));
    }

    #[test]
    fn flattened_is_newest_first() {
        let mut c = Catalog::default();
        c.insert(None, entry("/v/ISO/old.iso", 100));
        c.insert(Some("B"), entry("/v/ISO/B/new.iso", 2_000_000_000));
        let labels: Vec<_> = c.flattened.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["new.iso", "old.iso"]);
    }

    #[test]
    fn numeric_order_then_alpha() {
        let mut c = Catalog::new(
            OrderRule {
                numeric: true,
                prefix: "CAT_".into(),
            },
            true,
        );
        for name in ["CAT_Zeta", "CAT_02Beta", "CAT_01Gamma", "CAT_Alpha"] {
            c.ensure_category(name, at(1));
        }
        c.finish();
        assert_eq!(
            c.category_order,
            vec!["CAT_01Gamma", "CAT_02Beta", "CAT_Alpha", "CAT_Zeta"]
        );
    }

    #[test]
    fn mtime_order_descending() {
        let mut c = Catalog::default();
        c.ensure_category("Old", at(1));
        c.ensure_category("New", at(9));
        c.ensure_category("Mid", at(5));
        c.finish();
        assert_eq!(c.category_order, vec!["New", "Mid", "Old"]);
    }

    #[test]
    fn uncategorized_display_toggle() {
        let mut c = Catalog::new(OrderRule::default(), true);
        c.ensure_category("A", at(1));
        c.finish();
        assert_eq!(c.display_order(), vec!["A"]);
        c.insert(None, entry("/v/ISO/x.iso", 1));
        assert_eq!(c.display_order(), vec!["A", UNCATEGORIZED]);
        c.show_uncategorized = false;
        assert_eq!(c.display_order(), vec!["A"]);
    }

    #[test]
    fn rename_category_rewrites_paths() {
        let mut c = Catalog::default();
        c.insert(Some("Action"), entry("/v/ISO/Action/a.iso", 1));
        assert!(c.rename_category("action", "CAT_Action"));
        let e = &c.categories["CAT_Action"][0];
        assert_eq!(e.path, PathBuf::from("/v/ISO/CAT_Action/a.iso"));
        assert!(c.entry(Path::new("/v/ISO/CAT_Action/a.iso")).is_some());
        c.check_invariants().unwrap();
    }

    #[test]
    fn rename_entry_refuses_clobber() {
        let mut c = Catalog::default();
        c.insert(None, entry("/v/ISO/a.iso", 1));
        c.insert(None, entry("/v/ISO/b.iso", 1));
        assert!(!c.rename_entry(Path::new("/v/ISO/a.iso"), Path::new("/v/ISO/b.iso")));
        assert!(c.rename_entry(Path::new("/v/ISO/a.iso"), Path::new("/v/ISO/c.iso")));
        assert_eq!(c.entry(Path::new("/v/ISO/c.iso")).unwrap().label, "c.iso");
    }

    #[test]
    fn filter_hides_by_base_and_label() {
        let mut c = Catalog::new(
            OrderRule {
                numeric: false,
                prefix: "CAT_".into(),
            },
            false,
        );
        c.insert(Some("CAT_Demos"), entry("/v/ISO/CAT_Demos/d.iso", 1));
        c.insert(Some("CAT_Games"), entry("/v/ISO/CAT_Games/g.iso", 1));
        let filter = ListFile::parse("demos\r\nsecret.iso\n");
        assert_eq!(c.visible_categories(&filter), vec!["CAT_Games"]);
        let d = c.entry(Path::new("/v/ISO/CAT_Demos/d.iso")).unwrap().clone();
        assert!(c.is_hidden(&d, &filter));
    }
}
