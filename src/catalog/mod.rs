//! Catalog: the in-memory view of one volume, how it is scanned, cached and
//! kept in line with the category naming scheme.

pub mod cache;
pub mod lists;
pub mod model;
pub mod scanner;
pub mod scheme;

pub use cache::{CacheEffect, CacheEffects, ScanCache, ScanCacheEntry};
pub use lists::{BLACKLIST_FILE, FILTER_FILE, ListFile, list_path};
pub use model::{Catalog, CatalogEntry, CatalogPatch, EntryKind, UNCATEGORIZED};
pub use scanner::{DirectoryScanner, NoTitles, RootFamily, Scan, TitleParser};
pub use scheme::{CategorySchemeEnforcer, EnforceReport, case_aware_rename, create_category_dirs, new_category_name};
