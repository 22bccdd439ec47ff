//! Core library for `pkgshelf`.
//!
//! Catalogs application packages and disc images spread over one or two
//! storage volumes, and moves, copies or deletes them with post-write
//! verification. The binary in `main.rs` is a thin CLI over this crate.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod fs_ops;
pub mod library;
pub mod output;
pub mod paths;
pub mod platform;
pub mod probe;
pub mod transaction;

pub use catalog::{
    CacheEffect, CacheEffects, Catalog, CatalogEntry, CatalogPatch, DirectoryScanner, EntryKind, ListFile,
    NoTitles, ScanCache, TitleParser,
};
pub use config::{
    Config, DisplayMode, LoadResult, LogLevel, SchemeToggles, VolumeConfig, default_config_path,
    default_log_path, load_or_init, path_has_symlink_ancestor,
};
pub use errors::{OpError, ShelfError};
pub use fs_ops::{FileOperationEngine, Mode, NoProgress, OpReport, ProgressSink, Tier};
pub use library::{Library, ListKind, VolumeSession};
pub use platform::{Device, LocalDevice};
pub use probe::{FreeSpaceProbe, ProbeState, SpaceReading};
pub use transaction::{Eligibility, PendingOperation, TransactionOrchestrator, TransactionSummary};
