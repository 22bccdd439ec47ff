//! Filesystem operations: the per-item engine and its building blocks.

mod audit;
mod engine;
mod helpers;
mod io_copy;
mod prepare;
mod progress;
mod remove;
mod space;
mod strategy;

pub use audit::{REPAIR_PASSES, audit_tree, tree_bytes};
pub use engine::{EnginePolicy, FileOperationEngine, OpReport, VERIFY_ATTEMPTS};
pub use helpers::{io_error_with_help, io_error_with_help_io, is_cross_device};
pub use io_copy::{BUFFER_SIZES, CopyPolicy, CopyResult, MIN_CHUNK, copy_file};
pub use progress::{NoProgress, ProgressSink};
pub use remove::remove_tree;
pub use space::{Mode, check_space, ensure_space, format_bytes, item_bytes, required_bytes};
pub use strategy::{Tier, chain};
