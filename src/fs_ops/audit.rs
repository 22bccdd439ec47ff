//! Recursive folder copy with a post-copy audit and bounded repair passes.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::helpers::io_error_with_help;
use super::io_copy::{CopyPolicy, copy_file};
use super::progress::TreeProgress;
use super::remove::remove_tree;
use crate::errors::ShelfError;
use crate::paths::is_junk_name;

/// Repair passes after the initial copy.
pub const REPAIR_PASSES: u32 = 2;

fn walk(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_junk_name(e.file_name()))
        .flatten()
}

/// Source-relative paths missing at `dst`, or present with the wrong type or size.
pub fn audit_tree(src: &Path, dst: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for e in walk(src) {
        let Ok(rel) = e.path().strip_prefix(src) else { continue };
        let target = dst.join(rel);
        let ok = match fs::symlink_metadata(&target) {
            Ok(m) if e.file_type().is_dir() => m.is_dir(),
            Ok(m) => m.is_file() && e.metadata().map(|s| s.len() == m.len()).unwrap_or(false),
            Err(_) => false,
        };
        if !ok {
            missing.push(rel.to_path_buf());
        }
    }
    missing
}

/// Total bytes of the regular files under `src`, junk excluded.
pub fn tree_bytes(src: &Path) -> u64 {
    walk(src)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn copy_one_rel(
    src: &Path,
    dst: &Path,
    rel: &Path,
    policy: &CopyPolicy,
    progress: &mut TreeProgress<'_>,
) -> Result<()> {
    let from = src.join(rel);
    let to = dst.join(rel);
    if fs::symlink_metadata(&from).map(|m| m.is_dir()).unwrap_or(false) {
        if to.is_file() {
            fs::remove_file(&to).map_err(io_error_with_help("remove mistyped entry", &to))?;
        }
        fs::create_dir_all(&to).map_err(io_error_with_help("create directory", &to))?;
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_error_with_help("create directory", parent))?;
    }
    if to.is_dir() {
        remove_tree(&to).map_err(io_error_with_help("remove mistyped entry", &to))?;
    }
    let r = copy_file(&from, &to, policy, &mut |done, _| progress.file(done))?;
    progress.advance(r.bytes);
    Ok(())
}

/// Copy the tree at `src` into `dst`, then audit and repair with [`repair_tree`].
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    policy: &CopyPolicy,
    progress: &mut TreeProgress<'_>,
) -> Result<()> {
    fs::create_dir_all(dst).map_err(io_error_with_help("create directory", dst))?;

    let rels: Vec<PathBuf> = walk(src)
        .filter_map(|e| e.path().strip_prefix(src).ok().map(Path::to_path_buf))
        .collect();
    for rel in &rels {
        // Failures here are picked up by the audit.
        if let Err(e) = copy_one_rel(src, dst, rel, policy, progress) {
            warn!(file = %rel.display(), error = %e, "copy failed; will retry in repair pass");
        }
    }
    repair_tree(src, dst, policy, progress).map(|_| ())
}

/// Audit `dst` against `src` and re-copy what is missing, at most
/// [`REPAIR_PASSES`] times. Returns the passes used. When files are still
/// missing afterwards, `dst` is deleted and [`ShelfError::RepairExhausted`]
/// returned.
pub fn repair_tree(
    src: &Path,
    dst: &Path,
    policy: &CopyPolicy,
    progress: &mut TreeProgress<'_>,
) -> Result<u32> {
    let mut missing = audit_tree(src, dst);
    let mut pass = 0;
    while !missing.is_empty() && pass < REPAIR_PASSES {
        pass += 1;
        info!(pass, missing = missing.len(), dest = %dst.display(), "repairing folder copy");
        for rel in &missing {
            if let Err(e) = copy_one_rel(src, dst, rel, policy, progress) {
                debug!(file = %rel.display(), error = %e, "repair copy failed");
            }
        }
        missing = audit_tree(src, dst);
    }

    if !missing.is_empty() {
        warn!(dest = %dst.display(), missing = missing.len(), "repair passes exhausted; removing destination");
        if let Err(e) = remove_tree(dst) {
            warn!(dest = %dst.display(), error = %e, "could not remove incomplete destination");
        }
        return Err(ShelfError::RepairExhausted {
            dest: dst.to_path_buf(),
            passes: REPAIR_PASSES,
        }
        .into());
    }
    Ok(pass)
}
