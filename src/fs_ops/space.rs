//! Preflight free-space checks.

use rayon::prelude::*;
use std::path::{Path, PathBuf};

use super::audit::tree_bytes;
use crate::config::VolumeConfig;
use crate::errors::ShelfError;
use crate::paths::volume_of;

/// What the pending operation does with its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Mode {
    Move,
    Copy,
    Delete,
}

pub fn format_bytes(n: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let f = n as f64;
    if f >= GIB {
        format!("{:.1} GiB", f / GIB)
    } else if f >= MIB {
        format!("{:.1} MiB", f / MIB)
    } else if f >= KIB {
        format!("{:.1} KiB", f / KIB)
    } else {
        format!("{n} B")
    }
}

/// Size of one item: file length or folder tree size.
pub fn item_bytes(path: &Path) -> u64 {
    match std::fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => tree_bytes(path),
        Ok(m) => m.len(),
        Err(_) => 0,
    }
}

/// Bytes the destination must absorb. Items already on `dest` cost nothing
/// when moved; deletes cost nothing.
pub fn required_bytes(
    volumes: &[VolumeConfig],
    items: &[PathBuf],
    dest: &VolumeConfig,
    mode: Mode,
) -> u64 {
    if mode == Mode::Delete {
        return 0;
    }
    items
        .par_iter()
        .filter(|p| {
            mode == Mode::Copy || volume_of(volumes, p).is_none_or(|v| v.id != dest.id)
        })
        .map(|p| item_bytes(p))
        .sum()
}

/// Free space must cover `required` plus `headroom`.
pub fn check_space(required: u64, free: u64, headroom: u64) -> bool {
    free >= required.saturating_add(headroom)
}

/// Typed error for an ineligible destination.
pub fn ensure_space(volume: &str, required: u64, free: u64, headroom: u64) -> Result<(), ShelfError> {
    if check_space(required, free, headroom) {
        Ok(())
    } else {
        Err(ShelfError::InsufficientSpace {
            required: required.saturating_add(headroom),
            available: free,
            volume: volume.to_string(),
        })
    }
}
