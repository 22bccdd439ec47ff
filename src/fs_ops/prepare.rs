//! Destination preparation before any write.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

use super::helpers::io_error_with_help;
use super::remove::remove_tree;

/// Create every missing directory between `volume_root` and `dst`'s parent.
/// The volume root itself is never created.
pub(crate) fn ensure_parent_dirs(volume_root: &Path, dst: &Path) -> Result<()> {
    let Some(parent) = dst.parent() else {
        return Ok(());
    };
    let Ok(rel) = parent.strip_prefix(volume_root) else {
        fs::create_dir_all(parent).map_err(io_error_with_help("create directory", parent))?;
        return Ok(());
    };
    let mut cur = volume_root.to_path_buf();
    for seg in rel.components() {
        cur.push(seg);
        match fs::create_dir(&cur) {
            Ok(()) => debug!(dir = %cur.display(), "created directory"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_error_with_help("create directory", &cur)(e)),
        }
    }
    Ok(())
}

/// Remove entries in `dst`'s directory whose name equals `dst`'s name
/// case-insensitively, then `dst` itself. `keep` is never removed.
pub(crate) fn clear_collisions(dst: &Path, keep: &Path) -> Result<usize> {
    let (Some(parent), Some(name)) = (dst.parent(), dst.file_name()) else {
        return Ok(0);
    };
    let name = name.to_string_lossy();
    let mut removed = 0;
    if let Ok(rd) = fs::read_dir(parent) {
        for e in rd.flatten() {
            let p = e.path();
            if p == keep || !e.file_name().to_string_lossy().eq_ignore_ascii_case(&name) {
                continue;
            }
            debug!(path = %p.display(), "removing colliding entry");
            remove_tree(&p).map_err(io_error_with_help("remove colliding entry", &p))?;
            removed += 1;
        }
    }
    if dst != keep && fs::symlink_metadata(dst).is_ok() {
        remove_tree(dst).map_err(io_error_with_help("remove existing destination", dst))?;
        removed += 1;
    }
    Ok(removed)
}
