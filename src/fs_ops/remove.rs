//! Recursive delete, children before parent.

use std::fs;
use std::io;
use std::path::Path;
use tracing::trace;

/// Remove a file, symlink or directory tree.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        for e in fs::read_dir(path)? {
            remove_tree(&e?.path())?;
        }
        trace!(dir = %path.display(), "remove dir");
        fs::remove_dir(path)
    } else {
        if meta.permissions().readonly() {
            let mut perms = meta.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
        fs::remove_file(path)
    }
}
