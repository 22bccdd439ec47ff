//! I/O error adapters.
//!
//! Attach the operation, the path and a platform hint to an `io::Error`, for
//! use with `map_err` in both `anyhow::Result` and `io::Result` code:
//!
//!   fs::create_dir(dir).map_err(io_error_with_help("create dir", dir))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

fn hint_for(e: &io::Error) -> Option<&'static str> {
    #[cfg(unix)]
    {
        if let Some(code) = e.raw_os_error() {
            let hint = match code {
                libc::EACCES | libc::EPERM => "permission denied; check the medium is not write-protected",
                libc::EXDEV => "different filesystems; rename is not possible",
                libc::EBUSY => "resource busy; another program holds the file",
                libc::ENOENT => "path not found",
                libc::EEXIST => "already exists",
                libc::ENOTEMPTY => "directory not empty",
                libc::ENOSPC => "no space left on the volume",
                libc::EROFS => "read-only filesystem",
                libc::EIO => "I/O error; the medium may be failing or was removed",
                libc::ENAMETOOLONG => "name too long for this filesystem",
                _ => return None,
            };
            return Some(hint);
        }
    }
    #[cfg(windows)]
    {
        if let Some(code) = e.raw_os_error() {
            let hint = match code {
                5 => "access denied",
                17 => "not the same device; rename is not possible",
                32 => "file is in use",
                2 | 3 => "path not found",
                80 | 183 => "already exists",
                112 => "disk full",
                19 => "media is write-protected",
                206 => "name too long",
                _ => return None,
            };
            return Some(hint);
        }
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => Some("permission denied"),
        io::ErrorKind::NotFound => Some("path not found"),
        io::ErrorKind::AlreadyExists => Some("already exists"),
        _ => None,
    }
}

fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{op} '{}': {e}", path.display());
    if let Some(h) = hint_for(e) {
        msg.push_str(" (");
        msg.push_str(h);
        msg.push(')');
    }
    msg
}

/// `map_err` adapter producing an `anyhow::Error`.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// `map_err` adapter keeping an `io::Error` (and its kind).
pub fn io_error_with_help_io<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> io::Error + 'a {
    move |e: io::Error| io::Error::new(e.kind(), build_message(op, path, &e))
}

/// EXDEV / ERROR_NOT_SAME_DEVICE.
pub fn is_cross_device(e: &io::Error) -> bool {
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) => code == libc::EXDEV,
        #[cfg(windows)]
        Some(code) => code == 17,
        _ => false,
    }
}
