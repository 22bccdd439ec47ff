//! Unix implementations of platform helpers.

use super::common_unix::atomic_write;
use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Open log file for appending; set 0600 only when creating a new file.
/// If the file already exists, we preserve its existing permissions.
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let existed = path.exists();
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600) // applies on create
        .open(path)?;
    if !existed {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(f)
}

/// Write a private file atomically (0600): temp file + fsync + rename + fsync dir.
pub fn write_secure_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    atomic_write(path, contents, 0o600)
}

/// Write a shared file atomically (0644), e.g. list files on a volume.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    atomic_write(path, contents, 0o644)
}

/// POSIX chmod 0700 for directories.
pub fn set_dir_mode_0700(path: &Path) -> io::Result<()> {
    let perm = fs::Permissions::from_mode(0o700);
    fs::set_permissions(path, perm)
}

/// Free and total bytes of the filesystem holding `path`, via statvfs.
pub fn capacity_bytes(path: &Path) -> io::Result<(u64, u64)> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;
    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        let stat = stat.assume_init();
        let frsize = stat.f_frsize as u64;
        let free = (stat.f_bavail as u64).saturating_mul(frsize);
        let total = (stat.f_blocks as u64).saturating_mul(frsize);
        Ok((free, total))
    }
}

/// Device number of the filesystem holding `path`.
pub fn device_id(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.dev())
}

/// Lower the calling thread's scheduling priority (best-effort).
pub fn lower_thread_priority() {
    // On Linux, nice() applies to the calling thread only.
    #[cfg(target_os = "linux")]
    unsafe {
        let _ = libc::nice(5);
    }
}
