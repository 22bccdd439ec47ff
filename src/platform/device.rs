//! Device-control layer.
//!
//! The engine issues exactly two device-level requests: an intra-volume
//! relocation and a capacity query. Both may fail; callers fall back.
//! Presence checks also route through here so verification can be observed
//! (and faked) independently of the plain filesystem.

use std::fs;
use std::io;
use std::path::Path;
use tracing::trace;

use crate::config::VolumeConfig;

pub trait Device: Send + Sync {
    /// Move `rel_src` to `rel_dst` within one volume. Paths are volume-relative.
    fn relocate(&self, volume: &VolumeConfig, rel_src: &Path, rel_dst: &Path) -> io::Result<()>;

    /// Free and total bytes of the volume.
    fn capacity(&self, volume: &VolumeConfig) -> io::Result<(u64, u64)>;

    /// Whether `path` is visible on the medium.
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }
}

/// Device backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDevice;

impl Device for LocalDevice {
    fn relocate(&self, volume: &VolumeConfig, rel_src: &Path, rel_dst: &Path) -> io::Result<()> {
        let src = volume.root.join(rel_src);
        let dst = volume.root.join(rel_dst);
        let dst_parent = dst.parent().unwrap_or(&volume.root);

        // Only a same-filesystem rename counts as an instant relocation.
        let (a, b) = (super::device_id(&src)?, super::device_id(dst_parent)?);
        if a != b {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("'{}' and '{}' are on different devices", src.display(), dst.display()),
            ));
        }
        trace!(volume = %volume.id, src = %rel_src.display(), dst = %rel_dst.display(), "relocate");
        fs::rename(&src, &dst)
    }

    fn capacity(&self, volume: &VolumeConfig) -> io::Result<(u64, u64)> {
        super::capacity_bytes(&volume.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_relocate_moves_within_volume() {
        let td = tempdir().unwrap();
        let vol = VolumeConfig::new("ms0", td.path());
        fs::create_dir_all(td.path().join("ISO/CAT_A")).unwrap();
        fs::write(td.path().join("ISO/game.iso"), b"x").unwrap();

        LocalDevice
            .relocate(&vol, Path::new("ISO/game.iso"), Path::new("ISO/CAT_A/game.iso"))
            .unwrap();
        assert!(LocalDevice.exists(&td.path().join("ISO/CAT_A/game.iso")));
        assert!(!LocalDevice.exists(&td.path().join("ISO/game.iso")));
    }

    #[test]
    fn local_capacity_reports_total() {
        let td = tempdir().unwrap();
        let vol = VolumeConfig::new("ms0", td.path());
        let (free, total) = LocalDevice.capacity(&vol).unwrap();
        assert!(total >= free);
    }
}
