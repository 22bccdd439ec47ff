//! Config validation logic.
//! Verifies volume ids and roots: existence, readability, and that no two roots overlap.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

use super::types::Config;

impl Config {
    /// Validate volumes and canonicalize their roots in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.volumes.is_empty() {
            bail!("no volumes configured; add at least one <volume id=\"..\" root=\"..\"/>");
        }
        if self.volumes.len() > 2 {
            bail!("at most two volumes are supported, {} configured", self.volumes.len());
        }

        for v in &mut self.volumes {
            if v.id.trim().is_empty() {
                bail!("volume with root '{}' has an empty id", v.root.display());
            }
            ensure_dir_exists_and_is_dir(&v.root, &v.id)?;
            ensure_readable(&v.root, &v.id)?;
            v.root = dunce::canonicalize(&v.root).unwrap_or_else(|_| v.root.clone());
        }

        for (i, a) in self.volumes.iter().enumerate() {
            for b in self.volumes.iter().skip(i + 1) {
                if a.id.eq_ignore_ascii_case(&b.id) {
                    bail!("duplicate volume id '{}'", a.id);
                }
                if a.root.starts_with(&b.root) || b.root.starts_with(&a.root) {
                    bail!(
                        "volume roots overlap: '{}' ({}) and '{}' ({})",
                        a.root.display(),
                        a.id,
                        b.root.display(),
                        b.id
                    );
                }
            }
        }

        if self.container_roots.is_empty() && self.package_roots.is_empty() {
            bail!("no container or package roots configured");
        }
        for r in self.container_roots.iter().chain(self.package_roots.iter()) {
            if r.is_absolute() {
                bail!("root '{}' must be relative to the volume", r.display());
            }
        }

        info!(
            volumes = %self
                .volumes
                .iter()
                .map(|v| format!("{}={}", v.id, v.root.display()))
                .collect::<Vec<_>>()
                .join(","),
            "Config validated"
        );
        Ok(())
    }
}

/// Ensure path exists and is a directory; emit clear errors with path context.
fn ensure_dir_exists_and_is_dir(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        error!("volume {name} root does not exist: {}", path.display());
        bail!("volume {name} root does not exist: {}", path.display());
    }
    if !path.is_dir() {
        error!("volume {name} root is not a directory: {}", path.display());
        bail!("volume {name} root is not a directory: {}", path.display());
    }
    Ok(())
}

/// Ensure directory is readable by attempting to open its entries.
fn ensure_readable(path: &Path, name: &str) -> Result<()> {
    fs::read_dir(path).with_context(|| {
        format!("Cannot read volume {name} root '{}'; check permissions", path.display())
    })?;
    debug!("volume {name} readable: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, VolumeConfig};
    use tempfile::tempdir;

    #[test]
    fn rejects_missing_root() {
        let td = tempdir().unwrap();
        let mut cfg = Config::new(vec![VolumeConfig::new("ms0", td.path().join("nope"))]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn rejects_overlapping_roots() {
        let td = tempdir().unwrap();
        let inner = td.path().join("inner");
        std::fs::create_dir_all(&inner).unwrap();
        let mut cfg = Config::new(vec![
            VolumeConfig::new("ms0", td.path()),
            VolumeConfig::new("ef0", &inner),
        ]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let mut cfg = Config::new(vec![
            VolumeConfig::new("ms0", a.path()),
            VolumeConfig::new("MS0", b.path()),
        ]);
        assert!(cfg.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn accepts_two_disjoint_volumes() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let mut cfg = Config::new(vec![
            VolumeConfig::new("ms0", a.path()),
            VolumeConfig::new("ef0", b.path()),
        ]);
        cfg.validate().unwrap();
    }
}
