//! Fixed-size binary scheme record.
//!
//! Layout (8 bytes): magic `PKSH`, then one byte each for prefix on/off,
//! sort on/off, uncategorized visibility and display mode (0 folders, 1 flat).
//! The record is shared with the launcher add-on, which reads the same bytes.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::types::{Config, DisplayMode, SchemeToggles};
use crate::errors::ShelfError;
use crate::platform::write_secure_atomic;

pub const RECORD_LEN: usize = 8;
const MAGIC: &[u8; 4] = b"PKSH";

impl SchemeToggles {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..4].copy_from_slice(MAGIC);
        out[4] = self.prefix_enabled as u8;
        out[5] = self.sort_enabled as u8;
        out[6] = self.show_uncategorized as u8;
        out[7] = match self.display_mode {
            DisplayMode::Folders => 0,
            DisplayMode::Flat => 1,
        };
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShelfError> {
        if bytes.len() != RECORD_LEN {
            return Err(ShelfError::MalformedSchemeRecord(format!(
                "expected {RECORD_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(ShelfError::MalformedSchemeRecord("bad magic".into()));
        }
        let flag = |i: usize| -> Result<bool, ShelfError> {
            match bytes[i] {
                0 => Ok(false),
                1 => Ok(true),
                b => Err(ShelfError::MalformedSchemeRecord(format!(
                    "byte {i} is {b}, expected 0 or 1"
                ))),
            }
        };
        let display_mode = match bytes[7] {
            0 => DisplayMode::Folders,
            1 => DisplayMode::Flat,
            b => {
                return Err(ShelfError::MalformedSchemeRecord(format!(
                    "unknown display mode {b}"
                )));
            }
        };
        Ok(Self {
            prefix_enabled: flag(4)?,
            sort_enabled: flag(5)?,
            show_uncategorized: flag(6)?,
            display_mode,
        })
    }
}

/// Read the record at `path`. Missing file yields `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<SchemeToggles>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read scheme record '{}'", path.display())),
    };
    let toggles = SchemeToggles::from_bytes(&bytes)
        .with_context(|| format!("decode scheme record '{}'", path.display()))?;
    debug!(path = %path.display(), ?toggles, "loaded scheme record");
    Ok(Some(toggles))
}

pub fn save(path: &Path, toggles: &SchemeToggles) -> Result<()> {
    write_secure_atomic(path, &toggles.to_bytes())
}

impl Config {
    /// Override the XML toggles with the binary record, when one is configured and present.
    pub fn apply_scheme_record(&mut self) -> Result<bool> {
        let Some(path) = self.scheme_record.clone() else {
            return Ok(false);
        };
        match load(&path)? {
            Some(t) => {
                self.scheme = t;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load() {
        let td = tempdir().unwrap();
        let p = td.path().join("scheme.bin");
        let t = SchemeToggles {
            prefix_enabled: false,
            sort_enabled: true,
            show_uncategorized: false,
            display_mode: DisplayMode::Flat,
        };
        save(&p, &t).unwrap();
        assert_eq!(fs::metadata(&p).unwrap().len(), RECORD_LEN as u64);
        assert_eq!(load(&p).unwrap(), Some(t));
    }

    #[test]
    fn record_overrides_config_toggles() {
        let td = tempdir().unwrap();
        let p = td.path().join("scheme.bin");
        let mut cfg = Config::default();
        cfg.scheme_record = Some(p.clone());
        assert!(!cfg.apply_scheme_record().unwrap());

        let t = SchemeToggles {
            sort_enabled: true,
            ..SchemeToggles::default()
        };
        save(&p, &t).unwrap();
        assert!(cfg.apply_scheme_record().unwrap());
        assert!(cfg.scheme.sort_enabled);
    }

    #[test]
    fn missing_is_none() {
        let td = tempdir().unwrap();
        assert_eq!(load(&td.path().join("absent.bin")).unwrap(), None);
    }

    #[test]
    fn rejects_wrong_length_and_magic() {
        assert!(SchemeToggles::from_bytes(b"PKSH\x01").is_err());
        assert!(SchemeToggles::from_bytes(b"NOPE\x01\x00\x01\x00").is_err());
        assert!(SchemeToggles::from_bytes(b"PKSH\x02\x00\x01\x00").is_err());
    }
}
