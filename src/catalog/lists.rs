//! Per-volume line-delimited name lists (blacklist and launcher filter).

use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{Config, VolumeConfig};
use crate::fs_ops::io_error_with_help;
use crate::platform::write_atomic;

pub const BLACKLIST_FILE: &str = "blacklist.txt";
pub const FILTER_FILE: &str = "filter.txt";

/// Ordered, case-insensitively unique list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFile {
    entries: Vec<String>,
}

impl ListFile {
    /// Parse text: one name per line, CRLF tolerated, blanks dropped,
    /// later case-insensitive duplicates dropped.
    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        for line in text.lines() {
            out.add(line.trim_end_matches('\r'));
        }
        out
    }

    /// Load from `path`; a missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => {
                let list = Self::parse(&String::from_utf8_lossy(&bytes));
                debug!(path = %path.display(), count = list.len(), "loaded list file");
                Ok(list)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(io_error_with_help("read list file", path)(e)),
        }
    }

    /// Write with LF endings, creating the state directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_error_with_help("create state dir", dir))?;
        }
        write_atomic(path, self.to_text().as_bytes())
    }

    pub fn to_text(&self) -> String {
        let mut s = String::new();
        for e in &self.entries {
            s.push_str(e);
            s.push('\n');
        }
        s
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim();
        self.entries.iter().any(|e| e.eq_ignore_ascii_case(name))
    }

    /// Returns false when the name was already present or blank.
    pub fn add(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.entries.push(name.to_string());
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        let name = name.trim();
        self.entries.retain(|e| !e.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Location of a list file on a volume.
pub fn list_path(config: &Config, volume: &VolumeConfig, file: &str) -> PathBuf {
    volume.root.join(&config.state_dir).join(file)
}
