//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.
//! - SchemeToggles carries the category naming scheme switches.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::paths;
use super::{
    CATEGORY_PREFIX_DEFAULT, CONTAINER_ROOT_DEFAULT, PACKAGE_ROOT_DEFAULT, STATE_DIR_DEFAULT,
};

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Informational output (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// How the external launcher presents the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// One entry per category folder
    #[default]
    Folders,
    /// Everything in one flattened list
    Flat,
}

impl DisplayMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folders" | "folder" | "categories" => Some(DisplayMode::Folders),
            "flat" | "list" => Some(DisplayMode::Flat),
            _ => None,
        }
    }
}

/// Category naming scheme switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeToggles {
    /// Decorate category folders with the fixed prefix
    pub prefix_enabled: bool,
    /// Decorate category folders with a two-digit sort number
    pub sort_enabled: bool,
    /// Append the "Uncategorized" bucket to the category list when it has entries
    pub show_uncategorized: bool,
    pub display_mode: DisplayMode,
}

impl Default for SchemeToggles {
    fn default() -> Self {
        Self {
            prefix_enabled: true,
            sort_enabled: false,
            show_uncategorized: true,
            display_mode: DisplayMode::Folders,
        }
    }
}

/// One logical storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeConfig {
    /// Short identifier, e.g. `ms0` or `ef0`
    pub id: String,
    /// Filesystem path where the volume is mounted
    pub root: PathBuf,
}

impl VolumeConfig {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }
}

/// Runtime configuration used by the storage engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mounted volumes (one or two)
    pub volumes: Vec<VolumeConfig>,
    /// Volume-relative directories holding container files
    pub container_roots: Vec<PathBuf>,
    /// Volume-relative directories holding package folders
    pub package_roots: Vec<PathBuf>,
    /// Fixed prefix used when `scheme.prefix_enabled` is set
    pub category_prefix: String,
    pub scheme: SchemeToggles,
    /// Optional binary scheme record overriding the XML toggles
    pub scheme_record: Option<PathBuf>,
    /// Volume-relative directory for blacklist/filter files
    pub state_dir: PathBuf,
    /// Remove colliding destination entries before writing
    pub replace_on_collision: bool,
    /// Lower-case extensions whose presence is verified after move/copy
    pub critical_extensions: Vec<String>,
    /// File names marking a folder as an installable package
    pub package_descriptors: Vec<String>,
    /// Lower-case extensions recognised as container files
    pub container_extensions: Vec<String>,
    /// Space kept free on a destination volume
    pub headroom_bytes: u64,
    /// Fallback wake interval of the free-space probe
    pub probe_interval: Duration,
    /// Delay before re-polling a missing critical file
    pub presence_repoll: Duration,
    /// Wall-clock budget for shrinking write retries during buffered copy
    pub write_retry_budget: Duration,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            container_roots: vec![PathBuf::from(CONTAINER_ROOT_DEFAULT)],
            package_roots: vec![PathBuf::from(PACKAGE_ROOT_DEFAULT)],
            category_prefix: CATEGORY_PREFIX_DEFAULT.to_string(),
            scheme: SchemeToggles::default(),
            scheme_record: None,
            state_dir: PathBuf::from(STATE_DIR_DEFAULT),
            replace_on_collision: true,
            critical_extensions: ["pbp", "bin", "prx", "iso", "cso", "zso", "dax", "jso"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            package_descriptors: vec!["EBOOT.PBP".to_string()],
            container_extensions: ["iso", "cso", "zso", "dax", "jso"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            headroom_bytes: 4 * 1024 * 1024,
            probe_interval: Duration::from_millis(2000),
            presence_repoll: Duration::from_millis(200),
            write_retry_budget: Duration::from_secs(10),
            log_level: LogLevel::Normal,
            log_file: paths::default_log_path(),
        }
    }
}

impl Config {
    /// Construct a Config over explicit volumes; other fields use defaults.
    pub fn new(volumes: Vec<VolumeConfig>) -> Self {
        Self {
            volumes,
            ..Default::default()
        }
    }

    /// Look up a configured volume by id.
    pub fn volume(&self, id: &str) -> Option<&VolumeConfig> {
        self.volumes.iter().find(|v| v.id.eq_ignore_ascii_case(id))
    }

    /// Prefix to apply when decorating category folders, if enabled.
    pub fn active_prefix(&self) -> Option<&str> {
        if self.scheme.prefix_enabled && !self.category_prefix.is_empty() {
            Some(&self.category_prefix)
        } else {
            None
        }
    }
}
