//! XML configuration support.
//! - Loads settings from config.xml (quick_xml + serde).
//! - Creates a commented template if missing (unless PKGSHELF_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; volume validation happens elsewhere.
//! - Unknown XML fields are rejected so misconfigurations surface early.

use anyhow::{Context, Result, anyhow};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
use super::types::{Config, DisplayMode, LogLevel, VolumeConfig};
use super::{CATEGORY_PREFIX_DEFAULT, CONFIG_ENV, CONTAINER_ROOT_DEFAULT, PACKAGE_ROOT_DEFAULT};

use crate::platform::{set_dir_mode_0700, write_secure_atomic};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlVolume {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@root")]
    root: String,
}

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(rename = "volume", default)]
    volumes: Vec<XmlVolume>,
    container_roots: Option<String>,
    package_roots: Option<String>,
    category_prefix: Option<String>,
    #[serde(default, deserialize_with = "de_bool_trimmed_opt")]
    prefix_enabled: Option<bool>,
    #[serde(default, deserialize_with = "de_bool_trimmed_opt")]
    sort_enabled: Option<bool>,
    #[serde(default, deserialize_with = "de_bool_trimmed_opt")]
    show_uncategorized: Option<bool>,
    display_mode: Option<String>,
    scheme_record: Option<String>,
    state_dir: Option<String>,
    #[serde(default, deserialize_with = "de_bool_trimmed_opt")]
    replace_on_collision: Option<bool>,
    critical_extensions: Option<String>,
    package_descriptors: Option<String>,
    container_extensions: Option<String>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    headroom_mib: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    probe_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    presence_repoll_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_u64_trimmed_opt")]
    write_retry_budget_ms: Option<u64>,
    log_level: Option<String>,
    log_file: Option<String>,
}

// Custom deserializer that trims surrounding whitespace for optional u64
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| s.trim().parse::<u64>().ok()))
}

fn de_bool_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// Map XmlConfig -> Config
fn xml_to_config(parsed: XmlConfig) -> Config {
    let mut cfg = Config::default();

    cfg.volumes = parsed
        .volumes
        .into_iter()
        .map(|v| VolumeConfig::new(v.id.trim(), PathBuf::from(v.root.trim())))
        .collect();

    if let Some(s) = non_empty(parsed.container_roots.as_deref()) {
        cfg.container_roots = split_list(s).into_iter().map(PathBuf::from).collect();
    }
    if let Some(s) = non_empty(parsed.package_roots.as_deref()) {
        cfg.package_roots = split_list(s).into_iter().map(PathBuf::from).collect();
    }
    if let Some(s) = parsed.category_prefix.as_deref() {
        cfg.category_prefix = s.trim().to_string();
    }

    if let Some(b) = parsed.prefix_enabled {
        cfg.scheme.prefix_enabled = b;
    }
    if let Some(b) = parsed.sort_enabled {
        cfg.scheme.sort_enabled = b;
    }
    if let Some(b) = parsed.show_uncategorized {
        cfg.scheme.show_uncategorized = b;
    }
    if let Some(mode) = parsed.display_mode.as_deref().and_then(DisplayMode::parse) {
        cfg.scheme.display_mode = mode;
    }

    cfg.scheme_record = non_empty(parsed.scheme_record.as_deref()).map(PathBuf::from);
    if let Some(s) = non_empty(parsed.state_dir.as_deref()) {
        cfg.state_dir = PathBuf::from(s);
    }
    if let Some(b) = parsed.replace_on_collision {
        cfg.replace_on_collision = b;
    }
    if let Some(s) = non_empty(parsed.critical_extensions.as_deref()) {
        cfg.critical_extensions = split_list(&s.to_ascii_lowercase());
    }
    if let Some(s) = non_empty(parsed.package_descriptors.as_deref()) {
        cfg.package_descriptors = split_list(s);
    }
    if let Some(s) = non_empty(parsed.container_extensions.as_deref()) {
        cfg.container_extensions = split_list(&s.to_ascii_lowercase());
    }

    if let Some(mib) = parsed.headroom_mib {
        cfg.headroom_bytes = mib.saturating_mul(1024 * 1024);
    }
    if let Some(ms) = parsed.probe_interval_ms {
        cfg.probe_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = parsed.presence_repoll_ms {
        cfg.presence_repoll = Duration::from_millis(ms);
    }
    if let Some(ms) = parsed.write_retry_budget_ms {
        cfg.write_retry_budget = Duration::from_millis(ms);
    }

    if let Some(level) = parsed.log_level.as_deref().and_then(|s| s.trim().parse::<LogLevel>().ok()) {
        cfg.log_level = level;
    }
    if let Some(s) = non_empty(parsed.log_file.as_deref()) {
        cfg.log_file = Some(PathBuf::from(s));
    }

    cfg
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .with_context(|| format!("parse config xml '{}'", path.display()))?;
    debug!(path = %path.display(), volumes = parsed.volumes.len(), "parsed config xml");
    Ok(xml_to_config(parsed))
}

/// Outcome of [`load_or_init`].
#[derive(Debug)]
pub enum LoadResult {
    /// Config read from the given file
    Loaded(Box<Config>, PathBuf),
    /// No config existed at the default location; a template was written there
    CreatedTemplate(PathBuf),
}

/// Load config from an explicit path, `$PKGSHELF_CONFIG`, or the default location.
///
/// A template is only created at the default location; an explicit or
/// environment-provided path that does not exist is an error.
pub fn load_or_init(explicit: Option<&Path>) -> Result<LoadResult> {
    if let Some(p) = explicit {
        let cfg = load_config_from_xml_path(p)?;
        return Ok(LoadResult::Loaded(Box::new(cfg), p.to_path_buf()));
    }

    let env_set = env::var_os(CONFIG_ENV).is_some();
    let path = default_config_path().ok_or_else(|| anyhow!("could not resolve a config path"))?;

    if path.exists() {
        let cfg = load_config_from_xml_path(&path)?;
        return Ok(LoadResult::Loaded(Box::new(cfg), path));
    }
    if env_set {
        return Err(anyhow!(
            "{} points to a missing file: {}",
            CONFIG_ENV,
            path.display()
        ));
    }

    create_template_config(&path)?;
    Ok(LoadResult::CreatedTemplate(path))
}

/// Create default template config file and parent directory (best-effort permissions).
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        return Err(anyhow!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = set_dir_mode_0700(parent);
    }

    let suggested_log = default_log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/path/to/pkgshelf.log".into());

    let content = format!(
        "<!--\n  pkgshelf configuration (XML)\n\n  Volumes:\n    <volume id=\"ms0\" root=\"/media/ms0\"/>   one or two mounted volumes\n\n  Layout (volume-relative, comma separated):\n    container_roots        -> directories holding disc images\n    package_roots          -> directories holding package folders\n    state_dir              -> where blacklist.txt / filter.txt live on each volume\n\n  Scheme toggles (true/false):\n    prefix_enabled, sort_enabled, show_uncategorized\n    display_mode           -> folders | flat\n    scheme_record          -> optional binary record that overrides the toggles\n\n  Engine:\n    replace_on_collision   -> remove case-insensitive name clashes before writing\n    headroom_mib           -> space kept free on destination volumes\n    write_retry_budget_ms  -> total time spent shrinking failed writes\n-->\n<config>\n  <volume id=\"ms0\" root=\"/media/ms0\"/>\n  <container_roots>{}</container_roots>\n  <package_roots>{}</package_roots>\n  <category_prefix>{}</category_prefix>\n  <prefix_enabled>true</prefix_enabled>\n  <sort_enabled>false</sort_enabled>\n  <show_uncategorized>true</show_uncategorized>\n  <display_mode>folders</display_mode>\n  <replace_on_collision>true</replace_on_collision>\n  <headroom_mib>4</headroom_mib>\n  <log_level>normal</log_level>\n  <log_file>{}</log_file>\n</config>\n",
        CONTAINER_ROOT_DEFAULT, PACKAGE_ROOT_DEFAULT, CATEGORY_PREFIX_DEFAULT, suggested_log
    );

    write_secure_atomic(path, content.as_bytes())?;

    info!("Created template config at {}", path.display());
    Ok(())
}
