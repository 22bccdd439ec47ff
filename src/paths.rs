//! Pure path helpers: volume membership, name sanitizing, entry recognition
//! and category-name decoration.

use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path};
use std::time::SystemTime;

use crate::config::VolumeConfig;

/// Width of [`sort_key`] output.
pub const SORT_KEY_LEN: usize = 14;

/// Configured volume owning `path` (longest matching root). Paths with `.` or
/// `..` segments belong to no volume: prefix matching cannot see where they end up.
pub fn volume_of<'a>(volumes: &'a [VolumeConfig], path: &Path) -> Option<&'a VolumeConfig> {
    if has_dot_segments(path) {
        return None;
    }
    volumes
        .iter()
        .filter(|v| path.starts_with(&v.root))
        .max_by_key(|v| v.root.components().count())
}

/// `path` relative to the volume root, if it lies inside it.
pub fn relative_to_volume<'a>(volume: &VolumeConfig, path: &'a Path) -> Option<&'a Path> {
    path.strip_prefix(&volume.root).ok()
}

/// True when both paths resolve to the same configured volume.
pub fn same_volume(volumes: &[VolumeConfig], a: &Path, b: &Path) -> bool {
    match (volume_of(volumes, a), volume_of(volumes, b)) {
        (Some(x), Some(y)) => x.id == y.id,
        _ => false,
    }
}

pub fn has_dot_segments(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
}

/// A single folder or file name that needs no sanitizing.
pub fn is_plain_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) && sanitize_name(name) == name
}

/// Make a name safe for FAT-style media.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_end_matches(['.', ' ']).to_string()
}

/// Hidden metadata files and folders dropped by desktop operating systems.
pub fn is_junk_name(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else {
        return false;
    };
    if name.starts_with("._") {
        return true;
    }
    const JUNK: &[&str] = &[
        ".DS_Store",
        ".Trashes",
        ".Spotlight-V100",
        ".fseventsd",
        ".TemporaryItems",
        "Thumbs.db",
        "desktop.ini",
        "System Volume Information",
        "$RECYCLE.BIN",
    ];
    JUNK.iter().any(|j| j.eq_ignore_ascii_case(name))
}

/// Lower-cased extension.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn has_extension_in(path: &Path, exts: &[String]) -> bool {
    extension_lower(path).is_some_and(|e| exts.iter().any(|x| *x == e))
}

/// Recognised disc-image container (by extension).
pub fn is_container_file(path: &Path, container_exts: &[String]) -> bool {
    has_extension_in(path, container_exts)
}

/// File whose presence a launcher depends on.
pub fn is_critical(path: &Path, critical_exts: &[String]) -> bool {
    has_extension_in(path, critical_exts)
}

/// Whether `dir` directly contains one of the package descriptors (case-insensitive).
pub fn is_package_dir(dir: &Path, descriptors: &[String]) -> bool {
    let Ok(rd) = fs::read_dir(dir) else {
        return false;
    };
    rd.flatten().any(|e| {
        let name = e.file_name();
        let name = name.to_string_lossy();
        descriptors.iter().any(|d| d.eq_ignore_ascii_case(&name))
            && e.file_type().map(|t| t.is_file()).unwrap_or(false)
    })
}

fn strip_prefix_ci<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(name);
    }
    let head = name.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &name[prefix.len()..])
}

fn split_sort_number(s: &str) -> Option<(u32, &str)> {
    let b = s.as_bytes();
    if b.len() > 2 && b[0].is_ascii_digit() && b[1].is_ascii_digit() {
        let n = u32::from(b[0] - b'0') * 10 + u32::from(b[1] - b'0');
        Some((n, &s[2..]))
    } else {
        None
    }
}

/// Category name with prefix and sort number removed.
pub fn base_category_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    let rest = strip_prefix_ci(name, prefix).filter(|r| !r.is_empty()).unwrap_or(name);
    split_sort_number(rest).map(|(_, b)| b).unwrap_or(rest)
}

/// Two-digit sort number of a category name, after the optional prefix.
pub fn sort_number(name: &str, prefix: &str) -> Option<u32> {
    let rest = strip_prefix_ci(name, prefix).unwrap_or(name);
    split_sort_number(rest).map(|(n, _)| n)
}

/// Build an on-disk category name: `<prefix><NN><base>`.
pub fn decorate(base: &str, prefix: Option<&str>, number: Option<u32>) -> String {
    let mut out = String::new();
    if let Some(p) = prefix {
        out.push_str(p);
    }
    if let Some(n) = number {
        out.push_str(&format!("{:02}", n.min(99)));
    }
    out.push_str(base);
    out
}

/// Fixed-width `YYYYMMDDhhmmss` key; lexical order equals chronological order.
pub fn sort_key(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%Y%m%d%H%M%S").to_string()
}
