//! User-facing console output.
//!
//! Small wrappers around stdout/stderr printing for consistent, coloured
//! messages, plus plain renderings of catalogs and transaction results.
//! Colours are enabled only when the stream is a TTY.

use owo_colors::OwoColorize;

use crate::catalog::{Catalog, CatalogEntry, ListFile, UNCATEGORIZED};
use crate::config::{DisplayMode, SchemeToggles};
use crate::fs_ops::format_bytes;
use crate::transaction::{Eligibility, TransactionSummary};

fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

fn is_tty_err() -> bool {
    atty::is(atty::Stream::Stderr)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {msg}");
    }
}

pub fn print_warn(msg: &str) {
    if is_tty_err() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {msg}");
    }
}

pub fn print_error(msg: &str) {
    if is_tty_err() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {msg}");
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {msg}");
    }
}

/// Print a plain line (no prefix) that users may script against.
pub fn print_user(msg: &str) {
    println!("{msg}");
}

fn entry_line(e: &CatalogEntry) -> String {
    format!("  {:<40} {:>10}  {}", e.display_name(), format_bytes(e.size_bytes), e.path.display())
}

/// Catalog lines in display order. Hidden categories and entries are skipped
/// when a filter is given. `Flat` lists every entry once, newest first, with no
/// category headers.
pub fn render_catalog(catalog: &Catalog, filter: Option<&ListFile>, mode: DisplayMode) -> Vec<String> {
    let hidden = |e: &CatalogEntry| filter.is_some_and(|f| catalog.is_hidden(e, f));
    if mode == DisplayMode::Flat {
        return catalog
            .flattened
            .iter()
            .filter(|e| !hidden(e))
            .map(entry_line)
            .collect();
    }
    let order = match filter {
        Some(f) => catalog.visible_categories(f),
        None => catalog.display_order(),
    };
    let mut lines = Vec::new();
    for name in order {
        let bucket = if name == UNCATEGORIZED && !catalog.categories.contains_key(name) {
            &catalog.uncategorized
        } else {
            match catalog.categories.get(name) {
                Some(b) => b,
                None => continue,
            }
        };
        let shown: Vec<&CatalogEntry> = bucket.iter().filter(|e| !hidden(e)).collect();
        lines.push(format!("{name} ({})", shown.len()));
        lines.extend(shown.into_iter().map(entry_line));
    }
    lines
}

pub fn print_catalog(catalog: &Catalog, filter: Option<&ListFile>, mode: DisplayMode) {
    for line in render_catalog(catalog, filter, mode) {
        print_user(&line);
    }
}

pub fn print_scheme(t: &SchemeToggles) {
    let on = |b: bool| if b { "on" } else { "off" };
    print_user(&format!("prefix:        {}", on(t.prefix_enabled)));
    print_user(&format!("sort:          {}", on(t.sort_enabled)));
    print_user(&format!("uncategorized: {}", on(t.show_uncategorized)));
    let display = match t.display_mode {
        DisplayMode::Folders => "folders",
        DisplayMode::Flat => "flat",
    };
    print_user(&format!("display:       {display}"));
}

pub fn print_summary(summary: &TransactionSummary) {
    for p in &summary.succeeded {
        print_user(&p.display().to_string());
    }
    for (p, reason) in &summary.failed {
        print_error(&format!("{}: {reason}", p.display()));
    }
    if summary.has_guard_failures() {
        print_error(&format!(
            "{} item(s) could not be verified at the destination; sources were kept",
            summary.guard_failures.len()
        ));
    }
    let msg = format!("{} succeeded, {} failed", summary.succeeded.len(), summary.failed.len());
    if summary.is_clean() {
        print_success(&msg);
    } else {
        print_warn(&msg);
    }
}

pub fn print_eligibility(rows: &[Eligibility]) {
    for r in rows {
        let free = if r.known { format_bytes(r.free) } else { "unknown".to_string() };
        let verdict = if r.eligible { "eligible" } else { "ineligible" };
        print_user(&format!(
            "{:<6} need {:>10}  free {:>10}  {verdict}",
            r.volume,
            format_bytes(r.required),
            free
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntryKind, model::OrderRule};
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn entry(p: &str) -> CatalogEntry {
        CatalogEntry::new(EntryKind::ContainerFile, PathBuf::from(p), SystemTime::UNIX_EPOCH, 2048)
    }

    #[test]
    fn filtered_rendering_hides_categories() {
        let rule = OrderRule {
            numeric: false,
            prefix: "CAT_".into(),
        };
        let mut c = Catalog::new(rule, true);
        c.insert(Some("CAT_Action"), entry("/v/ISO/CAT_Action/a.iso"));
        c.insert(Some("CAT_Demos"), entry("/v/ISO/CAT_Demos/d.iso"));
        c.insert(None, entry("/v/ISO/loose.iso"));

        let all = render_catalog(&c, None, DisplayMode::Folders);
        assert!(all.iter().any(|l| l.starts_with("CAT_Demos (1)")));
        assert!(all.iter().any(|l| l.starts_with(UNCATEGORIZED)));

        let f = ListFile::parse("Demos");
        let shown = render_catalog(&c, Some(&f), DisplayMode::Folders);
        assert!(!shown.iter().any(|l| l.contains("d.iso")));
        assert!(shown.iter().any(|l| l.contains("a.iso")));
    }

    #[test]
    fn flat_rendering_has_no_headers() {
        let rule = OrderRule {
            numeric: false,
            prefix: "CAT_".into(),
        };
        let mut c = Catalog::new(rule, true);
        c.insert(Some("CAT_Action"), entry("/v/ISO/CAT_Action/a.iso"));
        c.insert(Some("CAT_Demos"), entry("/v/ISO/CAT_Demos/d.iso"));
        c.insert(None, entry("/v/ISO/loose.iso"));
        c.finish();

        let flat = render_catalog(&c, None, DisplayMode::Flat);
        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|l| l.starts_with("  ")));
        assert!(!flat.iter().any(|l| l.contains("CAT_Action (")));

        let f = ListFile::parse("Demos");
        let shown = render_catalog(&c, Some(&f), DisplayMode::Flat);
        assert_eq!(shown.len(), 2);
        assert!(!shown.iter().any(|l| l.contains("d.iso")));
    }
}
