//! Application orchestrator.
//! Loads/merges config, initializes logging, validates volumes and dispatches
//! the requested subcommand against a [`Library`] session.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use pkgshelf::config::CONFIG_ENV as CONFIG_ENV_NAME;
use pkgshelf::config::scheme_record;
use pkgshelf::output as out;
use pkgshelf::{
    Config, Device, EntryKind, FreeSpaceProbe, Library, ListKind, LoadResult, LocalDevice,
    Mode, NoTitles, PendingOperation, ShelfError, TransactionOrchestrator, TransactionSummary,
    default_config_path, load_or_init,
};

use crate::cli::{Args, CategoryAction, Command, ListAction, SchemeChange, Transfer};
use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        print_config_location(args.config.as_deref());
        return Ok(());
    }

    let mut cfg = match load_or_init(args.config.as_deref())? {
        LoadResult::CreatedTemplate(path) => {
            out::print_success(&format!("A template pkgshelf config was written to: {}", path.display()));
            out::print_info("Edit the <volume> entries to point at your mounted volumes, then re-run this command.");
            out::print_info(&format!("To use a different location set {CONFIG_ENV_NAME} or pass --config."));
            return Ok(());
        }
        LoadResult::Loaded(cfg, path) => {
            let mut cfg = *cfg;
            args.apply_overrides(&mut cfg);
            trace!(path = %path.display(), "config loaded");
            cfg
        }
    };

    let _guard = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;
    debug!(?args, "starting pkgshelf");

    if cfg.apply_scheme_record()? {
        debug!("scheme toggles taken from binary record");
    }
    cfg.validate()?;

    let Some(command) = args.command.clone() else {
        out::print_info("Nothing to do; see --help for commands.");
        return Ok(());
    };

    let result = dispatch(cfg, command, args.json);
    if let Err(e) = &result {
        match e.downcast_ref::<ShelfError>() {
            Some(se) => error!(code = se.code(), error = %se, "command failed"),
            None => error!(error = %format!("{e:#}"), "command failed"),
        }
    }
    result
}

fn print_config_location(explicit: Option<&std::path::Path>) {
    if let Some(p) = explicit {
        out::print_info(&format!("Using --config:\n  {}\n", p.display()));
        return;
    }
    if let Ok(v) = std::env::var(CONFIG_ENV_NAME) {
        out::print_info(&format!("Using {CONFIG_ENV_NAME} (explicit):\n  {v}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV_NAME} or set it to another file."));
        return;
    }
    match default_config_path() {
        Some(p) => {
            out::print_info(&format!("Default pkgshelf config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet. Run without --print-config to create a template.");
            }
        }
        None => out::print_error("Could not determine a default config path."),
    }
}

fn entry_kind(path: &std::path::Path) -> EntryKind {
    if path.is_dir() {
        EntryKind::PackageFolder
    } else {
        EntryKind::ContainerFile
    }
}

fn with_kinds(paths: Vec<PathBuf>) -> Vec<(PathBuf, EntryKind)> {
    paths
        .into_iter()
        .map(|p| {
            let p = dunce::canonicalize(&p).unwrap_or(p);
            let k = entry_kind(&p);
            (p, k)
        })
        .collect()
}

fn finish(summary: TransactionSummary, json: bool) -> Result<()> {
    if json {
        out::print_user(&serde_json::to_string_pretty(&summary)?);
    } else {
        out::print_summary(&summary);
    }
    if summary.has_guard_failures() {
        bail!("{} item(s) failed verification", summary.guard_failures.len());
    }
    if !summary.is_clean() {
        bail!("{} item(s) failed", summary.failed.len());
    }
    Ok(())
}

/// Show the effective toggles, or change them and rewrite the scheme record.
fn scheme_command(cfg: &Config, change: &SchemeChange) -> Result<()> {
    let mut toggles = cfg.scheme;
    if !change.is_empty() {
        let Some(path) = cfg.scheme_record.as_deref() else {
            bail!("no <scheme_record> configured; add one to the config to change the scheme");
        };
        change.apply(&mut toggles);
        scheme_record::save(path, &toggles)?;
        info!(path = %path.display(), ?toggles, "scheme record written");
    }
    out::print_scheme(&toggles);
    Ok(())
}

fn dispatch(cfg: Config, command: Command, json: bool) -> Result<()> {
    let device: Arc<dyn Device> = Arc::new(LocalDevice);
    let probe_interval = cfg.probe_interval;
    let display = cfg.scheme.display_mode;
    let volumes = cfg.volumes.clone();
    let mut library = Library::new(cfg, device.clone(), Arc::new(NoTitles));

    match command {
        Command::Scan { volume, filtered } => {
            let filter = if filtered {
                Some(library.list(&volume, ListKind::Filter)?.clone())
            } else {
                None
            };
            let catalog = library.open_volume(&volume)?;
            if json {
                out::print_user(&serde_json::to_string_pretty(catalog)?);
            } else {
                out::print_catalog(catalog, filter.as_ref(), display);
            }
            Ok(())
        }
        Command::Move(t) => transfer(&mut library, Mode::Move, t, volumes, device, probe_interval, json),
        Command::Copy(t) => transfer(&mut library, Mode::Copy, t, volumes, device, probe_interval, json),
        Command::Delete { paths } => {
            let probe = FreeSpaceProbe::spawn(volumes, device, probe_interval)?;
            let op = PendingOperation::deleting(with_kinds(paths));
            let summary = TransactionOrchestrator::new(&mut library, Some(&probe)).run(op, &mut progress())?;
            finish(summary, json)
        }
        Command::Space { mode, paths } => {
            let items: Vec<PathBuf> = with_kinds(paths).into_iter().map(|(p, _)| p).collect();
            let rows = TransactionOrchestrator::new(&mut library, None).eligible_destinations(&items, mode.into());
            if json {
                out::print_user(&serde_json::to_string_pretty(&rows)?);
            } else {
                out::print_eligibility(&rows);
            }
            Ok(())
        }
        Command::Enforce { volume } => {
            let report = library.enforce_scheme(&volume)?;
            for (from, to) in &report.renamed {
                out::print_user(&format!("{} -> {}", from.display(), to.display()));
            }
            for (dir, reason) in &report.failed {
                out::print_warn(&format!("{}: {reason}", dir.display()));
            }
            out::print_success(&format!("{} folder(s) renamed", report.renamed.len()));
            Ok(())
        }
        Command::Blacklist { action } => list_command(&mut library, ListKind::Blacklist, action),
        Command::Filter { action } => list_command(&mut library, ListKind::Filter, action),
        Command::Scheme(change) => scheme_command(library.config(), &change),
        Command::Category { action } => match action {
            CategoryAction::Create { volume, name } => {
                let made = library.create_category(&volume, &name)?;
                if made.is_empty() {
                    out::print_info(&format!("Category '{name}' already exists on {volume}"));
                }
                for d in made {
                    out::print_user(&d.display().to_string());
                }
                Ok(())
            }
            CategoryAction::Delete { volume, name } => {
                let probe = FreeSpaceProbe::spawn(volumes, device, probe_interval)?;
                let removed = library.delete_category(&volume, &name, Some(&probe))?;
                if removed.is_empty() {
                    bail!("no category named '{name}' on {volume}");
                }
                for d in removed {
                    out::print_user(&d.display().to_string());
                }
                Ok(())
            }
        },
    }
}

/// Progress sink that traces each update.
fn progress() -> impl FnMut(&str, u64, u64) {
    |label: &str, current: u64, total: u64| trace!(label, current, total, "progress")
}

fn transfer(
    library: &mut Library,
    mode: Mode,
    t: Transfer,
    volumes: Vec<pkgshelf::VolumeConfig>,
    device: Arc<dyn Device>,
    interval: std::time::Duration,
    json: bool,
) -> Result<()> {
    let probe = FreeSpaceProbe::spawn(volumes, device, interval)?;
    let items = with_kinds(t.paths);
    let op = match mode {
        Mode::Move => PendingOperation::moving(items, &t.volume, t.category.as_deref()),
        _ => PendingOperation::copying(items, &t.volume, t.category.as_deref()),
    };
    let summary = TransactionOrchestrator::new(library, Some(&probe)).run(op, &mut progress())?;
    finish(summary, json)
}

fn list_command(library: &mut Library, kind: ListKind, action: ListAction) -> Result<()> {
    let (volume, changed, verb) = match action {
        ListAction::List { volume } => {
            for name in library.list(&volume, kind)?.entries() {
                out::print_user(name);
            }
            return Ok(());
        }
        ListAction::Add { volume, name } => {
            let changed = match kind {
                ListKind::Blacklist => library.blacklist_add(&volume, &name)?,
                ListKind::Filter => library.filter_add(&volume, &name)?,
            };
            (volume, changed, format!("added '{name}'"))
        }
        ListAction::Remove { volume, name } => {
            let changed = match kind {
                ListKind::Blacklist => library.blacklist_remove(&volume, &name)?,
                ListKind::Filter => library.filter_remove(&volume, &name)?,
            };
            (volume, changed, format!("removed '{name}'"))
        }
    };
    let path = library.list_file_path(&volume, kind)?;
    if changed {
        out::print_success(&format!("{verb} ({})", path.display()));
    } else {
        out::print_info(&format!("No change to {}", path.display()));
    }
    Ok(())
}
