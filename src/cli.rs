//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - --json switches both log lines and command output to JSON.

use clap::builder::BoolishValueParser;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

use pkgshelf::{Config, DisplayMode, LogLevel, Mode, SchemeToggles};

/// Catalog, move and copy packages and disc images across storage volumes.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Manage a package and disc-image library across volumes")]
pub struct Args {
    /// Explicit config file (otherwise $PKGSHELF_CONFIG or the default location).
    #[arg(long, global = true, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long, global = true, help = "Enable debug logging (shorthand for --log-level debug)")]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, global = true, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Print where pkgshelf will look for the config file, then exit.
    #[arg(long, help = "Print the config file location used by pkgshelf and exit")]
    pub print_config: bool,

    /// Emit logs and command output as JSON.
    #[arg(long, global = true, help = "Emit logs and command output as JSON")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan a volume and print its catalog.
    Scan {
        /// Volume id, e.g. ms0
        volume: String,
        /// Apply the volume's launcher filter to the listing
        #[arg(long)]
        filtered: bool,
    },
    /// Move entries to a volume (and optionally a category).
    Move(Transfer),
    /// Copy entries to a volume (and optionally a category).
    Copy(Transfer),
    /// Delete entries.
    Delete {
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    /// Show which volumes could take the given entries.
    Space {
        #[arg(long, value_enum, default_value_t = SpaceMode::Copy)]
        mode: SpaceMode,
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    /// Rename category folders to match the naming scheme.
    Enforce { volume: String },
    /// Manage the per-volume blacklist of base category names.
    Blacklist {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Manage the per-volume launcher filter.
    Filter {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Create or delete category folders.
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// Show or change the naming scheme kept in the binary scheme record.
    Scheme(SchemeChange),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Transfer {
    /// Destination volume id
    #[arg(long = "to", value_name = "VOLUME")]
    pub volume: String,
    /// Destination category (base or decorated name); root when omitted
    #[arg(long)]
    pub category: Option<String>,
    #[arg(required = true, value_hint = ValueHint::AnyPath)]
    pub paths: Vec<PathBuf>,
}

/// Unset flags leave the current value alone.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SchemeChange {
    #[arg(long, value_name = "ON|OFF", value_parser = BoolishValueParser::new())]
    pub prefix: Option<bool>,
    #[arg(long, value_name = "ON|OFF", value_parser = BoolishValueParser::new())]
    pub sort: Option<bool>,
    #[arg(long, value_name = "ON|OFF", value_parser = BoolishValueParser::new())]
    pub uncategorized: Option<bool>,
    #[arg(long, value_enum)]
    pub display: Option<DisplayArg>,
}

impl SchemeChange {
    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.sort.is_none() && self.uncategorized.is_none() && self.display.is_none()
    }

    pub fn apply(&self, t: &mut SchemeToggles) {
        if let Some(v) = self.prefix {
            t.prefix_enabled = v;
        }
        if let Some(v) = self.sort {
            t.sort_enabled = v;
        }
        if let Some(v) = self.uncategorized {
            t.show_uncategorized = v;
        }
        if let Some(d) = self.display {
            t.display_mode = d.into();
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayArg {
    Folders,
    Flat,
}

impl From<DisplayArg> for DisplayMode {
    fn from(d: DisplayArg) -> Self {
        match d {
            DisplayArg::Folders => DisplayMode::Folders,
            DisplayArg::Flat => DisplayMode::Flat,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ListAction {
    Add { volume: String, name: String },
    Remove { volume: String, name: String },
    List { volume: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryAction {
    Create { volume: String, name: String },
    Delete { volume: String, name: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceMode {
    Move,
    Copy,
}

impl From<SpaceMode> for Mode {
    fn from(m: SpaceMode) -> Self {
        match m {
            SpaceMode::Move => Mode::Move,
            SpaceMode::Copy => Mode::Copy,
        }
    }
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
