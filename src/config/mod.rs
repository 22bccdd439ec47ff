//! Config module.
//! Provides configuration types, default paths, XML loading, the binary scheme
//! record, and validation.

pub mod paths;
pub mod scheme_record;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
pub use types::{Config, DisplayMode, LogLevel, SchemeToggles, VolumeConfig};
pub use xml::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init};

/// Defaults shared across submodules.
pub const CONTAINER_ROOT_DEFAULT: &str = "ISO";
pub const PACKAGE_ROOT_DEFAULT: &str = "PSP/GAME";
pub const CATEGORY_PREFIX_DEFAULT: &str = "CAT_";
pub const STATE_DIR_DEFAULT: &str = "SEPLUGINS/pkgshelf";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PKGSHELF_CONFIG";
