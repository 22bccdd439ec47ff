//! Platform-specific helpers.
//! This module hides OS differences (Unix/Windows) behind a uniform API so
//! the rest of the codebase can remain platform-agnostic.

mod device;
mod temp;

#[cfg(unix)]
mod common_unix;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod windows;

pub use device::{Device, LocalDevice};
pub use temp::tmp_sibling_name;

#[cfg(unix)]
pub use unix::{
    capacity_bytes, device_id, lower_thread_priority, open_log_file_secure_append,
    set_dir_mode_0700, write_atomic, write_secure_atomic,
};

#[cfg(not(unix))]
pub use windows::{
    capacity_bytes, device_id, lower_thread_priority, open_log_file_secure_append,
    set_dir_mode_0700, write_atomic, write_secure_atomic,
};
