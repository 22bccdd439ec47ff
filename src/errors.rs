//! Typed error definitions for pkgshelf.
//! Provides a small set of well-known failure modes for better logs and tests.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Unknown volume: {0}")]
    UnknownVolume(String),

    #[error("Path is not inside any configured volume: {0}")]
    OutsideVolumes(PathBuf),

    #[error("Insufficient space on volume {volume}: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u64,
        available: u64,
        volume: String,
    },

    #[error("Critical file could not be verified at destination: {0}")]
    GuardFailure(PathBuf),

    #[error("Files still missing after {passes} repair passes under {dest}")]
    RepairExhausted { dest: PathBuf, passes: u32 },

    #[error("Malformed scheme record: {0}")]
    MalformedSchemeRecord(String),

    #[error("Not a catalog entry: {0}")]
    NotAnEntry(PathBuf),

    #[error("Not a plain folder name: {0:?}")]
    InvalidName(String),
}

impl ShelfError {
    /// Stable numeric code for structured logs.
    pub fn code(&self) -> u16 {
        match self {
            ShelfError::UnknownVolume(_) => 10,
            ShelfError::OutsideVolumes(_) => 11,
            ShelfError::InsufficientSpace { .. } => 20,
            ShelfError::GuardFailure(_) => 30,
            ShelfError::RepairExhausted { .. } => 31,
            ShelfError::MalformedSchemeRecord(_) => 40,
            ShelfError::NotAnEntry(_) => 50,
            ShelfError::InvalidName(_) => 51,
        }
    }
}

/// Failure returned by a single file-operation engine call.
///
/// `Guard` is kept distinct from `Failed` so callers can never fold an
/// unverifiable critical file into a generic error count.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("guard failure: {0}")]
    Guard(#[source] ShelfError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl OpError {
    pub fn guard(path: impl Into<PathBuf>) -> Self {
        OpError::Guard(ShelfError::GuardFailure(path.into()))
    }

    pub fn is_guard(&self) -> bool {
        matches!(self, OpError::Guard(_))
    }
}
