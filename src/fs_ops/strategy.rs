//! Ordered fallback strategies per operation scenario.

use serde::Serialize;
use std::fmt;

use super::space::Mode;
use crate::errors::OpError;

/// One way of carrying out an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    /// Device-level intra-volume move
    Relocate,
    /// Plain rename of the whole entry
    Rename,
    /// Rename each child, copying only children whose rename fails
    ChildRename,
    /// Buffered copy, then delete the source
    CopyDelete,
    /// Buffered copy only
    Copy,
    /// Recursive delete
    Delete,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Relocate => "relocate",
            Tier::Rename => "rename",
            Tier::ChildRename => "child-rename",
            Tier::CopyDelete => "copy+delete",
            Tier::Copy => "copy",
            Tier::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Outcome of a failed tier.
#[derive(Debug)]
pub(crate) enum TierError {
    /// Preconditions not met; try the next tier.
    NotApplicable,
    /// Tier failed without side effects that block the next one.
    Retryable(anyhow::Error),
    /// Stop the chain.
    Fatal(OpError),
}

const MOVE_SAME_FILE: &[Tier] = &[Tier::Relocate, Tier::Rename, Tier::CopyDelete];
const MOVE_SAME_DIR: &[Tier] = &[Tier::Relocate, Tier::Rename, Tier::ChildRename, Tier::CopyDelete];
const MOVE_CROSS: &[Tier] = &[Tier::CopyDelete];
const COPY: &[Tier] = &[Tier::Copy];
const DELETE: &[Tier] = &[Tier::Delete];

/// Tiers to attempt, in order.
pub fn chain(mode: Mode, same_volume: bool, is_dir: bool) -> &'static [Tier] {
    match (mode, same_volume, is_dir) {
        (Mode::Move, true, false) => MOVE_SAME_FILE,
        (Mode::Move, true, true) => MOVE_SAME_DIR,
        (Mode::Move, false, _) => MOVE_CROSS,
        (Mode::Copy, _, _) => COPY,
        (Mode::Delete, _, _) => DELETE,
    }
}
