//! Collision-free working directory selection.
//!
//! [`allocate`] only inspects the filesystem. The existence check and the
//! later `create_dir_all` by the caller are not atomic: two callers racing on
//! the same candidate can receive the same path. Callers that need a private
//! directory must tolerate that window.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};

/// Highest numeric suffix tried before giving up.
pub const ALLOCATION_BOUND: u32 = 10_000;

/// Return `candidate` if it does not exist, otherwise the first free
/// `candidate_<i>` for `i` in `1..ALLOCATION_BOUND`.
pub fn allocate(candidate: &Path) -> Result<PathBuf> {
    allocate_within(candidate, ALLOCATION_BOUND)
}

pub fn allocate_within(candidate: &Path, bound: u32) -> Result<PathBuf> {
    if !candidate.exists() {
        return Ok(candidate.to_path_buf());
    }

    for i in 1..bound {
        let suffixed = suffixed(candidate, i);
        if !suffixed.exists() {
            return Ok(suffixed);
        }
    }

    Err(LaunchError::DirectoryAllocationExhausted {
        candidate: candidate.to_path_buf(),
        bound,
    })
}

fn suffixed(candidate: &Path, i: u32) -> PathBuf {
    // Re-collecting drops a trailing separator.
    let normalized: PathBuf = candidate.components().collect();
    let mut raw: OsString = normalized.into_os_string();
    raw.push(format!("_{}", i));
    PathBuf::from(raw)
}
