//! Claiming and finalizing entries by atomic rename.
//!
//! Every move refuses to replace an existing destination. A claim whose
//! source has already gone is the one failure that is not an error: some
//! other worker got there first.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};

use super::layout::{QueueRoot, Stage, entry_name};
use super::locator::find_candidate_excluding;

/// An entry this worker has moved into `doing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    relative: PathBuf,
}

impl ClaimedEntry {
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// The entry's task name.
    pub fn name(&self) -> String {
        entry_name(&self.relative)
    }

    /// Move the entry to `done`, creating parent directories as needed.
    pub async fn complete(self, root: &QueueRoot) -> Result<()> {
        self.finalize(root, Stage::Done).await?;
        info!(entry = %self.relative.display(), "done");
        Ok(())
    }

    /// Move the entry back to its original place in `todo`.
    pub async fn push_back(self, root: &QueueRoot) -> Result<()> {
        self.finalize(root, Stage::Todo).await?;
        warn!(entry = %self.relative.display(), "pushed back to todo");
        Ok(())
    }

    async fn finalize(&self, root: &QueueRoot, stage: Stage) -> Result<()> {
        let finalize_error = |source| QueueError::Finalize {
            path: self.relative.clone(),
            stage,
            source,
        };

        let to = root.path(stage, &self.relative);
        // `todo` parents existed before the claim, but an operator may have
        // tidied empty directories away in the meantime.
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await.map_err(finalize_error)?;
        }
        move_noreplace(root.path(Stage::Doing, &self.relative), to)
            .await
            .map_err(finalize_error)
    }
}

/// Claim `relative` by renaming it from `todo` into `doing`.
///
/// Returns `Ok(None)` when the source no longer exists.
pub async fn claim(root: &QueueRoot, relative: &Path) -> Result<Option<ClaimedEntry>> {
    let claim_error = |source| QueueError::Claim {
        path: relative.to_path_buf(),
        source,
    };

    let to = root.path(Stage::Doing, relative);
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await.map_err(claim_error)?;
    }

    match move_noreplace(root.path(Stage::Todo, relative), to).await {
        Ok(()) => {
            debug!(entry = %relative.display(), "claimed");
            Ok(Some(ClaimedEntry {
                relative: relative.to_path_buf(),
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(entry = %relative.display(), "claimed by another worker");
            Ok(None)
        }
        Err(e) => Err(claim_error(e)),
    }
}

/// Locate and claim entries until one claim succeeds.
///
/// Returns `Ok(None)` once nothing outside `skip` is left in `todo`.
pub async fn claim_next(
    root: &QueueRoot,
    skip: &HashSet<PathBuf>,
) -> Result<Option<ClaimedEntry>> {
    while let Some(candidate) = find_candidate_excluding(root, skip).await? {
        if let Some(entry) = claim(root, &candidate).await? {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

async fn move_noreplace(from: PathBuf, to: PathBuf) -> io::Result<()> {
    tokio::task::spawn_blocking(move || rename_noreplace(&from, &to))
        .await
        .map_err(io::Error::other)?
}

/// Rename `from` to `to`, failing with `AlreadyExists` if `to` exists.
#[cfg(target_os = "linux")]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_from = CString::new(from.as_os_str().as_bytes())?;
    let c_to = CString::new(to.as_os_str().as_bytes())?;

    // SAFETY: both pointers come from live NUL-terminated CStrings.
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            c_from.as_ptr(),
            libc::AT_FDCWD,
            c_to.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Kernel or filesystem without RENAME_NOREPLACE.
        Some(libc::EINVAL) | Some(libc::ENOSYS) => rename_checked(from, to),
        _ => Err(err),
    }
}

#[cfg(not(target_os = "linux"))]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    rename_checked(from, to)
}

/// Existence check followed by a plain rename. Only guards against stale
/// leftovers, not against a concurrent writer of the same destination.
fn rename_checked(from: &Path, to: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("'{}' already exists", to.display()),
        ));
    }
    std::fs::rename(from, to)
}
