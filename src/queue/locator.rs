//! Picks the next candidate under `todo`.
//!
//! The walk is depth-first. Inside each directory, names are visited in
//! byte order and the directory's own files are preferred over descending
//! into its subdirectories. Without concurrent changes, the same tree always
//! gives the same candidate.

use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{QueueError, Result};

use super::layout::{QueueRoot, Stage};

/// Relative path of some file under `todo`, or `None` when `todo` is empty
/// or missing.
pub async fn find_candidate(root: &QueueRoot) -> Result<Option<PathBuf>> {
    find_candidate_excluding(root, &HashSet::new()).await
}

/// Like [`find_candidate`], ignoring the relative paths in `skip`.
pub async fn find_candidate_excluding(
    root: &QueueRoot,
    skip: &HashSet<PathBuf>,
) -> Result<Option<PathBuf>> {
    let todo = root.stage_dir(Stage::Todo);
    let mut pending = vec![PathBuf::new()];

    while let Some(dir) = pending.pop() {
        let Some(listing) = list_dir(&todo.join(&dir)).await? else {
            continue;
        };

        let mut subdirs = Vec::new();
        for (name, is_dir) in listing {
            let relative = dir.join(name);
            if is_dir {
                subdirs.push(relative);
            } else if !skip.contains(&relative) {
                return Ok(Some(relative));
            }
        }
        // Reversed so the smallest name is popped first.
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(None)
}

/// Sorted `(name, is_dir)` pairs, or `None` if the directory is gone.
async fn list_dir(dir: &Path) -> Result<Option<Vec<(OsString, bool)>>> {
    let scan_error = |source: io::Error| QueueError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(scan_error(e)),
    };

    let mut listing = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(scan_error)? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            // Claimed by someone else since the directory was read.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(scan_error(e)),
        };
        listing.push((entry.file_name(), file_type.is_dir()));
    }
    listing.sort();

    Ok(Some(listing))
}
