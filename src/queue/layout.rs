use std::fmt;
use std::path::{Path, PathBuf};

/// The three subtrees of a queue root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Waiting to be claimed
    Todo,
    /// Claimed by some worker
    Doing,
    /// Finished
    Done,
}

impl Stage {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Todo => "todo",
            Stage::Doing => "doing",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A queue root directory holding `todo`, `doing` and `done`.
///
/// Only `todo` is ever expected to exist up front; the others are created
/// on demand.
#[derive(Debug, Clone)]
pub struct QueueRoot {
    root: PathBuf,
}

impl QueueRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    /// Where an entry with relative path `relative` lives in `stage`.
    pub fn path(&self, stage: Stage, relative: &Path) -> PathBuf {
        self.stage_dir(stage).join(relative)
    }
}

/// Task name for an entry: its relative path with `/` separators.
pub(crate) fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether an entry is a zip archive to be expanded member by member.
pub(crate) fn is_archive(relative: &Path) -> bool {
    relative
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_keep_the_relative_part_across_stages() {
        let root = QueueRoot::new("/data/q");
        let rel = Path::new("a/hello.txt");
        assert_eq!(root.path(Stage::Todo, rel), Path::new("/data/q/todo/a/hello.txt"));
        assert_eq!(root.path(Stage::Doing, rel), Path::new("/data/q/doing/a/hello.txt"));
        assert_eq!(root.path(Stage::Done, rel), Path::new("/data/q/done/a/hello.txt"));
    }

    #[test]
    fn entry_names_use_forward_slashes() {
        let rel: PathBuf = ["b", "ar000001.zip"].iter().collect();
        assert_eq!(entry_name(&rel), "b/ar000001.zip");
        assert_eq!(entry_name(Path::new("florg.txt")), "florg.txt");
    }

    #[test]
    fn archive_suffix_ignores_case() {
        assert!(is_archive(Path::new("batch.zip")));
        assert!(is_archive(Path::new("x/BATCH.ZIP")));
        assert!(!is_archive(Path::new("batch.zip.txt")));
        assert!(!is_archive(Path::new("zip")));
    }
}
