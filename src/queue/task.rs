use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{QueueError, Result};
use crate::io::LocalFileReader;
use crate::zip::MemberReader;

/// What the consumer decided about a task it was handed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; the entry may move on to `done`.
    #[default]
    Completed,
    /// Not processed; the whole entry goes back to `todo`.
    PushBack,
}

/// One named piece of content taken from a claimed entry.
///
/// Plain files give one task named after their relative path. Archives give
/// one task per file member, named `<archive path>/<member path>`.
///
/// The task owns its stream, so the file or archive handle stays open for as
/// long as the consumer holds the task, even after the queue has moved on to
/// settle it. Drop the task to release it. A failed read marks the task, and
/// the queue will then refuse to settle its entry.
pub struct Task {
    name: String,
    entry: PathBuf,
    content: Content,
    failed: Arc<AtomicBool>,
}

enum Content {
    File(File),
    Member(MemberReader<LocalFileReader>),
}

impl Task {
    pub(crate) fn from_file(name: String, entry: PathBuf, file: File) -> Self {
        Self {
            name,
            entry,
            content: Content::File(file),
            failed: Arc::default(),
        }
    }

    pub(crate) fn from_member(
        name: String,
        entry: PathBuf,
        member: MemberReader<LocalFileReader>,
    ) -> Self {
        Self {
            name,
            entry,
            content: Content::Member(member),
            failed: Arc::default(),
        }
    }

    /// Shared flag raised when a read of this task fails.
    pub(crate) fn failure_flag(&self) -> Arc<AtomicBool> {
        self.failed.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative path of the claimed entry this task came from.
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Read up to `buf.len()` bytes of content; `Ok(0)` at the end.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = match &mut self.content {
            Content::File(file) => file.read(buf).await.map_err(|source| QueueError::Read {
                name: self.name.clone(),
                source,
            }),
            Content::Member(member) => {
                member
                    .read(buf)
                    .await
                    .map_err(|source| QueueError::Archive {
                        name: self.name.clone(),
                        source,
                    })
            }
        };
        self.note(result)
    }

    /// Append the remaining content to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let result = match &mut self.content {
            Content::File(file) => {
                file.read_to_end(out)
                    .await
                    .map_err(|source| QueueError::Read {
                        name: self.name.clone(),
                        source,
                    })
            }
            Content::Member(member) => {
                member
                    .read_to_end(out)
                    .await
                    .map_err(|source| QueueError::Archive {
                        name: self.name.clone(),
                        source,
                    })
            }
        };
        self.note(result)
    }

    fn note<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failed.store(true, Ordering::Release);
        }
        result
    }

    /// The remaining content as one buffer.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).await?;
        Ok(out)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}
