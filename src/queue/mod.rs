//! A work queue stored as a `todo` / `doing` / `done` directory tree.
//!
//! An entry (a file, or a zip archive of files) is claimed by renaming it
//! from `todo` into `doing`. Once every task derived from it has been
//! settled it is renamed into `done`, or back into `todo` if any task was
//! pushed back. Renames are atomic, so any number of processes may drain the
//! same tree without further coordination.
//!
//! [`DirQueue`] hands out one [`Task`] at a time and waits for the consumer
//! to [`settle`](DirQueue::settle) it. There is no timeout: a consumer that
//! never comes back stalls the queue, and an entry whose process dies while
//! it is claimed stays in `doing`.

mod claim;
mod layout;
mod locator;
mod task;

pub use claim::{ClaimedEntry, claim, claim_next};
pub use layout::{QueueRoot, Stage};
pub use locator::{find_candidate, find_candidate_excluding};
pub use task::{Disposition, Task};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error};

use crate::error::{QueueError, Result};
use crate::io::LocalFileReader;
use crate::zip::{ArchiveMembers, ZipArchive};

use layout::is_archive;

/// What happens to the rest of a run after a task is pushed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushBackPolicy {
    /// Requeue the entry and go on with the next one.
    #[default]
    Continue,
    /// Requeue the entry and end the run.
    Stop,
}

/// Counters for one queue instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries claimed from `todo`
    pub claimed: u64,
    /// Tasks handed to the consumer
    pub tasks: u64,
    /// Entries moved to `done`
    pub done: u64,
    /// Entries moved back to `todo`
    pub pushed_back: u64,
}

/// The claimed entry currently being worked through.
struct InFlight {
    entry: ClaimedEntry,
    source: Source,
    /// A task has been handed out and not settled yet.
    awaiting: bool,
    /// Name and read-failure flag of the task last handed out.
    last_task: Option<(String, Arc<AtomicBool>)>,
}

enum Source {
    File { handed_out: bool },
    Archive(ArchiveMembers<LocalFileReader>),
}

impl InFlight {
    fn has_more(&self) -> bool {
        match &self.source {
            Source::File { handed_out } => !handed_out,
            Source::Archive(members) => members.has_more(),
        }
    }
}

/// Single-pass producer of tasks over a queue root.
///
/// Once [`next_task`](Self::next_task) has returned `None` the queue stays
/// exhausted; start a new `DirQueue` to look again.
pub struct DirQueue {
    root: QueueRoot,
    policy: PushBackPolicy,
    /// Entries pushed back during this run, not to be claimed again by it.
    deferred: HashSet<PathBuf>,
    current: Option<InFlight>,
    exhausted: bool,
    stats: QueueStats,
}

impl DirQueue {
    pub fn new(root: QueueRoot) -> Self {
        Self {
            root,
            policy: PushBackPolicy::default(),
            deferred: HashSet::new(),
            current: None,
            exhausted: false,
            stats: QueueStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: PushBackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &QueueRoot {
        &self.root
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Hand out the next task, claiming a new entry when the current one
    /// has nothing more to give.
    ///
    /// A task still waiting for a disposition is settled as
    /// [`Disposition::Completed`] first. Any error ends the run: the entry in
    /// flight is left in `doing` and later calls return `None`.
    pub async fn next_task(&mut self) -> Result<Option<Task>> {
        let result = self.advance().await;
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Report the consumer's decision about the task last handed out.
    ///
    /// A push-back requeues the whole entry at once, skipping any archive
    /// members not yet handed out. An entry with nothing left to hand out is
    /// finalized here rather than on the next call to `next_task`. A failed
    /// move ends the run like any error from `next_task`.
    pub async fn settle(&mut self, disposition: Disposition) -> Result<()> {
        let Some(flight) = self.current.as_mut().filter(|flight| flight.awaiting) else {
            return Err(QueueError::NothingToSettle);
        };
        flight.awaiting = false;
        if let Some((name, _)) = flight
            .last_task
            .take()
            .filter(|(_, failed)| failed.load(Ordering::Acquire))
        {
            self.abort();
            return Err(QueueError::TaskFailed { name });
        }
        let has_more = flight.has_more();

        let result = match disposition {
            Disposition::Completed if has_more => Ok(()),
            Disposition::Completed => self.finish(Disposition::Completed).await,
            Disposition::PushBack => self.finish(Disposition::PushBack).await,
        };
        if result.is_err() {
            self.abort();
        } else if disposition == Disposition::PushBack && self.policy == PushBackPolicy::Stop {
            debug!("stopping after push-back");
            self.exhausted = true;
        }
        result
    }

    /// Run the whole queue through `handler`.
    pub async fn drain<F>(&mut self, mut handler: F) -> Result<QueueStats>
    where
        F: AsyncFnMut(Task) -> Result<Disposition>,
    {
        while let Some(task) = self.next_task().await? {
            let disposition = handler(task).await?;
            self.settle(disposition).await?;
        }
        Ok(self.stats)
    }

    async fn advance(&mut self) -> Result<Option<Task>> {
        if self.current.as_ref().is_some_and(|flight| flight.awaiting) {
            self.settle(Disposition::Completed).await?;
        }

        loop {
            if self.exhausted {
                return Ok(None);
            }
            if let Some(task) = self.next_from_current().await? {
                return Ok(Some(task));
            }

            let Some(entry) = claim_next(&self.root, &self.deferred).await? else {
                debug!(root = %self.root.root().display(), "todo is drained");
                self.exhausted = true;
                return Ok(None);
            };
            self.stats.claimed += 1;
            let relative = entry.relative_path().to_path_buf();
            match self.start(entry).await {
                Ok(flight) => self.current = Some(flight),
                Err(e) => {
                    error!(entry = %relative.display(), "cannot expand; left in doing");
                    return Err(e);
                }
            }
        }
    }

    /// Enter the terminal state after an error. Whatever is in flight stays
    /// in `doing` for an operator to look at.
    fn abort(&mut self) {
        if let Some(flight) = self.current.take() {
            error!(entry = %flight.entry.relative_path().display(), "run aborted; entry left in doing");
        }
        self.exhausted = true;
    }

    async fn start(&self, entry: ClaimedEntry) -> Result<InFlight> {
        let source = if is_archive(entry.relative_path()) {
            let path = self.root.path(Stage::Doing, entry.relative_path());
            let reader = LocalFileReader::open(&path).map_err(|source| QueueError::Read {
                name: entry.name(),
                source,
            })?;
            let archive = ZipArchive::open(Arc::new(reader))
                .await
                .map_err(|source| QueueError::Archive {
                    name: entry.name(),
                    source,
                })?;
            debug!(entry = %entry.name(), members = archive.entries().len(), "expanding archive");
            Source::Archive(archive.into_members())
        } else {
            Source::File { handed_out: false }
        };

        Ok(InFlight {
            entry,
            source,
            awaiting: false,
            last_task: None,
        })
    }

    /// Next task from the entry in flight. When it has none left the entry
    /// is finalized and `None` returned.
    async fn next_from_current(&mut self) -> Result<Option<Task>> {
        let Some(flight) = self.current.as_mut() else {
            return Ok(None);
        };
        let entry_name = flight.entry.name();
        let relative = flight.entry.relative_path().to_path_buf();

        let task = match &mut flight.source {
            Source::File { handed_out: true } => None,
            Source::File { handed_out } => {
                let path = self.root.path(Stage::Doing, &relative);
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|source| QueueError::Read {
                        name: entry_name.clone(),
                        source,
                    })?;
                *handed_out = true;
                Some(Task::from_file(entry_name, relative, file))
            }
            Source::Archive(members) => members
                .next_member()
                .await
                .map_err(|source| QueueError::Archive {
                    name: entry_name.clone(),
                    source,
                })?
                .map(|member| {
                    let name = format!("{}/{}", entry_name, member.name());
                    Task::from_member(name, relative, member)
                }),
        };

        match task {
            Some(task) => {
                flight.awaiting = true;
                flight.last_task = Some((task.name().to_string(), task.failure_flag()));
                self.stats.tasks += 1;
                Ok(Some(task))
            }
            None => {
                self.finish(Disposition::Completed).await?;
                Ok(None)
            }
        }
    }

    /// Finalize the entry in flight according to `disposition`.
    async fn finish(&mut self, disposition: Disposition) -> Result<()> {
        let Some(InFlight { entry, source, .. }) = self.current.take() else {
            return Ok(());
        };
        // Release our archive handle before the file moves.
        drop(source);

        match disposition {
            Disposition::Completed => {
                entry.complete(&self.root).await?;
                self.stats.done += 1;
            }
            Disposition::PushBack => {
                let relative = entry.relative_path().to_path_buf();
                entry.push_back(&self.root).await?;
                self.deferred.insert(relative);
                self.stats.pushed_back += 1;
            }
        }
        Ok(())
    }
}
