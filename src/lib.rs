//! # dirdrop
//!
//! A work queue kept in a directory tree, and a CLI that drains it into an
//! HTTP endpoint.
//!
//! Work items are files, or zip archives of files, under `todo`. A worker
//! claims an item by renaming it into `doing`, hands its content to the
//! consumer, and then renames it into `done`, or back into `todo` if the
//! consumer pushed it back. Because a claim is one atomic rename, several
//! workers can drain the same tree at once with no lock files or
//! coordinator. Zip archives are expanded lazily into one task per member.
//!
//! ## Example
//!
//! ```no_run
//! use dirdrop::{DirQueue, Disposition, QueueRoot};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut queue = DirQueue::new(QueueRoot::new("/var/spool/drop"));
//!
//!     while let Some(mut task) = queue.next_task().await? {
//!         let content = task.read_all().await?;
//!         println!("{}: {} bytes", task.name(), content.len());
//!         queue.settle(Disposition::Completed).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod poster;
pub mod queue;
pub mod zip;

pub use cli::Cli;
pub use error::{QueueError, Result, ZipError};
pub use io::{LocalFileReader, ReadAt};
pub use poster::{BodySource, DeliveryError, Poster};
pub use queue::{DirQueue, Disposition, PushBackPolicy, QueueRoot, QueueStats, Stage, Task};
pub use zip::{ArchiveMembers, MemberReader, ZipArchive, ZipFileEntry};
