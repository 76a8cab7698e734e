//! ZIP archive reading.
//!
//! - [`structures`]: records of the ZIP format (end records, entries)
//! - [`parser`]: locating and parsing those records through a [`ReadAt`](crate::io::ReadAt)
//! - [`member`]: streaming, integrity-checked reads of one member
//! - [`archive`]: the archive handle and its lazy member sequence
//!
//! Supported: standard ZIP and ZIP64 end records, STORED and DEFLATE
//! members. Not supported: encryption, multi-disk archives, other
//! compression methods; these are reported as errors.

mod archive;
mod member;
mod parser;
mod structures;

pub use archive::{ArchiveMembers, ZipArchive};
pub use member::MemberReader;
pub use parser::ZipParser;
pub use structures::*;
