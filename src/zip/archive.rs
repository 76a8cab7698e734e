use std::sync::Arc;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::member::MemberReader;
use super::parser::ZipParser;
use super::structures::ZipFileEntry;

/// An opened ZIP archive.
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<ZipFileEntry>,
}

impl<R: ReadAt> ZipArchive<R> {
    /// Read the central directory. Member data is left untouched.
    pub async fn open(reader: Arc<R>) -> Result<Self, ZipError> {
        let parser = ZipParser::new(reader);
        let entries = parser.list_files().await?;
        Ok(Self { parser, entries })
    }

    /// All entries, directories included, in stored order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// Open a member for streaming.
    pub async fn open_member(&self, entry: &ZipFileEntry) -> Result<MemberReader<R>, ZipError> {
        if entry.is_encrypted() {
            return Err(ZipError::Encrypted(entry.file_name.clone()));
        }
        let data_offset = self.parser.data_offset(entry).await?;
        MemberReader::new(self.parser.reader().clone(), entry, data_offset)
    }

    /// Turn the archive into a lazy sequence over its file members.
    pub fn into_members(self) -> ArchiveMembers<R> {
        ArchiveMembers {
            archive: self,
            next: 0,
        }
    }
}

/// Lazy, single-pass sequence of an archive's file members.
///
/// Directory entries are skipped. Each member is opened only when the
/// sequence reaches it. Dropping the sequence releases this side's handle on
/// the archive; readers already handed out keep their own.
pub struct ArchiveMembers<R: ReadAt> {
    archive: ZipArchive<R>,
    next: usize,
}

impl<R: ReadAt> ArchiveMembers<R> {
    /// Open the next file member, or `None` once every member has been
    /// handed out.
    pub async fn next_member(&mut self) -> Result<Option<MemberReader<R>>, ZipError> {
        while let Some(entry) = self.archive.entries.get(self.next) {
            self.next += 1;
            if entry.is_directory {
                continue;
            }
            return self.archive.open_member(entry).await.map(Some);
        }
        Ok(None)
    }

    /// Whether any file member is still to come.
    pub fn has_more(&self) -> bool {
        self.archive.entries[self.next..]
            .iter()
            .any(|entry| !entry.is_directory)
    }
}
