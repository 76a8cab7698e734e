//! Locating and decoding ZIP records through a [`ReadAt`].
//!
//! An archive is read from its tail: the end record names the central
//! directory, which lists every member. A member's local header is read
//! only when its data is wanted, so listing never touches member data.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::structures::*;

/// Longest comment the end record can announce.
const MAX_COMMENT_LEN: u64 = u16::MAX as u64;

pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Find the end record and its offset.
    ///
    /// The common comment-less layout costs one small read. Otherwise the
    /// tail that could hold a comment is scanned backwards, and a candidate
    /// is only accepted if its comment runs exactly to the end of the file.
    pub async fn find_end_record(&self) -> Result<(EndRecord, u64), ZipError> {
        let len = EndRecord::LEN as u64;
        if self.size < len {
            return Err(ZipError::NotZip);
        }

        let mut tail = [0u8; EndRecord::LEN];
        self.reader.read_exact_at(self.size - len, &mut tail).await?;
        if tail.starts_with(EndRecord::SIGNATURE) && tail[20..22] == [0, 0] {
            return Ok((EndRecord::parse(&tail)?, self.size - len));
        }

        let window = (MAX_COMMENT_LEN + len).min(self.size);
        let start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(start, &mut buf).await?;

        let last = buf.len() - EndRecord::LEN;
        let found = (0..=last).rev().find(|&i| {
            buf[i..].starts_with(EndRecord::SIGNATURE)
                && LittleEndian::read_u16(&buf[i + 20..]) as usize == last - i
        });
        match found {
            Some(i) => Ok((EndRecord::parse(&buf[i..])?, start + i as u64)),
            None => Err(ZipError::NotZip),
        }
    }

    /// Read the ZIP64 end record via the locator just before `end_offset`.
    async fn read_zip64_end(&self, end_offset: u64) -> Result<Zip64EndRecord, ZipError> {
        let locator_offset = end_offset
            .checked_sub(Zip64Locator::LEN as u64)
            .ok_or(ZipError::InvalidZip64)?;
        let mut buf = [0u8; Zip64Locator::LEN];
        self.reader.read_exact_at(locator_offset, &mut buf).await?;
        let locator = Zip64Locator::parse(&buf)?;

        let mut buf = [0u8; Zip64EndRecord::LEN];
        self.reader
            .read_exact_at(locator.end_record_offset, &mut buf)
            .await
            .map_err(|_| ZipError::InvalidZip64)?;
        Zip64EndRecord::parse(&buf)
    }

    /// Where the central directory is, checked to lie before the end record.
    pub async fn locate_directory(&self) -> Result<DirectoryLocation, ZipError> {
        let (end, end_offset) = self.find_end_record().await?;
        let location = if end.needs_zip64() {
            DirectoryLocation::from(&self.read_zip64_end(end_offset).await?)
        } else {
            DirectoryLocation::from(&end)
        };

        match location.offset.checked_add(location.size) {
            Some(dir_end) if dir_end <= end_offset => Ok(location),
            _ => Err(ZipError::InvalidEocd),
        }
    }

    /// Every member, in the order the archive stores them.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>, ZipError> {
        let location = self.locate_directory().await?;

        let mut directory = vec![0u8; location.size as usize];
        self.reader
            .read_exact_at(location.offset, &mut directory)
            .await?;

        // A bogus entry count must not drive the allocation.
        let capacity = (location.entries as usize).min(directory.len() / CENTRAL_HEADER_LEN);
        let mut entries = Vec::with_capacity(capacity);
        let mut rest = directory.as_slice();
        for _ in 0..location.entries {
            let (entry, used) = parse_central_header(rest)?;
            entries.push(entry);
            rest = &rest[used..];
        }
        Ok(entries)
    }

    /// Offset of the first byte of `entry`'s data.
    ///
    /// Name and extra field lengths in the local header may differ from the
    /// central directory's, so the local header has to be read.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64, ZipError> {
        let invalid = || ZipError::InvalidLocalHeader(entry.file_name.clone());

        let mut header = [0u8; LOCAL_HEADER_LEN];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut header)
            .await
            .map_err(|_| invalid())?;
        if !header.starts_with(LOCAL_HEADER_SIGNATURE) {
            return Err(invalid());
        }

        let name_len = u64::from(LittleEndian::read_u16(&header[26..]));
        let extra_len = u64::from(LittleEndian::read_u16(&header[28..]));
        let offset = entry.lfh_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len;

        match offset.checked_add(entry.compressed_size) {
            Some(data_end) if data_end <= self.size => Ok(offset),
            _ => Err(invalid()),
        }
    }
}

/// Decode the central header at the start of `data`; also returns how many
/// bytes it spans.
fn parse_central_header(data: &[u8]) -> Result<(ZipFileEntry, usize), ZipError> {
    if data.len() < CENTRAL_HEADER_LEN || !data.starts_with(CENTRAL_HEADER_SIGNATURE) {
        return Err(ZipError::InvalidCentralHeader);
    }

    let field16 = |at: usize| LittleEndian::read_u16(&data[at..]);
    let field32 = |at: usize| LittleEndian::read_u32(&data[at..]);

    let name_len = field16(28) as usize;
    let extra_len = field16(30) as usize;
    let comment_len = field16(32) as usize;
    let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
    if data.len() < total {
        return Err(ZipError::InvalidCentralHeader);
    }

    let name_end = CENTRAL_HEADER_LEN + name_len;
    // Non-UTF-8 names are kept lossily; they only ever become task names.
    let file_name = String::from_utf8_lossy(&data[CENTRAL_HEADER_LEN..name_end]).into_owned();

    let mut entry = ZipFileEntry {
        is_directory: file_name.ends_with('/'),
        file_name,
        flags: field16(8),
        compression_method: CompressionMethod::from(field16(10)),
        crc32: field32(16),
        compressed_size: field32(20).into(),
        uncompressed_size: field32(24).into(),
        lfh_offset: field32(42).into(),
    };
    apply_zip64_extra(&mut entry, &data[name_end..name_end + extra_len]);

    Ok((entry, total))
}

/// Replace saturated sizes and offset with their 64-bit values. They appear
/// in the ZIP64 extra field in a fixed order, and only when saturated.
fn apply_zip64_extra(entry: &mut ZipFileEntry, mut extra: &[u8]) {
    while extra.len() >= 4 {
        let tag = LittleEndian::read_u16(extra);
        let len = (LittleEndian::read_u16(&extra[2..]) as usize).min(extra.len() - 4);
        let mut body = &extra[4..4 + len];
        extra = &extra[4 + len..];
        if tag != ZIP64_EXTRA_TAG {
            continue;
        }

        let fields = [
            &mut entry.uncompressed_size,
            &mut entry.compressed_size,
            &mut entry.lfh_offset,
        ];
        for field in fields {
            if *field == u64::from(u32::MAX) && body.len() >= 8 {
                *field = LittleEndian::read_u64(body);
                body = &body[8..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central_header(name: &str, extra: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; CENTRAL_HEADER_LEN];
        data[..4].copy_from_slice(CENTRAL_HEADER_SIGNATURE);
        LittleEndian::write_u16(&mut data[10..], 8);
        LittleEndian::write_u32(&mut data[16..], 0xDEAD_BEEF);
        LittleEndian::write_u32(&mut data[20..], 10);
        LittleEndian::write_u32(&mut data[24..], u32::MAX);
        LittleEndian::write_u16(&mut data[28..], name.len() as u16);
        LittleEndian::write_u16(&mut data[30..], extra.len() as u16);
        LittleEndian::write_u32(&mut data[42..], 7);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(extra);
        data
    }

    #[test]
    fn central_header_with_zip64_size() {
        let mut extra = vec![0x01, 0x00, 8, 0];
        extra.extend_from_slice(&(5u64 << 32).to_le_bytes());
        let data = central_header("big.bin", &extra);

        let (entry, used) = parse_central_header(&data).unwrap();

        assert_eq!(used, data.len());
        assert_eq!(entry.file_name, "big.bin");
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert_eq!(entry.crc32, 0xDEAD_BEEF);
        assert_eq!(entry.uncompressed_size, 5u64 << 32);
        assert_eq!(entry.compressed_size, 10);
        assert_eq!(entry.lfh_offset, 7);
        assert!(!entry.is_directory);
    }

    #[test]
    fn truncated_central_header_is_invalid() {
        let data = central_header("name.txt", &[]);
        assert!(matches!(
            parse_central_header(&data[..data.len() - 1]),
            Err(ZipError::InvalidCentralHeader)
        ));
        assert!(matches!(
            parse_central_header(&data[..20]),
            Err(ZipError::InvalidCentralHeader)
        ));
    }
}
