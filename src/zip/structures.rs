//! Fixed-layout records of the ZIP format.
//!
//! All multi-byte fields are little-endian. Records are parsed from byte
//! slices that the caller has already fetched through a `ReadAt`.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::ZipError;

/// How a member's data is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Unknown(other),
        }
    }
}

impl CompressionMethod {
    pub fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Unknown(code) => code,
        }
    }
}

/// The classic end of central directory record.
#[derive(Debug, Clone, Copy)]
pub struct EndRecord {
    pub entries_on_disk: u16,
    pub entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
    pub comment_len: u16,
}

impl EndRecord {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    /// Length without the trailing comment.
    pub const LEN: usize = 22;

    pub fn parse(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::LEN || !data.starts_with(Self::SIGNATURE) {
            return Err(ZipError::InvalidEocd);
        }
        // Bytes 4..8 hold disk numbers; spanned archives are not read.
        Ok(Self {
            entries_on_disk: LittleEndian::read_u16(&data[8..]),
            entries: LittleEndian::read_u16(&data[10..]),
            directory_size: LittleEndian::read_u32(&data[12..]),
            directory_offset: LittleEndian::read_u32(&data[16..]),
            comment_len: LittleEndian::read_u16(&data[20..]),
        })
    }

    /// Any saturated field means the real value lives in the ZIP64 record.
    pub fn needs_zip64(&self) -> bool {
        self.entries_on_disk == u16::MAX
            || self.entries == u16::MAX
            || self.directory_size == u32::MAX
            || self.directory_offset == u32::MAX
    }
}

/// Points from just before the classic end record to the ZIP64 one.
#[derive(Debug, Clone, Copy)]
pub struct Zip64Locator {
    pub end_record_offset: u64,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const LEN: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::LEN || !data.starts_with(Self::SIGNATURE) {
            return Err(ZipError::InvalidZip64);
        }
        Ok(Self {
            end_record_offset: LittleEndian::read_u64(&data[8..]),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Zip64EndRecord {
    pub entries: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
}

impl Zip64EndRecord {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    /// Fixed part; an extensible data sector may follow.
    pub const LEN: usize = 56;

    pub fn parse(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::LEN || !data.starts_with(Self::SIGNATURE) {
            return Err(ZipError::InvalidZip64);
        }
        Ok(Self {
            entries: LittleEndian::read_u64(&data[32..]),
            directory_size: LittleEndian::read_u64(&data[40..]),
            directory_offset: LittleEndian::read_u64(&data[48..]),
        })
    }
}

/// Where the central directory sits and how many headers it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
}

impl From<&EndRecord> for DirectoryLocation {
    fn from(end: &EndRecord) -> Self {
        Self {
            offset: end.directory_offset.into(),
            size: end.directory_size.into(),
            entries: end.entries.into(),
        }
    }
}

impl From<&Zip64EndRecord> for DirectoryLocation {
    fn from(end: &Zip64EndRecord) -> Self {
        Self {
            offset: end.directory_offset,
            size: end.directory_size,
            entries: end.entries,
        }
    }
}

pub const CENTRAL_HEADER_SIGNATURE: &[u8] = b"PK\x01\x02";
/// Central header length before its name, extra field and comment.
pub const CENTRAL_HEADER_LEN: usize = 46;

pub const LOCAL_HEADER_SIGNATURE: &[u8] = b"PK\x03\x04";
/// Local header length before its name and extra field.
pub const LOCAL_HEADER_LEN: usize = 30;

/// Extra field tag carrying 64-bit sizes and offsets.
pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// General purpose flag bit 0.
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// One member as recorded in the central directory.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    /// Offset of the member's local header
    pub lfh_offset: u64,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}
