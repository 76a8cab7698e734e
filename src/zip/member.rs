//! Streaming reader for a single archive member.

use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::sync::Arc;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::structures::{CompressionMethod, ZipFileEntry};

/// Compressed bytes fetched per positional read when inflating.
const INPUT_CHUNK: usize = 32 * 1024;

/// Reads one member's decompressed bytes on demand.
///
/// Only the compressed bytes needed to fill the caller's buffer are fetched.
/// Once the member's data has been fully produced its CRC-32 and size are
/// checked against the central directory; a mismatch is an error on that
/// final read.
pub struct MemberReader<R: ReadAt> {
    reader: Arc<R>,
    name: String,
    /// Offset of the next compressed byte to fetch
    position: u64,
    compressed_left: u64,
    /// `None` for STORED members
    inflate: Option<Decompress>,
    input: Vec<u8>,
    input_pos: usize,
    crc: Crc,
    produced: u64,
    expected_crc: u32,
    expected_size: u64,
    finished: bool,
}

impl<R: ReadAt> MemberReader<R> {
    pub(crate) fn new(
        reader: Arc<R>,
        entry: &ZipFileEntry,
        data_offset: u64,
    ) -> Result<Self, ZipError> {
        let inflate = match entry.compression_method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(Decompress::new(false)),
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnsupportedCompression {
                    name: entry.file_name.clone(),
                    method,
                });
            }
        };

        Ok(Self {
            reader,
            name: entry.file_name.clone(),
            position: data_offset,
            compressed_left: entry.compressed_size,
            inflate,
            input: Vec::new(),
            input_pos: 0,
            crc: Crc::new(),
            produced: 0,
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            finished: false,
        })
    }

    /// Member path inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read up to `buf.len()` decompressed bytes. `Ok(0)` means the member
    /// is exhausted and has passed its integrity check.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ZipError> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        if self.inflate.is_some() {
            self.read_deflated(buf).await
        } else {
            self.read_stored(buf).await
        }
    }

    /// Append the rest of the member to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, ZipError> {
        let start = out.len();
        let mut chunk = vec![0u8; 8 * 1024];
        loop {
            match self.read(&mut chunk).await? {
                0 => return Ok(out.len() - start),
                n => out.extend_from_slice(&chunk[..n]),
            }
        }
    }

    async fn read_stored(&mut self, buf: &mut [u8]) -> Result<usize, ZipError> {
        if self.compressed_left == 0 {
            self.finish()?;
            return Ok(0);
        }

        let want = (buf.len() as u64).min(self.compressed_left) as usize;
        let n = self.reader.read_at(self.position, &mut buf[..want]).await?;
        if n == 0 {
            return Err(self.corrupt("archive ends inside member data"));
        }

        self.position += n as u64;
        self.compressed_left -= n as u64;
        self.account(&buf[..n])?;
        if self.compressed_left == 0 {
            self.finish()?;
        }
        Ok(n)
    }

    async fn read_deflated(&mut self, buf: &mut [u8]) -> Result<usize, ZipError> {
        loop {
            if self.input_pos == self.input.len() && self.compressed_left > 0 {
                self.fill_input().await?;
            }

            let Some(inflate) = self.inflate.as_mut() else {
                return Ok(0);
            };
            let before_in = inflate.total_in();
            let before_out = inflate.total_out();
            let status = inflate
                .decompress(&self.input[self.input_pos..], buf, FlushDecompress::None)
                .map_err(|e| ZipError::Corrupt {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })?;
            let consumed = (inflate.total_in() - before_in) as usize;
            let produced = (inflate.total_out() - before_out) as usize;
            self.input_pos += consumed;

            if produced > 0 {
                self.account(&buf[..produced])?;
                if status == Status::StreamEnd {
                    self.finish()?;
                }
                return Ok(produced);
            }

            if status == Status::StreamEnd {
                self.finish()?;
                return Ok(0);
            }

            // No progress: either the input ran dry before the end marker or
            // the decoder is stuck on what it has.
            let input_drained = self.input_pos == self.input.len();
            if consumed == 0 && (!input_drained || self.compressed_left == 0) {
                return Err(self.corrupt("deflate stream ends early"));
            }
        }
    }

    async fn fill_input(&mut self) -> Result<(), ZipError> {
        let len = (INPUT_CHUNK as u64).min(self.compressed_left) as usize;
        self.input.resize(len, 0);
        self.reader
            .read_exact_at(self.position, &mut self.input)
            .await?;
        self.position += len as u64;
        self.compressed_left -= len as u64;
        self.input_pos = 0;
        Ok(())
    }

    fn account(&mut self, data: &[u8]) -> Result<(), ZipError> {
        self.crc.update(data);
        self.produced += data.len() as u64;
        if self.produced > self.expected_size {
            return Err(self.corrupt("more data than the declared size"));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ZipError> {
        self.finished = true;
        if self.produced != self.expected_size {
            return Err(self.corrupt("less data than the declared size"));
        }
        let actual = self.crc.sum();
        if actual != self.expected_crc {
            return Err(ZipError::CrcMismatch {
                name: self.name.clone(),
                expected: self.expected_crc,
                actual,
            });
        }
        Ok(())
    }

    fn corrupt(&self, reason: &str) -> ZipError {
        ZipError::Corrupt {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl<R: ReadAt> std::fmt::Debug for MemberReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberReader")
            .field("name", &self.name)
            .field("deflated", &self.inflate.is_some())
            .field("produced", &self.produced)
            .field("expected_size", &self.expected_size)
            .finish_non_exhaustive()
    }
}
