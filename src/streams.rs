//! Stream adapters shared by the archive readers.
//!
//! Per-entry data is always served through a [`BoundedReader`] limiting the
//! view to the entry's compressed bytes, and through a
//! [`Crc32VerifyingReader`] that checks length and CRC-32 once the caller
//! reaches end-of-stream.

use crate::error::ArchiveError;
use crc32fast::Hasher as Crc32;
use std::io::{self, Read};

/// Reader returning at most a fixed number of bytes from the inner reader.
pub struct BoundedReader<R: Read> {
    inner: R,
    remaining: u64,
}

impl<R: Read> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Bytes still available before the bound is reached.
    pub fn bytes_remaining(&self) -> u64 {
        self.remaining
    }

    /// Consumes the rest of the bounded region, returning the count skipped.
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut skipped = 0u64;
        let mut scratch = [0u8; 8192];
        while self.remaining > 0 {
            let n = self.read(&mut scratch)?;
            if n == 0 {
                break;
            }
            skipped += n as u64;
        }
        Ok(skipped)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Reader that verifies the byte count and CRC-32 of everything it yields.
///
/// Verification happens exactly once, when the inner reader reports
/// end-of-stream. A short stream raises [`ArchiveError::SizeMismatch`], a
/// checksum failure [`ArchiveError::CrcMismatch`]; both cross the `Read`
/// boundary as `io::Error` values recoverable via [`ArchiveError::from_io`].
pub struct Crc32VerifyingReader<R: Read> {
    inner: R,
    hasher: Crc32,
    bytes_read: u64,
    expected_size: u64,
    expected_crc: u32,
    verified: bool,
}

impl<R: Read> Crc32VerifyingReader<R> {
    pub fn new(inner: R, expected_size: u64, expected_crc: u32) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            bytes_read: 0,
            expected_size,
            expected_crc,
            verified: false,
        }
    }

    // CRC is checked before the length so that truncated data reports a
    // checksum failure, the way extraction tools describe it.
    fn verify(&mut self) -> io::Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        let actual = self.hasher.clone().finalize();
        if actual != self.expected_crc {
            return Err(ArchiveError::CrcMismatch {
                expected: self.expected_crc,
                actual,
            }
            .into());
        }
        if self.bytes_read != self.expected_size {
            return Err(ArchiveError::SizeMismatch {
                declared: self.expected_size,
                actual: self.bytes_read,
            }
            .into());
        }
        Ok(())
    }
}

impl<R: Read> Read for Crc32VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.verify()?;
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}
