//! Forward-only ZIP reading over local file headers.
//!
//! Works on plain `Read` sources with no seeking. Entries are visited in
//! stream order; sizes unknown at local-header time (general purpose bit 3)
//! are recovered from the data descriptor after the deflate stream signals
//! its own end. The reader itself implements `Read` for the current
//! entry's decompressed data, so only one entry is open at a time.

use crate::encoding::Encoding;
use crate::error::{ArchiveError, Result};
use crate::zip::entry::{CommentSource, NameSource, ZipEntry};
use crate::zip::extra::{parse_extra_fields, ExtraField};
use crate::zip::{
    GeneralPurposeBit, ZipMethod, CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE, ZIP64_MAGIC,
};
use crc32fast::Hasher as Crc32;
use flate2::{Decompress, FlushDecompress, Status};
use std::io::{self, Read};

const INPUT_BUFFER_SIZE: usize = 8 * 1024;

/// Streaming ZIP reader.
pub struct ZipStreamReader<R: Read> {
    source: R,
    encoding: Encoding,
    buf: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    /// Physical bytes consumed from the source so far.
    consumed: u64,
    current: Option<CurrentEntry>,
    finished: bool,
}

struct CurrentEntry {
    crc32: u32,
    compressed_size: Option<u64>,
    uncompressed_size: Option<u64>,
    has_descriptor: bool,
    /// Descriptor carries 64-bit sizes (ZIP64 extra present in the header).
    zip64: bool,
    state: EntryState,
    hasher: Crc32,
    bytes_out: u64,
    compressed_consumed: u64,
    done: bool,
    verified: bool,
}

enum EntryState {
    Stored { remaining: u64 },
    Deflated { inflater: Box<Decompress>, finished: bool },
    Unsupported(u16),
}

impl<R: Read> ZipStreamReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_encoding(source, Encoding::Utf8)
    }

    /// Uses `encoding` for names and comments without the UTF-8 flag.
    pub fn with_encoding(source: R, encoding: Encoding) -> Self {
        Self {
            source,
            encoding,
            buf: vec![0u8; INPUT_BUFFER_SIZE],
            buf_pos: 0,
            buf_len: 0,
            consumed: 0,
            current: None,
            finished: false,
        }
    }

    /// Physical bytes consumed from the underlying source.
    pub fn bytes_read(&self) -> u64 {
        self.consumed
    }

    /// Advances to the next entry, draining any unread data (and trailing
    /// descriptor) of the current one.
    ///
    /// Returns `None` once the central directory or end-of-input is
    /// reached.
    pub fn next_entry(&mut self) -> Result<Option<ZipEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.finish_current()?;

        let mut signature = [0u8; 4];
        match self.read_exact_buffered(&mut signature) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && self.current.is_none() => {
                self.finished = true;
                return Ok(None);
            }
            Err(e) => return Err(ArchiveError::from_io(e)),
        }
        let signature = u32::from_le_bytes(signature);
        if signature == CENTRAL_DIRECTORY_SIGNATURE
            || signature == END_OF_CENTRAL_DIRECTORY_SIGNATURE
        {
            self.finished = true;
            return Ok(None);
        }
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::Format(format!(
                "expected local file header, found 0x{signature:08x}"
            )));
        }
        let local_header_offset = self.consumed - 4;

        let mut fixed = [0u8; 26];
        self.read_exact_buffered(&mut fixed).map_err(ArchiveError::from_io)?;
        let read_u16 = |at: usize| u16::from_le_bytes([fixed[at], fixed[at + 1]]);
        let read_u32 = |at: usize| {
            u32::from_le_bytes([fixed[at], fixed[at + 1], fixed[at + 2], fixed[at + 3]])
        };
        let version_needed = read_u16(0);
        let flags = GeneralPurposeBit::from_raw(read_u16(2));
        let method = ZipMethod::from_code(read_u16(4));
        let dos_time = (read_u16(8) as u32) << 16 | read_u16(6) as u32;
        let crc32 = read_u32(10);
        let compressed_size_32 = read_u32(14);
        let uncompressed_size_32 = read_u32(18);
        let name_len = read_u16(22) as usize;
        let extra_len = read_u16(24) as usize;

        let mut raw_name = vec![0u8; name_len];
        self.read_exact_buffered(&mut raw_name).map_err(ArchiveError::from_io)?;
        let mut extra = vec![0u8; extra_len];
        self.read_exact_buffered(&mut extra).map_err(ArchiveError::from_io)?;
        let extra_fields = parse_extra_fields(&extra)?;

        let zip64_extra = extra_fields.iter().find_map(|f| match f {
            ExtraField::Zip64(z) => Some(z),
            _ => None,
        });
        let zip64_present = zip64_extra.is_some();
        let mut compressed_size = Some(compressed_size_32 as u64);
        let mut uncompressed_size = Some(uncompressed_size_32 as u64);
        if let Some(zip64) = zip64_extra {
            let need_uncompressed = uncompressed_size_32 == ZIP64_MAGIC;
            let need_compressed = compressed_size_32 == ZIP64_MAGIC;
            if need_uncompressed || need_compressed {
                let values = zip64.decode(need_uncompressed, need_compressed, false, false)?;
                if let Some(v) = values.uncompressed_size {
                    uncompressed_size = Some(v);
                }
                if let Some(v) = values.compressed_size {
                    compressed_size = Some(v);
                }
            }
        }

        let has_descriptor = flags.uses_data_descriptor();
        if has_descriptor {
            // header sizes are placeholders, real values follow the data
            compressed_size = None;
            uncompressed_size = None;
        }

        let state = match method {
            ZipMethod::Stored if has_descriptor => {
                // without a compressed size the entry boundary cannot be
                // found in uncompressed data
                return Err(ArchiveError::Unsupported(
                    "STORED entry with a data descriptor in a non-seekable stream".to_string(),
                ));
            }
            ZipMethod::Stored => EntryState::Stored {
                remaining: compressed_size.unwrap_or(0),
            },
            ZipMethod::Deflated => EntryState::Deflated {
                inflater: Box::new(Decompress::new(false)),
                finished: false,
            },
            other => EntryState::Unsupported(other.code()),
        };

        let encoding = if flags.uses_utf8_names() {
            Encoding::Utf8
        } else {
            self.encoding
        };
        let (name, lossless) = encoding.decode(&raw_name);
        let name_source = match (flags.uses_utf8_names(), lossless) {
            (true, true) => NameSource::Utf8Flag,
            (false, true) => NameSource::RawBytes,
            (_, false) => NameSource::Fallback,
        };

        let entry = ZipEntry {
            name,
            raw_name,
            name_source,
            comment: String::new(),
            raw_comment: Vec::new(),
            comment_source: CommentSource::RawBytes,
            method: Some(method),
            flags,
            version_made_by: 0,
            version_needed,
            crc32: Some(crc32),
            compressed_size,
            uncompressed_size,
            dos_time,
            local_header_offset,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields,
        };

        self.current = Some(CurrentEntry {
            crc32,
            compressed_size,
            uncompressed_size,
            has_descriptor,
            zip64: zip64_present,
            state,
            hasher: Crc32::new(),
            bytes_out: 0,
            compressed_consumed: 0,
            done: false,
            verified: false,
        });
        Ok(Some(entry))
    }

    /// Drains the current entry, including its trailing descriptor.
    fn finish_current(&mut self) -> Result<()> {
        let Some(current) = &self.current else {
            return Ok(());
        };
        if current.done {
            self.current = None;
            return Ok(());
        }
        let unsupported = match &current.state {
            EntryState::Unsupported(code) => Some((
                *code,
                current.compressed_size,
                current.compressed_consumed,
            )),
            _ => None,
        };
        if let Some((code, compressed_size, already_consumed)) = unsupported {
            // data of an unknown method can only be skipped when the
            // header told us its length
            let Some(total) = compressed_size else {
                return Err(ArchiveError::UnsupportedMethod(code));
            };
            let mut to_skip = total - already_consumed;
            while to_skip > 0 {
                let available = self.fill()?;
                if available == 0 {
                    return Err(ArchiveError::Format(
                        "entry data truncated while skipping".to_string(),
                    ));
                }
                let step = (available as u64).min(to_skip) as usize;
                self.advance(step);
                to_skip -= step as u64;
            }
            self.current = None;
            return Ok(());
        }
        let mut scratch = [0u8; 4096];
        loop {
            match self.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(ArchiveError::from_io(e)),
            }
        }
        self.current = None;
        Ok(())
    }

    // Validates the entry trailer once the decompressor is done: either the
    // data descriptor (bit 3) or the sizes/CRC from the local header.
    fn verify_current_end(&mut self) -> io::Result<()> {
        let (has_descriptor, zip64) = {
            let current = self.current.as_mut().expect("verify without current entry");
            if current.verified {
                return Ok(());
            }
            current.verified = true;
            current.done = true;
            (current.has_descriptor, current.zip64)
        };
        let (expected_crc, expected_csize, expected_usize) = if has_descriptor {
            let mut word = [0u8; 4];
            // the descriptor signature is optional; without it the first
            // word is already the CRC
            self.read_exact_buffered(&mut word)?;
            let first = u32::from_le_bytes(word);
            let crc = if first == DATA_DESCRIPTOR_SIGNATURE {
                self.read_exact_buffered(&mut word)?;
                u32::from_le_bytes(word)
            } else {
                first
            };
            let (csize, usize_) = if zip64 {
                let mut qword = [0u8; 8];
                self.read_exact_buffered(&mut qword)?;
                let c = u64::from_le_bytes(qword);
                self.read_exact_buffered(&mut qword)?;
                (c, u64::from_le_bytes(qword))
            } else {
                self.read_exact_buffered(&mut word)?;
                let c = u32::from_le_bytes(word) as u64;
                self.read_exact_buffered(&mut word)?;
                (c, u32::from_le_bytes(word) as u64)
            };
            (crc, Some(csize), Some(usize_))
        } else {
            let current = self.current.as_ref().unwrap();
            (current.crc32, current.compressed_size, current.uncompressed_size)
        };

        let current = self.current.as_mut().unwrap();
        if let Some(expected) = expected_csize {
            if expected != current.compressed_consumed {
                return Err(ArchiveError::SizeMismatch {
                    declared: expected,
                    actual: current.compressed_consumed,
                }
                .into());
            }
        }
        if let Some(expected) = expected_usize {
            if expected != current.bytes_out {
                return Err(ArchiveError::SizeMismatch {
                    declared: expected,
                    actual: current.bytes_out,
                }
                .into());
            }
        }
        let actual_crc = current.hasher.clone().finalize();
        if actual_crc != expected_crc {
            return Err(ArchiveError::CrcMismatch {
                expected: expected_crc,
                actual: actual_crc,
            }
            .into());
        }
        Ok(())
    }

    // Buffered-input plumbing. All source bytes flow through `buf` so the
    // deflate decompressor never overreads past the entry's data.

    fn fill(&mut self) -> Result<usize> {
        if self.buf_pos < self.buf_len {
            return Ok(self.buf_len - self.buf_pos);
        }
        self.buf_pos = 0;
        self.buf_len = self.source.read(&mut self.buf)?;
        Ok(self.buf_len)
    }

    fn advance(&mut self, n: usize) {
        self.buf_pos += n;
        self.consumed += n as u64;
    }

    fn read_exact_buffered(&mut self, out: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let available = self.fill().map_err(io::Error::from)?;
            if available == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of ZIP stream",
                ));
            }
            let step = available.min(out.len() - filled);
            out[filled..filled + step].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + step]);
            self.advance(step);
            filled += step;
        }
        Ok(())
    }
}

impl<R: Read> ZipStreamReader<R> {
    fn read_stored(&mut self, out: &mut [u8], remaining: u64) -> io::Result<usize> {
        let available = self.fill().map_err(io::Error::from)?;
        if available == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "ZIP entry data truncated",
            ));
        }
        let step = available
            .min(out.len())
            .min(remaining.min(usize::MAX as u64) as usize);
        out[..step].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + step]);
        self.advance(step);
        let current = self.current.as_mut().unwrap();
        current.hasher.update(&out[..step]);
        current.bytes_out += step as u64;
        current.compressed_consumed += step as u64;
        if let EntryState::Stored { remaining } = &mut current.state {
            *remaining -= step as u64;
        }
        Ok(step)
    }

    fn read_deflated(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let available = self.fill().map_err(io::Error::from)?;
            let current = self.current.as_mut().unwrap();
            // cap input at the declared compressed size when known
            let mut input_len = available;
            if let Some(total) = current.compressed_size {
                let left = total - current.compressed_consumed;
                input_len = input_len.min(left.min(usize::MAX as u64) as usize);
            }
            if available == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflated ZIP entry truncated",
                ));
            }
            if input_len == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate stream not terminated within the declared compressed size",
                ));
            }
            let EntryState::Deflated { inflater, finished } = &mut current.state else {
                unreachable!("read_deflated outside deflate state");
            };
            let input = &self.buf[self.buf_pos..self.buf_pos + input_len];
            let in_before = inflater.total_in();
            let out_before = inflater.total_out();
            let status = inflater
                .decompress(input, out, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (inflater.total_in() - in_before) as usize;
            let produced = (inflater.total_out() - out_before) as usize;
            let ended = status == Status::StreamEnd;
            if ended {
                *finished = true;
            }
            self.buf_pos += consumed;
            self.consumed += consumed as u64;
            current.compressed_consumed += consumed as u64;
            current.hasher.update(&out[..produced]);
            current.bytes_out += produced as u64;
            if produced > 0 {
                return Ok(produced);
            }
            if ended {
                self.verify_current_end()?;
                return Ok(0);
            }
            // no output and no stream end yet: feed more input
        }
    }
}

impl<R: Read> Read for ZipStreamReader<R> {
    /// Reads decompressed data of the current entry.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        enum Step {
            Unsupported(u16),
            StoredDone,
            Stored(u64),
            DeflateDone,
            Deflate,
        }
        let step = match self.current.as_ref() {
            None => {
                return Err(ArchiveError::IllegalState(
                    "no current ZIP entry; call next_entry first".to_string(),
                )
                .into())
            }
            Some(current) if current.done => return Ok(0),
            Some(current) => match &current.state {
                EntryState::Unsupported(code) => Step::Unsupported(*code),
                EntryState::Stored { remaining: 0 } => Step::StoredDone,
                EntryState::Stored { remaining } => Step::Stored(*remaining),
                EntryState::Deflated { finished: true, .. } => Step::DeflateDone,
                EntryState::Deflated { .. } => Step::Deflate,
            },
        };
        match step {
            Step::Unsupported(code) => Err(ArchiveError::UnsupportedMethod(code).into()),
            Step::StoredDone | Step::DeflateDone => {
                self.verify_current_end()?;
                Ok(0)
            }
            Step::Stored(remaining) => self.read_stored(out, remaining),
            Step::Deflate => self.read_deflated(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_first_entry_is_illegal() {
        let mut reader = ZipStreamReader::new(&b"PK\x03\x04"[..]);
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(
            ArchiveError::from_io(err),
            ArchiveError::IllegalState(_)
        ));
    }

    #[test]
    fn empty_input_yields_no_entries() {
        let mut reader = ZipStreamReader::new(&b""[..]);
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn central_directory_terminates_iteration() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 42]);
        let mut reader = ZipStreamReader::new(&bytes[..]);
        assert!(reader.next_entry().unwrap().is_none());
    }
}
