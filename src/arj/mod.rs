//! ARJ archive reading.
//!
//! ARJ headers are located by scanning for the two-byte magic `60 EA`
//! with a rolling window; a 16-bit length, the header bytes and a CRC-32
//! follow. A CRC failure marks a false magic match and scanning resumes,
//! so arbitrary junk before or between headers is tolerated. The first
//! CRC-valid header is the archive's main header, every following one
//! describes a file. Only STORED entries can be read; the data is served
//! bounded and CRC-checked.

use crate::dostime;
use crate::encoding::Encoding;
use crate::error::{ArchiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, BufRead, Cursor, Read};

/// The header magic pair.
pub const ARJ_MAGIC: [u8; 2] = [0x60, 0xEA];

/// Anything larger is a false magic match, not a basic header.
const MAX_BASIC_HEADER_SIZE: u16 = 2600;

/// Flag bits shared by main and local headers.
pub mod flags {
    /// Archive or entry is encrypted.
    pub const GARBLED: u8 = 0x01;
    /// Part of a multi-volume archive.
    pub const VOLUME: u8 = 0x04;
    /// Entry continues in the next volume.
    pub const EXTFILE: u8 = 0x08;
    /// Names use `/` as the path separator.
    pub const PATHSYM: u8 = 0x10;
    pub const BACKUP: u8 = 0x20;
}

/// ARJ compression method codes.
pub mod methods {
    pub const STORED: u8 = 0;
    pub const COMPRESSED_MOST: u8 = 1;
    pub const COMPRESSED: u8 = 2;
    pub const COMPRESSED_FASTER: u8 = 3;
    pub const COMPRESSED_FASTEST: u8 = 4;
    pub const NO_DATA_NO_CRC: u8 = 8;
    pub const NO_DATA: u8 = 9;
}

/// Host operating system codes recorded in headers.
pub mod host_os {
    pub const MSDOS: u8 = 0;
    pub const UNIX: u8 = 2;
    pub const OS2: u8 = 5;
    pub const NEXT: u8 = 8;
    pub const WIN95: u8 = 10;
    pub const WIN32: u8 = 11;
}

/// File type codes.
pub mod file_types {
    pub const BINARY: u8 = 0;
    pub const SEVEN_BIT_TEXT: u8 = 1;
    pub const DIRECTORY: u8 = 3;
    pub const VOLUME_LABEL: u8 = 4;
}

/// The archive-level main header.
#[derive(Debug, Clone)]
pub struct MainHeader {
    pub archiver_version: u8,
    pub min_version_to_extract: u8,
    pub host_os: u8,
    pub flags: u8,
    pub security_version: u8,
    pub file_type: u8,
    pub created: u32,
    pub modified: u32,
    pub archive_size: u32,
    pub security_envelope_position: u32,
    pub file_spec_position: u16,
    pub security_envelope_length: u16,
    pub encryption_version: u8,
    pub last_chapter: u8,
    pub protection_factor: Option<u8>,
    pub flags2: Option<u8>,
    pub name: String,
    pub comment: String,
    pub extended_headers: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct LocalFileHeader {
    archiver_version: u8,
    min_version_to_extract: u8,
    host_os: u8,
    flags: u8,
    method: u8,
    file_type: u8,
    modified: u32,
    compressed_size: u32,
    original_size: u32,
    original_crc32: u32,
    #[allow(dead_code)]
    file_spec_position: u16,
    file_access_mode: u16,
    #[allow(dead_code)]
    first_chapter: u8,
    #[allow(dead_code)]
    last_chapter: u8,
    #[allow(dead_code)]
    extended_file_position: Option<u32>,
    accessed: Option<u32>,
    created: Option<u32>,
    #[allow(dead_code)]
    original_size_even_for_volumes: Option<u32>,
    name: String,
    comment: String,
    extended_headers: Vec<Vec<u8>>,
}

/// One member of an ARJ archive.
#[derive(Debug, Clone)]
pub struct ArjEntry {
    header: LocalFileHeader,
}

impl ArjEntry {
    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn comment(&self) -> &str {
        &self.header.comment
    }

    /// Original (uncompressed) size in bytes.
    pub fn size(&self) -> u64 {
        self.header.original_size as u64
    }

    pub fn compressed_size(&self) -> u64 {
        self.header.compressed_size as u64
    }

    /// ARJ method code; see [`methods`].
    pub fn method(&self) -> u8 {
        self.header.method
    }

    pub fn crc32(&self) -> u32 {
        self.header.original_crc32
    }

    pub fn host_os(&self) -> u8 {
        self.header.host_os
    }

    /// Header flag byte; see [`flags`].
    pub fn flags(&self) -> u8 {
        self.header.flags
    }

    /// File type code; see [`file_types`].
    pub fn file_type(&self) -> u8 {
        self.header.file_type
    }

    pub fn archiver_version(&self) -> u8 {
        self.header.archiver_version
    }

    pub fn min_version_to_extract(&self) -> u8 {
        self.header.min_version_to_extract
    }

    /// Raw host-OS-interpreted file access mode.
    pub fn mode(&self) -> u16 {
        self.header.file_access_mode
    }

    pub fn is_directory(&self) -> bool {
        self.header.file_type == file_types::DIRECTORY
    }

    /// Modification time as seconds since the Unix epoch.
    pub fn mtime_unix(&self) -> i64 {
        dostime::dos_to_unix(self.header.modified)
    }

    /// Access time, recorded only by newer archivers.
    pub fn atime_unix(&self) -> Option<i64> {
        self.header.accessed.map(|t| dostime::dos_to_unix(t))
    }

    pub fn ctime_unix(&self) -> Option<i64> {
        self.header.created.map(|t| dostime::dos_to_unix(t))
    }

    fn is_host_os_unix(&self) -> bool {
        self.header.host_os == host_os::UNIX || self.header.host_os == host_os::NEXT
    }

    /// The file-access mode, interpreted as Unix permission bits when the
    /// producing host stored them that way.
    pub fn unix_mode(&self) -> Option<u32> {
        self.is_host_os_unix()
            .then_some(self.header.file_access_mode as u32)
    }

    /// Raw extended header blocks, already CRC-validated.
    pub fn extended_headers(&self) -> &[Vec<u8>] {
        &self.header.extended_headers
    }
}

#[derive(Debug)]
struct CurrentEntry {
    method: u8,
    remaining: u64,
    expected_size: u64,
    expected_crc: u32,
    hasher: Crc32,
    produced: u64,
    verified: bool,
}

/// Forward-only ARJ archive reader.
#[derive(Debug)]
pub struct ArjReader<R: Read> {
    source: R,
    encoding: Encoding,
    main_header: MainHeader,
    current: Option<CurrentEntry>,
    bytes_read: u64,
}

impl<R: Read> ArjReader<R> {
    /// Opens an archive, decoding names and comments as CP437.
    pub fn new(source: R) -> Result<Self> {
        Self::with_encoding(source, Encoding::Cp437)
    }

    /// Opens an archive with an explicit name/comment encoding.
    pub fn with_encoding(source: R, encoding: Encoding) -> Result<Self> {
        let mut reader = Self {
            source,
            encoding,
            main_header: MainHeader {
                archiver_version: 0,
                min_version_to_extract: 0,
                host_os: 0,
                flags: 0,
                security_version: 0,
                file_type: 0,
                created: 0,
                modified: 0,
                archive_size: 0,
                security_envelope_position: 0,
                file_spec_position: 0,
                security_envelope_length: 0,
                encryption_version: 0,
                last_chapter: 0,
                protection_factor: None,
                flags2: None,
                name: String::new(),
                comment: String::new(),
                extended_headers: Vec::new(),
            },
            current: None,
            bytes_read: 0,
        };
        let header_bytes = reader
            .read_header()?
            .ok_or_else(|| ArchiveError::Format("archive ends without any headers".to_string()))?;
        reader.main_header = reader.parse_main_header(&header_bytes)?;
        if reader.main_header.flags & flags::GARBLED != 0 {
            return Err(ArchiveError::Unsupported(
                "encrypted ARJ archives".to_string(),
            ));
        }
        if reader.main_header.flags & flags::VOLUME != 0 {
            return Err(ArchiveError::Unsupported(
                "multi-volume ARJ archives".to_string(),
            ));
        }
        Ok(reader)
    }

    /// Whether the signature bytes look like the start of an ARJ archive.
    pub fn matches(signature: &[u8]) -> bool {
        signature.len() >= 2 && signature[0] == ARJ_MAGIC[0] && signature[1] == ARJ_MAGIC[1]
    }

    /// The archive's recorded name.
    pub fn archive_name(&self) -> &str {
        &self.main_header.name
    }

    /// The archive's comment.
    pub fn archive_comment(&self) -> &str {
        &self.main_header.comment
    }

    pub fn main_header(&self) -> &MainHeader {
        &self.main_header
    }

    /// Physical bytes consumed from the underlying source.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Advances to the next entry, draining unread data of the current one.
    pub fn next_entry(&mut self) -> Result<Option<ArjEntry>> {
        if let Some(current) = self.current.take() {
            let mut to_skip = current.remaining;
            let mut scratch = [0u8; 4096];
            while to_skip > 0 {
                let step = scratch.len().min(to_skip.min(usize::MAX as u64) as usize);
                self.read_exact_counted(&mut scratch[..step])?;
                to_skip -= step as u64;
            }
        }

        let Some(header_bytes) = self.read_header()? else {
            return Ok(None);
        };
        let header = self.parse_local_header(&header_bytes)?;
        let entry = ArjEntry { header };
        self.current = Some(CurrentEntry {
            method: entry.header.method,
            remaining: entry.header.compressed_size as u64,
            expected_size: entry.header.original_size as u64,
            expected_crc: entry.header.original_crc32,
            hasher: Crc32::new(),
            produced: 0,
            verified: false,
        });
        Ok(Some(entry))
    }

    // Counted byte-source primitives: `bytes_read` always equals the
    // physical bytes consumed from the underlying source.

    fn read_u8_opt(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.source.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.bytes_read += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_u16_counted(&mut self) -> Result<u16> {
        let value = self.source.read_u16::<LittleEndian>()?;
        self.bytes_read += 2;
        Ok(value)
    }

    fn read_u32_counted(&mut self) -> Result<u32> {
        let value = self.source.read_u32::<LittleEndian>()?;
        self.bytes_read += 4;
        Ok(value)
    }

    fn read_exact_counted(&mut self, buf: &mut [u8]) -> Result<()> {
        self.source.read_exact(buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }

    /// Scans for the next CRC-valid basic header.
    ///
    /// Returns `None` at the end-of-archive marker (zero-length header) or
    /// on clean end-of-input during the scan. False magic matches are
    /// skipped silently.
    fn read_header(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(mut first) = self.read_u8_opt()? else {
            return Ok(None);
        };
        loop {
            // rolling two-byte window over the magic pair
            loop {
                if first == ARJ_MAGIC[0] {
                    let Some(second) = self.read_u8_opt()? else {
                        return Ok(None);
                    };
                    if second == ARJ_MAGIC[1] {
                        break;
                    }
                    first = second;
                } else {
                    let Some(next) = self.read_u8_opt()? else {
                        return Ok(None);
                    };
                    first = next;
                }
            }

            let basic_header_size = self.read_u16_counted()?;
            if basic_header_size == 0 {
                // end of archive
                return Ok(None);
            }
            if basic_header_size <= MAX_BASIC_HEADER_SIZE {
                let mut header = vec![0u8; basic_header_size as usize];
                self.read_exact_counted(&mut header)?;
                let stored_crc = self.read_u32_counted()?;
                if stored_crc == crc32fast::hash(&header) {
                    return Ok(Some(header));
                }
            }
            // false positive, resume scanning
            let Some(next) = self.read_u8_opt()? else {
                return Ok(None);
            };
            first = next;
        }
    }

    fn read_string(&self, cursor: &mut Cursor<&[u8]>) -> Result<String> {
        let mut raw = Vec::new();
        cursor.read_until(0, &mut raw)?;
        if raw.last() == Some(&0) {
            raw.pop();
        }
        let (decoded, _) = self.encoding.decode(&raw);
        Ok(decoded)
    }

    /// Reads the extended-header blocks that follow a basic header:
    /// 16-bit length (zero terminates), payload, CRC-32.
    fn read_extended_headers(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut headers = Vec::new();
        loop {
            let size = self.read_u16_counted()?;
            if size == 0 {
                return Ok(headers);
            }
            let mut block = vec![0u8; size as usize];
            self.read_exact_counted(&mut block)?;
            let stored_crc = self.read_u32_counted()?;
            let actual_crc = crc32fast::hash(&block);
            if stored_crc != actual_crc {
                return Err(ArchiveError::CrcMismatch {
                    expected: stored_crc,
                    actual: actual_crc,
                });
            }
            headers.push(block);
        }
    }

    fn parse_main_header(&mut self, basic_header: &[u8]) -> Result<MainHeader> {
        let mut cursor = Cursor::new(basic_header);
        let first_header_size = cursor.read_u8()? as usize;
        if first_header_size < 30 || first_header_size > basic_header.len() {
            return Err(ArchiveError::Format(format!(
                "implausible ARJ main header size {first_header_size}"
            )));
        }

        let archiver_version = cursor.read_u8()?;
        let min_version_to_extract = cursor.read_u8()?;
        let host_os = cursor.read_u8()?;
        let arj_flags = cursor.read_u8()?;
        let security_version = cursor.read_u8()?;
        let file_type = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let created = cursor.read_u32::<LittleEndian>()?;
        let modified = cursor.read_u32::<LittleEndian>()?;
        let archive_size = cursor.read_u32::<LittleEndian>()?;
        let security_envelope_position = cursor.read_u32::<LittleEndian>()?;
        let file_spec_position = cursor.read_u16::<LittleEndian>()?;
        let security_envelope_length = cursor.read_u16::<LittleEndian>()?;
        let encryption_version = cursor.read_u8()?;
        let last_chapter = cursor.read_u8()?;

        let mut header = MainHeader {
            archiver_version,
            min_version_to_extract,
            host_os,
            flags: arj_flags,
            security_version,
            file_type,
            created,
            modified,
            archive_size,
            security_envelope_position,
            file_spec_position,
            security_envelope_length,
            encryption_version,
            last_chapter,
            protection_factor: None,
            flags2: None,
            name: String::new(),
            comment: String::new(),
            extended_headers: Vec::new(),
        };
        if first_header_size >= 33 {
            header.protection_factor = Some(cursor.read_u8()?);
            header.flags2 = Some(cursor.read_u8()?);
            let _reserved = cursor.read_u16::<LittleEndian>()?;
        }

        // name and comment start right after the fixed part
        cursor.set_position(first_header_size as u64);
        header.name = self.read_string(&mut cursor)?;
        header.comment = self.read_string(&mut cursor)?;

        header.extended_headers = self.read_extended_headers()?;
        Ok(header)
    }

    fn parse_local_header(&mut self, basic_header: &[u8]) -> Result<LocalFileHeader> {
        let mut cursor = Cursor::new(basic_header);
        let first_header_size = cursor.read_u8()? as usize;
        if first_header_size < 30 || first_header_size > basic_header.len() {
            return Err(ArchiveError::Format(format!(
                "implausible ARJ file header size {first_header_size}"
            )));
        }

        let archiver_version = cursor.read_u8()?;
        let min_version_to_extract = cursor.read_u8()?;
        let host_os = cursor.read_u8()?;
        let arj_flags = cursor.read_u8()?;
        let method = cursor.read_u8()?;
        let file_type = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let modified = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let original_size = cursor.read_u32::<LittleEndian>()?;
        let original_crc32 = cursor.read_u32::<LittleEndian>()?;
        let file_spec_position = cursor.read_u16::<LittleEndian>()?;
        let file_access_mode = cursor.read_u16::<LittleEndian>()?;
        let first_chapter = cursor.read_u8()?;
        let last_chapter = cursor.read_u8()?;

        let mut header = LocalFileHeader {
            archiver_version,
            min_version_to_extract,
            host_os,
            flags: arj_flags,
            method,
            file_type,
            modified,
            compressed_size,
            original_size,
            original_crc32,
            file_spec_position,
            file_access_mode,
            first_chapter,
            last_chapter,
            extended_file_position: None,
            accessed: None,
            created: None,
            original_size_even_for_volumes: None,
            name: String::new(),
            comment: String::new(),
            extended_headers: Vec::new(),
        };
        if first_header_size >= 33 {
            header.extended_file_position = Some(cursor.read_u32::<LittleEndian>()?);
            if first_header_size >= 45 {
                header.accessed = Some(cursor.read_u32::<LittleEndian>()?);
                header.created = Some(cursor.read_u32::<LittleEndian>()?);
                header.original_size_even_for_volumes =
                    Some(cursor.read_u32::<LittleEndian>()?);
            }
        }

        cursor.set_position(first_header_size as u64);
        header.name = self.read_string(&mut cursor)?;
        header.comment = self.read_string(&mut cursor)?;

        header.extended_headers = self.read_extended_headers()?;
        Ok(header)
    }
}

impl<R: Read> Read for ArjReader<R> {
    /// Reads the decompressed data of the current entry. Only STORED
    /// entries are supported; the bytes are CRC-checked at end-of-stream.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let Some(current) = self.current.as_ref() else {
            return Err(ArchiveError::IllegalState(
                "no current ARJ entry; call next_entry first".to_string(),
            )
            .into());
        };
        if current.method != methods::STORED {
            return Err(ArchiveError::UnsupportedMethod(current.method as u16).into());
        }
        if current.remaining == 0 {
            return self.verify_current_end();
        }
        let step = out
            .len()
            .min(current.remaining.min(usize::MAX as u64) as usize);
        let n = self.source.read(&mut out[..step])?;
        if n == 0 {
            // truncated data: run the end checks on what was delivered,
            // which reports the CRC failure
            return self.verify_current_end();
        }
        self.bytes_read += n as u64;
        let current = self.current.as_mut().unwrap();
        current.remaining -= n as u64;
        current.produced += n as u64;
        current.hasher.update(&out[..n]);
        Ok(n)
    }
}

impl<R: Read> ArjReader<R> {
    // Runs the end-of-entry checks once, then keeps reporting EOF. CRC is
    // checked before the length so truncation shows up as a CRC failure.
    fn verify_current_end(&mut self) -> io::Result<usize> {
        let current = self.current.as_mut().expect("verify without current entry");
        if current.verified {
            return Ok(0);
        }
        current.verified = true;
        let actual = current.hasher.clone().finalize();
        if actual != current.expected_crc {
            return Err(ArchiveError::CrcMismatch {
                expected: current.expected_crc,
                actual,
            }
            .into());
        }
        if current.produced != current.expected_size {
            return Err(ArchiveError::SizeMismatch {
                declared: current.expected_size,
                actual: current.produced,
            }
            .into());
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Builds a basic header block: magic, length, payload, CRC.
    fn basic_header_block(payload: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(&ARJ_MAGIC);
        block.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        block.extend_from_slice(payload);
        block.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        block
    }

    fn main_header_payload(archive_flags: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.push(30); // first header size
        payload.push(11); // archiver version
        payload.push(1); // min version to extract
        payload.push(host_os::MSDOS);
        payload.push(archive_flags);
        payload.push(0); // security version
        payload.push(2); // file type (comment header)
        payload.push(0); // reserved
        payload.extend_from_slice(&0x5000_0000u32.to_le_bytes()); // created
        payload.extend_from_slice(&0x5000_0000u32.to_le_bytes()); // modified
        payload.extend_from_slice(&0u32.to_le_bytes()); // archive size
        payload.extend_from_slice(&0u32.to_le_bytes()); // security envelope
        payload.extend_from_slice(&0u16.to_le_bytes()); // file spec position
        payload.extend_from_slice(&0u16.to_le_bytes()); // security envelope len
        payload.push(0); // encryption version
        payload.push(0); // last chapter
        payload.extend_from_slice(b"archive.arj\0");
        payload.extend_from_slice(b"a comment\0");
        payload
    }

    fn local_header_payload(name: &[u8], data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.push(30);
        payload.push(11);
        payload.push(1);
        payload.push(host_os::MSDOS);
        payload.push(0); // flags
        payload.push(methods::STORED);
        payload.push(file_types::BINARY);
        payload.push(0); // reserved
        payload.extend_from_slice(&0x5000_0000u32.to_le_bytes()); // mtime
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes()); // csize
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes()); // osize
        payload.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes()); // file spec position
        payload.extend_from_slice(&0o644u16.to_le_bytes()); // access mode
        payload.push(0);
        payload.push(0);
        payload.extend_from_slice(name);
        payload.push(0);
        payload.push(0); // empty comment
        payload
    }

    fn one_entry_archive(data: &[u8]) -> Vec<u8> {
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(0)));
        archive.extend_from_slice(&0u16.to_le_bytes()); // no extended headers
        archive.extend_from_slice(&basic_header_block(&local_header_payload(
            b"hello.txt",
            data,
        )));
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive.extend_from_slice(data);
        // end of archive marker
        archive.extend_from_slice(&ARJ_MAGIC);
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive
    }

    #[test]
    fn reads_a_stored_entry() {
        let data = b"The quick brown fox";
        let archive = one_entry_archive(data);
        let mut reader = ArjReader::new(&archive[..]).unwrap();
        assert_eq!(reader.archive_name(), "archive.arj");
        assert_eq!(reader.archive_comment(), "a comment");

        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name(), "hello.txt");
        assert_eq!(entry.size(), data.len() as u64);
        assert_eq!(entry.method(), methods::STORED);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn junk_before_the_first_header_is_skipped() {
        let data = b"payload";
        let mut archive = vec![0x11, 0x60, 0x22, 0xEA, 0x60]; // junk with stray magic bytes
        archive.extend_from_slice(&one_entry_archive(data));
        let mut reader = ArjReader::new(&archive[..]).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name(), "hello.txt");
    }

    #[test]
    fn magic_pair_without_valid_crc_is_skipped() {
        let data = b"payload";
        // a fake magic pair followed by a plausible length and garbage
        let mut archive = Vec::new();
        archive.extend_from_slice(&ARJ_MAGIC);
        archive.extend_from_slice(&8u16.to_le_bytes());
        archive.extend_from_slice(&[0xAA; 12]); // body + wrong CRC
        archive.extend_from_slice(&one_entry_archive(data));
        let reader = ArjReader::new(&archive[..]).unwrap();
        assert_eq!(reader.archive_name(), "archive.arj");
    }

    #[test]
    fn garbled_archives_are_refused() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(flags::GARBLED)));
        archive.extend_from_slice(&0u16.to_le_bytes());
        let err = ArjReader::new(&archive[..]).unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(msg) if msg.contains("encrypted")));
    }

    #[test]
    fn multi_volume_archives_are_refused() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(flags::VOLUME)));
        archive.extend_from_slice(&0u16.to_le_bytes());
        let err = ArjReader::new(&archive[..]).unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(msg) if msg.contains("multi-volume")));
    }

    #[test]
    fn truncated_entry_data_fails_the_crc_check() {
        let data = b"fourteen bytes";
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(0)));
        archive.extend_from_slice(&0u16.to_le_bytes());
        // header declares 14 bytes but alters the last data byte
        let mut mutated = data.to_vec();
        *mutated.last_mut().unwrap() ^= 0xFF;
        archive.extend_from_slice(&basic_header_block(&local_header_payload(
            b"hello.txt",
            data,
        )));
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive.extend_from_slice(&mutated);
        archive.extend_from_slice(&ARJ_MAGIC);
        archive.extend_from_slice(&0u16.to_le_bytes());

        let mut reader = ArjReader::new(&archive[..]).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(matches!(
            ArchiveError::from_io(err),
            ArchiveError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn extended_header_crc_mismatch_is_fatal() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(0)));
        // one extended header block with a wrong CRC
        archive.extend_from_slice(&4u16.to_le_bytes());
        archive.extend_from_slice(&[1, 2, 3, 4]);
        archive.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let err = ArjReader::new(&archive[..]).unwrap_err();
        assert!(matches!(err, ArchiveError::CrcMismatch { .. }));
    }

    #[test]
    fn read_before_first_entry_is_illegal() {
        let archive = one_entry_archive(b"x");
        let mut reader = ArjReader::new(&archive[..]).unwrap();
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(
            ArchiveError::from_io(err),
            ArchiveError::IllegalState(_)
        ));
    }

    #[test]
    fn next_entry_drains_the_previous_one() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&basic_header_block(&main_header_payload(0)));
        archive.extend_from_slice(&0u16.to_le_bytes());
        for (name, data) in [(&b"a.txt"[..], &b"first"[..]), (b"b.txt", b"second!")] {
            archive.extend_from_slice(&basic_header_block(&local_header_payload(name, data)));
            archive.extend_from_slice(&0u16.to_le_bytes());
            archive.extend_from_slice(data);
        }
        archive.extend_from_slice(&ARJ_MAGIC);
        archive.extend_from_slice(&0u16.to_le_bytes());

        let mut reader = ArjReader::new(&archive[..]).unwrap();
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name(), "a.txt");
        // skip straight to the second entry without reading the first
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name(), "b.txt");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"second!");
    }

    #[test]
    fn bytes_read_tracks_physical_consumption() {
        let archive = one_entry_archive(b"abc");
        let mut reader = ArjReader::new(&archive[..]).unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
        assert_eq!(reader.bytes_read(), archive.len() as u64);
    }
}
