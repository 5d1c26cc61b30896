//! Random-access ZIP reading via the central directory.
//!
//! The archive is opened by locating the end-of-central-directory record
//! near the tail, following the optional ZIP64 locator, and walking the
//! central directory into a list of [`ZipEntry`] values. Entry data is
//! served lazily: the local file header is only visited on the first data
//! request for an entry.

use crate::encoding::Encoding;
use crate::error::{ArchiveError, Result};
use crate::registry::CompressorRegistry;
use crate::split::{open_split_zip, MultiSegmentReader};
use crate::streams::{BoundedReader, Crc32VerifyingReader};
use crate::zip::entry::{CommentSource, NameSource, ZipEntry};
use crate::zip::extra::{parse_extra_fields, ExtraField};
use crate::zip::{
    GeneralPurposeBit, ZipMethod, CENTRAL_DIRECTORY_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE,
    ZIP64_EOCD_SIGNATURE, ZIP64_MAGIC, ZIP64_MAGIC_SHORT,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Longest possible EOCD tail: 64 KiB of comment plus the fixed record.
const MAX_EOCD_SEARCH: u64 = u16::MAX as u64 + 22;

/// Options controlling how an archive's metadata is interpreted.
#[derive(Debug)]
pub struct ZipReaderOptions {
    /// Encoding for names and comments without the UTF-8 flag.
    pub encoding: Encoding,
    /// Let a CRC-matching Unicode extra field override the decoded name.
    pub use_unicode_extra_fields: bool,
    /// Skip parsing of local-header extra fields when resolving data.
    pub ignore_local_extra_fields: bool,
    /// Memory budget for buffering decompressors, in KiB.
    pub memory_limit_kb: Option<u64>,
    /// Codec registry used to resolve compression methods.
    pub registry: CompressorRegistry,
}

impl Default for ZipReaderOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            use_unicode_extra_fields: true,
            ignore_local_extra_fields: false,
            memory_limit_kb: None,
            registry: CompressorRegistry::builtin(),
        }
    }
}

/// Seekable ZIP archive reader.
#[derive(Debug)]
pub struct ZipArchive<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
    comment: String,
    options: ZipReaderOptions,
    name_index: Option<HashMap<String, Vec<usize>>>,
    /// Cache of local-header offset to data offset, filled lazily.
    data_offsets: HashMap<u64, u64>,
}

impl ZipArchive<BufReader<File>> {
    /// Opens a ZIP file from disk.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl ZipArchive<MultiSegmentReader<File>> {
    /// Opens a split ZIP from its final `.zip` segment, concatenating the
    /// sibling `.z01`, `.z02`, ... segments.
    pub fn open_split<P: AsRef<Path>>(last_segment: P) -> Result<Self> {
        Self::open(open_split_zip(last_segment.as_ref())?)
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Opens an archive with default options.
    pub fn open(source: R) -> Result<Self> {
        Self::open_with_options(source, ZipReaderOptions::default())
    }

    /// Opens an archive, reading the whole central directory up front.
    pub fn open_with_options(mut source: R, options: ZipReaderOptions) -> Result<Self> {
        let (eocd_offset, tail) = locate_eocd(&mut source)?;
        let eocd = Eocd::parse(&tail, &options)?;
        let located = match read_zip64_eocd(&mut source, eocd_offset)? {
            Some(zip64) => zip64,
            None => CentralDirectoryLocation {
                total_entries: eocd.total_entries as u64,
                offset: eocd.cd_offset as u64,
            },
        };

        source.seek(SeekFrom::Start(located.offset))?;
        let mut entries = Vec::with_capacity(located.total_entries.min(1 << 16) as usize);
        for index in 0..located.total_entries {
            let entry = read_central_record(&mut source, &options).map_err(|e| match e {
                ArchiveError::Format(msg) => {
                    ArchiveError::Format(format!("central directory entry {index}: {msg}"))
                }
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(Self {
            source,
            entries,
            comment: eocd.comment,
            options,
            name_index: None,
            data_offsets: HashMap::new(),
        })
    }

    /// The archive comment from the end-of-central-directory record.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Name of the configured metadata encoding.
    pub fn encoding(&self) -> &'static str {
        self.options.encoding.name()
    }

    /// All entries in central-directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// First entry with the given decoded name.
    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// All entries with the given decoded name, in central-directory order.
    /// Duplicate names are legal in ZIP archives.
    pub fn entries_by_name(&mut self, name: &str) -> Vec<&ZipEntry> {
        if self.name_index.is_none() {
            let mut index: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, entry) in self.entries.iter().enumerate() {
                index.entry(entry.name().to_string()).or_default().push(i);
            }
            self.name_index = Some(index);
        }
        let index = self.name_index.as_ref().unwrap();
        index
            .get(name)
            .map(|positions| positions.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Reader over the raw (still compressed) bytes of an entry.
    pub fn raw_reader(&mut self, entry: &ZipEntry) -> Result<BoundedReader<&mut R>> {
        let compressed_size = entry
            .compressed_size()
            .ok_or_else(|| ArchiveError::Format("entry has no compressed size".to_string()))?;
        let data_offset = self.resolve_data_offset(entry)?;
        self.source.seek(SeekFrom::Start(data_offset))?;
        Ok(BoundedReader::new(&mut self.source, compressed_size))
    }

    /// Reader over the decompressed bytes of an entry, verifying length
    /// and CRC-32 at end-of-stream.
    ///
    /// Only one entry reader can exist at a time; the borrow ends when the
    /// returned reader is dropped.
    pub fn reader(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        if entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(format!(
                "entry {} is encrypted",
                entry.name()
            )));
        }
        let compressed_size = entry
            .compressed_size()
            .ok_or_else(|| ArchiveError::Format("entry has no compressed size".to_string()))?;
        let uncompressed_size = entry
            .size()
            .ok_or_else(|| ArchiveError::Format("entry has no uncompressed size".to_string()))?;
        let crc32 = entry.crc32();
        let method = entry
            .method()
            .ok_or_else(|| ArchiveError::Format("entry has no compression method".to_string()))?;
        let data_offset = self.resolve_data_offset(entry)?;
        self.source.seek(SeekFrom::Start(data_offset))?;

        let bounded = BoundedReader::new(&mut self.source, compressed_size);
        let decompressed: Box<dyn Read + '_> = match method {
            ZipMethod::Stored => Box::new(bounded),
            other => {
                let codec = self
                    .options
                    .registry
                    .by_zip_method(other.code())
                    .filter(|c| c.is_input_available())
                    .ok_or(ArchiveError::UnsupportedMethod(other.code()))?;
                codec.decoder(Box::new(bounded), self.options.memory_limit_kb)?
            }
        };
        Ok(Box::new(Crc32VerifyingReader::new(
            decompressed,
            uncompressed_size,
            crc32,
        )))
    }

    /// Convenience: decompressed contents of the first entry named `name`.
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entry(name)
            .cloned()
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_string()))?;
        let mut reader = self.reader(&entry)?;
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .map_err(ArchiveError::from_io)?;
        Ok(out)
    }

    /// Releases the underlying byte source.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Visits the local file header on first use and returns the offset of
    /// the entry's data. Sizes always come from the central directory; the
    /// local header only contributes the name/extra lengths.
    fn resolve_data_offset(&mut self, entry: &ZipEntry) -> Result<u64> {
        let local_offset = entry.local_header_offset();
        if let Some(&offset) = self.data_offsets.get(&local_offset) {
            return Ok(offset);
        }
        self.source.seek(SeekFrom::Start(local_offset))?;
        let signature = self.source.read_u32::<LittleEndian>()?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::Format(format!(
                "no local file header at offset {local_offset} for entry {}",
                entry.name()
            )));
        }
        // version, flags, method, time, date, crc, csize, usize
        let mut fixed = [0u8; 22];
        self.source.read_exact(&mut fixed)?;
        let name_len = self.source.read_u16::<LittleEndian>()? as u64;
        let extra_len = self.source.read_u16::<LittleEndian>()? as u64;
        self.source.seek(SeekFrom::Current(name_len as i64))?;
        if self.options.ignore_local_extra_fields {
            self.source.seek(SeekFrom::Current(extra_len as i64))?;
        } else {
            let mut extra = vec![0u8; extra_len as usize];
            self.source.read_exact(&mut extra)?;
            parse_extra_fields(&extra).map_err(|e| match e {
                ArchiveError::Format(msg) => ArchiveError::Format(format!(
                    "local extra fields of entry {}: {msg}",
                    entry.name()
                )),
                other => other,
            })?;
        }
        let data_offset = local_offset + 30 + name_len + extra_len;
        self.data_offsets.insert(local_offset, data_offset);
        Ok(data_offset)
    }
}

struct Eocd {
    total_entries: u16,
    cd_offset: u32,
    comment: String,
}

impl Eocd {
    // `tail` starts at the EOCD signature.
    fn parse(tail: &[u8], options: &ZipReaderOptions) -> Result<Self> {
        let mut cursor = &tail[4..];
        let _disk_number = cursor.read_u16::<LittleEndian>()?;
        let _cd_start_disk = cursor.read_u16::<LittleEndian>()?;
        let _entries_on_disk = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let _cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_bytes = &tail[22..22 + comment_len.min(tail.len() - 22)];
        let (comment, _) = options.encoding.decode(comment_bytes);
        Ok(Self {
            total_entries,
            cd_offset,
            comment,
        })
    }
}

struct CentralDirectoryLocation {
    total_entries: u64,
    offset: u64,
}

/// Scans the tail of the source for the EOCD record.
///
/// Returns the absolute offset of the signature and the bytes from there
/// to end-of-file. The winning candidate is the last signature whose
/// declared comment length fits the remaining tail.
fn locate_eocd<R: Read + Seek>(source: &mut R) -> Result<(u64, Vec<u8>)> {
    let file_size = source.seek(SeekFrom::End(0))?;
    if file_size < 22 {
        return Err(ArchiveError::Format(
            "not a ZIP archive: too short for an end-of-central-directory record".to_string(),
        ));
    }
    let search_start = file_size.saturating_sub(MAX_EOCD_SEARCH);
    source.seek(SeekFrom::Start(search_start))?;
    let mut tail = Vec::with_capacity((file_size - search_start) as usize);
    source.read_to_end(&mut tail)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    for i in (0..=tail.len() - 22).rev() {
        if tail[i..i + 4] != signature {
            continue;
        }
        let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
        if i + 22 + comment_len <= tail.len() {
            return Ok((search_start + i as u64, tail[i..].to_vec()));
        }
    }
    Err(ArchiveError::Format(
        "not a ZIP archive: end-of-central-directory record not found".to_string(),
    ))
}

/// Probes for the ZIP64 EOCD locator immediately before the EOCD and, when
/// present, reads the ZIP64 EOCD record it points to.
fn read_zip64_eocd<R: Read + Seek>(
    source: &mut R,
    eocd_offset: u64,
) -> Result<Option<CentralDirectoryLocation>> {
    if eocd_offset < 20 {
        return Ok(None);
    }
    source.seek(SeekFrom::Start(eocd_offset - 20))?;
    if source.read_u32::<LittleEndian>()? != ZIP64_EOCD_LOCATOR_SIGNATURE {
        return Ok(None);
    }
    let _disk_with_zip64_eocd = source.read_u32::<LittleEndian>()?;
    let zip64_eocd_offset = source.read_u64::<LittleEndian>()?;
    let _total_disks = source.read_u32::<LittleEndian>()?;

    source.seek(SeekFrom::Start(zip64_eocd_offset))?;
    if source.read_u32::<LittleEndian>()? != ZIP64_EOCD_SIGNATURE {
        return Err(ArchiveError::Format(
            "ZIP64 locator points at something that is not a ZIP64 EOCD record".to_string(),
        ));
    }
    let _record_size = source.read_u64::<LittleEndian>()?;
    let _version_made_by = source.read_u16::<LittleEndian>()?;
    let _version_needed = source.read_u16::<LittleEndian>()?;
    let _disk_number = source.read_u32::<LittleEndian>()?;
    let _cd_start_disk = source.read_u32::<LittleEndian>()?;
    let _entries_on_disk = source.read_u64::<LittleEndian>()?;
    let total_entries = source.read_u64::<LittleEndian>()?;
    let _cd_size = source.read_u64::<LittleEndian>()?;
    let offset = source.read_u64::<LittleEndian>()?;
    Ok(Some(CentralDirectoryLocation {
        total_entries,
        offset,
    }))
}

/// Reads one central-directory record at the source's current position.
fn read_central_record<R: Read>(source: &mut R, options: &ZipReaderOptions) -> Result<ZipEntry> {
    let signature = source.read_u32::<LittleEndian>()?;
    if signature != CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ArchiveError::Format(format!(
            "expected central directory signature, found 0x{signature:08x}"
        )));
    }
    let version_made_by = source.read_u16::<LittleEndian>()?;
    let version_needed = source.read_u16::<LittleEndian>()?;
    let flags = GeneralPurposeBit::from_raw(source.read_u16::<LittleEndian>()?);
    let method = ZipMethod::from_code(source.read_u16::<LittleEndian>()?);
    let mod_time = source.read_u16::<LittleEndian>()?;
    let mod_date = source.read_u16::<LittleEndian>()?;
    let crc32 = source.read_u32::<LittleEndian>()?;
    let compressed_size_32 = source.read_u32::<LittleEndian>()?;
    let uncompressed_size_32 = source.read_u32::<LittleEndian>()?;
    let name_len = source.read_u16::<LittleEndian>()? as usize;
    let extra_len = source.read_u16::<LittleEndian>()? as usize;
    let comment_len = source.read_u16::<LittleEndian>()? as usize;
    let disk_start_16 = source.read_u16::<LittleEndian>()?;
    let internal_attributes = source.read_u16::<LittleEndian>()?;
    let external_attributes = source.read_u32::<LittleEndian>()?;
    let offset_32 = source.read_u32::<LittleEndian>()?;

    let mut raw_name = vec![0u8; name_len];
    source.read_exact(&mut raw_name)?;
    let mut extra = vec![0u8; extra_len];
    source.read_exact(&mut extra)?;
    let mut raw_comment = vec![0u8; comment_len];
    source.read_exact(&mut raw_comment)?;

    let extra_fields = parse_extra_fields(&extra)?;

    // 32-bit sentinels defer to the ZIP64 extra field, which must then be
    // present and long enough for every overflowed field.
    let need_uncompressed = uncompressed_size_32 == ZIP64_MAGIC;
    let need_compressed = compressed_size_32 == ZIP64_MAGIC;
    let need_offset = offset_32 == ZIP64_MAGIC;
    let need_disk = disk_start_16 == ZIP64_MAGIC_SHORT;
    let mut compressed_size = compressed_size_32 as u64;
    let mut uncompressed_size = uncompressed_size_32 as u64;
    let mut local_header_offset = offset_32 as u64;
    let mut disk_number_start = disk_start_16 as u32;
    if need_uncompressed || need_compressed || need_offset || need_disk {
        let zip64 = extra_fields
            .iter()
            .find_map(|f| match f {
                ExtraField::Zip64(z) => Some(z),
                _ => None,
            })
            .ok_or_else(|| {
                ArchiveError::Format(
                    "32-bit field overflowed but no ZIP64 extra field is present".to_string(),
                )
            })?;
        let values = zip64.decode(need_uncompressed, need_compressed, need_offset, need_disk)?;
        if let Some(v) = values.uncompressed_size {
            uncompressed_size = v;
        }
        if let Some(v) = values.compressed_size {
            compressed_size = v;
        }
        if let Some(v) = values.local_header_offset {
            local_header_offset = v;
        }
        if let Some(v) = values.disk_start {
            disk_number_start = v;
        }
    }

    // name decoding with provenance
    let name_encoding = if flags.uses_utf8_names() {
        Encoding::Utf8
    } else {
        options.encoding
    };
    let (mut name, name_lossless) = name_encoding.decode(&raw_name);
    let mut name_source = match (flags.uses_utf8_names(), name_lossless) {
        (true, true) => NameSource::Utf8Flag,
        (false, true) => NameSource::RawBytes,
        (_, false) => NameSource::Fallback,
    };
    let (mut comment, _) = name_encoding.decode(&raw_comment);
    let mut comment_source = CommentSource::RawBytes;

    if options.use_unicode_extra_fields {
        for field in &extra_fields {
            match field {
                ExtraField::UnicodePath(f) => {
                    if let Some(unicode) = f.unicode_if_matches(&raw_name) {
                        name = unicode;
                        name_source = NameSource::UnicodeExtraField;
                    }
                }
                ExtraField::UnicodeComment(f) => {
                    if let Some(unicode) = f.unicode_if_matches(&raw_comment) {
                        comment = unicode;
                        comment_source = CommentSource::UnicodeExtraField;
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ZipEntry {
        name,
        raw_name,
        name_source,
        comment,
        raw_comment,
        comment_source,
        method: Some(method),
        flags,
        version_made_by,
        version_needed,
        crc32: Some(crc32),
        compressed_size: Some(compressed_size),
        uncompressed_size: Some(uncompressed_size),
        dos_time: (mod_date as u32) << 16 | mod_time as u32,
        local_header_offset,
        disk_number_start,
        internal_attributes,
        external_attributes,
        extra_fields,
    })
}
