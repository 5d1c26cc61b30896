//! ZIP writing with on-the-fly compression.
//!
//! The writer targets either a seekable sink (sizes and CRC are patched
//! into the local header after each entry) or a pure byte stream (deflated
//! entries get general purpose bit 3 and a trailing data descriptor).
//! Compressed output is buffered per entry and flushed to the sink in
//! chunks, so memory stays bounded regardless of entry size.

use crate::encoding::Encoding;
use crate::error::{ArchiveError, Result};
use crate::zip::entry::ZipEntry;
use crate::zip::extra::{
    ExtendedTimestamp, ExtraField, UnicodeExtraField, Zip64ExtraField, Zip64Values,
};
use crate::zip::{
    GeneralPurposeBit, ZipMethod, CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE,
    ZIP64_EOCD_SIGNATURE, ZIP64_MAGIC, ZIP64_MAGIC_SHORT,
};
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// When to emit ZIP64 structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Mode {
    /// Every entry and the archive tail carry ZIP64 records.
    Always,
    /// ZIP64 records appear only where a 32-bit field would overflow.
    #[default]
    AsNeeded,
    /// Any overflow is an error.
    Never,
}

/// When to add Unicode path/comment extra fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnicodeExtraPolicy {
    #[default]
    Never,
    Always,
    /// Only when the configured encoding cannot represent the text.
    NotEncodeable,
}

/// Output abstraction: both targets count their position, only the
/// seekable one can rewrite already-written header bytes.
pub trait ZipSink: Write {
    fn is_seekable(&self) -> bool;
    /// Rewrites `data` at `offset`, leaving the write position at the end.
    fn patch(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// Sink over a `Write + Seek` target.
pub struct SeekableSink<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> SeekableSink<W> {
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> ZipSink for SeekableSink<W> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn patch(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        self.inner.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

/// Sink over a plain `Write` target.
pub struct StreamSink<W: Write> {
    inner: W,
}

impl<W: Write> StreamSink<W> {
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ZipSink for StreamSink<W> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn patch(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "cannot patch a non-seekable sink",
        ))
    }
}

/// Buffer for compressed output with a flush threshold keyed to the
/// expected entry size, so small entries stay cheap and large ones do not
/// accumulate unbounded memory.
struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    fn with_size_hint(size_hint: Option<u64>) -> Self {
        let (initial_capacity, flush_threshold) = match size_hint {
            Some(size) if size < 100_000 => (16 * 1024, 256 * 1024),
            Some(size) if size < 10_000_000 => (128 * 1024, 2 * 1024 * 1024),
            _ => (256 * 1024, 4 * 1024 * 1024),
        };
        Self {
            buffer: Vec::with_capacity(initial_capacity),
            flush_threshold,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl Write for CompressedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Compressor {
    Stored,
    Deflate(DeflateEncoder<CompressedBuffer>),
}

struct CurrentEntry {
    encoded_name: Vec<u8>,
    encoded_comment: Vec<u8>,
    extra_fields: Vec<ExtraField>,
    method: ZipMethod,
    flags: GeneralPurposeBit,
    local_header_offset: u64,
    zip64_payload_offset: u64,
    dos_time: u32,
    declared_size: Option<u64>,
    declared_crc: Option<u32>,
    version_made_by: u16,
    version_needed: u16,
    internal_attributes: u16,
    external_attributes: u32,
    use_descriptor: bool,
    local_zip64: bool,
    is_directory: bool,
    compressor: Compressor,
    hasher: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

struct CentralRecord {
    encoded_name: Vec<u8>,
    encoded_comment: Vec<u8>,
    extra_fields: Vec<ExtraField>,
    method: ZipMethod,
    flags: GeneralPurposeBit,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    dos_time: u32,
    version_made_by: u16,
    version_needed: u16,
    internal_attributes: u16,
    external_attributes: u32,
}

/// ZIP archive writer.
pub struct ZipWriter<S: ZipSink> {
    sink: S,
    position: u64,
    entries: Vec<CentralRecord>,
    current: Option<CurrentEntry>,
    comment: String,
    encoding: Option<Encoding>,
    default_method: ZipMethod,
    level: u32,
    zip64_mode: Zip64Mode,
    unicode_policy: UnicodeExtraPolicy,
    use_language_encoding_flag: bool,
    fallback_to_utf8: bool,
    finished: bool,
}

impl ZipWriter<SeekableSink<File>> {
    /// Creates a ZIP file on disk.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new_seekable(File::create(path)?))
    }
}

impl<W: Write + Seek> ZipWriter<SeekableSink<W>> {
    /// Writer over a seekable target; local headers are patched in place.
    pub fn new_seekable(target: W) -> Self {
        Self::from_sink(SeekableSink { inner: target })
    }
}

impl<W: Write> ZipWriter<StreamSink<W>> {
    /// Writer over a pure byte stream; deflated entries use data
    /// descriptors instead of header patching.
    pub fn new_stream(target: W) -> Self {
        Self::from_sink(StreamSink { inner: target })
    }
}

impl<S: ZipSink> ZipWriter<S> {
    fn from_sink(sink: S) -> Self {
        Self {
            sink,
            position: 0,
            entries: Vec::new(),
            current: None,
            comment: String::new(),
            encoding: None,
            default_method: ZipMethod::Deflated,
            level: 6,
            zip64_mode: Zip64Mode::default(),
            unicode_policy: UnicodeExtraPolicy::default(),
            use_language_encoding_flag: true,
            fallback_to_utf8: false,
            finished: false,
        }
    }

    /// Whether the target supports header patching.
    pub fn is_seekable(&self) -> bool {
        self.sink.is_seekable()
    }

    /// Sets the archive comment written into the end-of-central-directory
    /// record.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Sets the name/comment encoding; `None` restores the platform
    /// default (UTF-8).
    pub fn set_encoding(&mut self, encoding: Option<Encoding>) {
        self.encoding = encoding;
    }

    /// Name of the effective encoding.
    pub fn encoding(&self) -> &'static str {
        self.effective_encoding().name()
    }

    pub fn set_use_zip64(&mut self, mode: Zip64Mode) {
        self.zip64_mode = mode;
    }

    pub fn set_create_unicode_extra_fields(&mut self, policy: UnicodeExtraPolicy) {
        self.unicode_policy = policy;
    }

    /// Controls general purpose bit 11 for UTF-8 encoded names.
    pub fn set_use_language_encoding_flag(&mut self, value: bool) {
        self.use_language_encoding_flag = value;
    }

    /// Encode names the configured encoding cannot represent as UTF-8
    /// instead of failing.
    pub fn set_fallback_to_utf8(&mut self, value: bool) {
        self.fallback_to_utf8 = value;
    }

    /// Sets the deflate level (0-9).
    pub fn set_level(&mut self, level: u32) -> Result<()> {
        if level > 9 {
            return Err(ArchiveError::IllegalState(format!(
                "invalid deflate level {level}, expected 0-9"
            )));
        }
        self.level = level;
        Ok(())
    }

    /// Sets the method used for entries that do not specify one.
    pub fn set_method(&mut self, method: ZipMethod) -> Result<()> {
        match method {
            ZipMethod::Stored | ZipMethod::Deflated => {
                self.default_method = method;
                Ok(())
            }
            other => Err(ArchiveError::Unsupported(format!(
                "cannot write entries with method {other:?}"
            ))),
        }
    }

    fn effective_encoding(&self) -> Encoding {
        self.encoding.unwrap_or(Encoding::Utf8)
    }

    /// Opens a new entry. The previous entry must have been closed.
    pub fn put_entry(&mut self, entry: ZipEntry) -> Result<()> {
        if self.finished {
            return Err(ArchiveError::IllegalState(
                "finish has already been called".to_string(),
            ));
        }
        if self.current.is_some() {
            return Err(ArchiveError::IllegalState(
                "close the previous entry before starting a new one".to_string(),
            ));
        }

        let method = entry.method().unwrap_or(self.default_method);
        match method {
            ZipMethod::Stored | ZipMethod::Deflated => {}
            other => {
                return Err(ArchiveError::Unsupported(format!(
                    "cannot write entries with method {other:?}"
                )))
            }
        }

        let seekable = self.sink.is_seekable();
        let declared_size = entry.size();
        let declared_crc = entry.crc32;
        if method == ZipMethod::Stored && !seekable {
            // without seek-back the stored header must be final up front
            if declared_size.is_none() || declared_crc.is_none() {
                return Err(ArchiveError::Unsupported(
                    "STORED entries on a non-seekable target need size and CRC before put_entry"
                        .to_string(),
                ));
            }
        }
        let use_descriptor = !seekable && method == ZipMethod::Deflated;

        // name and comment encoding
        let encoding = self.effective_encoding();
        let name = entry.name().to_string();
        let (encoded_name, encoded_as_utf8) = match encoding.encode(&name) {
            Some(bytes) => (bytes, encoding == Encoding::Utf8),
            None if self.fallback_to_utf8 => (name.as_bytes().to_vec(), true),
            None => {
                return Err(ArchiveError::Unsupported(format!(
                    "entry name {name:?} cannot be encoded as {}",
                    encoding.name()
                )))
            }
        };
        let comment = entry.comment().to_string();
        let encoded_comment = match encoding.encode(&comment) {
            Some(bytes) => bytes,
            None if self.fallback_to_utf8 => comment.as_bytes().to_vec(),
            None => {
                return Err(ArchiveError::Unsupported(format!(
                    "entry comment cannot be encoded as {}",
                    encoding.name()
                )))
            }
        };

        let mut flags = GeneralPurposeBit::default();
        flags.set_utf8_names(encoded_as_utf8 && self.use_language_encoding_flag);
        flags.set_data_descriptor(use_descriptor);

        // caller extras minus any ZIP64 record, which the writer manages
        let mut extra_fields: Vec<ExtraField> = entry
            .extra_fields()
            .iter()
            .filter(|f| f.tag() != Zip64ExtraField::TAG)
            .cloned()
            .collect();
        let name_needs_unicode = encoding.encode(&name).is_none();
        let comment_needs_unicode = !comment.is_empty() && encoding.encode(&comment).is_none();
        let add_unicode = match self.unicode_policy {
            UnicodeExtraPolicy::Never => false,
            UnicodeExtraPolicy::Always => true,
            UnicodeExtraPolicy::NotEncodeable => name_needs_unicode || comment_needs_unicode,
        };
        if add_unicode {
            extra_fields.push(ExtraField::UnicodePath(UnicodeExtraField::new(
                &encoded_name,
                &name,
            )));
            if !comment.is_empty() {
                extra_fields.push(ExtraField::UnicodeComment(UnicodeExtraField::new(
                    &encoded_comment,
                    &comment,
                )));
            }
        }

        // ZIP64 decision for the local header. Under AsNeeded an entry of
        // unknown size gets no reserved extra field; if it then overflows
        // 32 bits, close_entry fails with a ZIP64-required error.
        let size_overflows = declared_size.map_or(false, |s| s >= ZIP64_MAGIC as u64);
        let local_zip64 = match self.zip64_mode {
            Zip64Mode::Always => true,
            Zip64Mode::Never if size_overflows => {
                return Err(ArchiveError::Unsupported(
                    "entry needs ZIP64 but the ZIP64 mode is Never".to_string(),
                ))
            }
            Zip64Mode::Never => false,
            Zip64Mode::AsNeeded => size_overflows,
        };
        let version_needed: u16 = if local_zip64 {
            45
        } else if method == ZipMethod::Deflated || use_descriptor {
            20
        } else {
            10
        };

        let local_header_offset = self.position;
        let dos_time = entry.dos_time();

        // assemble the local extra block, ZIP64 first so its payload
        // offset is fixed for later patching
        let mut local_extras: Vec<ExtraField> = Vec::new();
        if local_zip64 {
            // stored entries have equal sizes, so the extra field can be
            // final immediately; deflated sizes are patched or carried by
            // the descriptor
            let initial_compressed = if method == ZipMethod::Stored {
                declared_size.unwrap_or(0)
            } else {
                0
            };
            local_extras.push(ExtraField::Zip64(Zip64ExtraField::from_values(
                Zip64Values {
                    uncompressed_size: Some(declared_size.unwrap_or(0)),
                    compressed_size: Some(initial_compressed),
                    local_header_offset: None,
                    disk_start: None,
                },
            )));
        }
        local_extras.extend(extra_fields.iter().cloned());
        let extra_block = crate::zip::extra::serialize_extra_fields(&local_extras)?;

        let mut header = Vec::with_capacity(30 + encoded_name.len() + extra_block.len());
        header.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        header.write_u16::<LittleEndian>(version_needed)?;
        header.write_u16::<LittleEndian>(flags.raw())?;
        header.write_u16::<LittleEndian>(method.code())?;
        header.write_u16::<LittleEndian>((dos_time & 0xFFFF) as u16)?;
        header.write_u16::<LittleEndian>((dos_time >> 16) as u16)?;
        let stream_stored = method == ZipMethod::Stored && !seekable;
        header.write_u32::<LittleEndian>(if stream_stored {
            declared_crc.unwrap_or(0)
        } else {
            0
        })?;
        if local_zip64 {
            header.write_u32::<LittleEndian>(ZIP64_MAGIC)?;
            header.write_u32::<LittleEndian>(ZIP64_MAGIC)?;
        } else if stream_stored {
            header.write_u32::<LittleEndian>(declared_size.unwrap_or(0) as u32)?;
            header.write_u32::<LittleEndian>(declared_size.unwrap_or(0) as u32)?;
        } else {
            // zeros: either descriptor mode or patched later
            header.write_u32::<LittleEndian>(0)?;
            header.write_u32::<LittleEndian>(0)?;
        }
        header.write_u16::<LittleEndian>(encoded_name.len() as u16)?;
        header.write_u16::<LittleEndian>(extra_block.len() as u16)?;
        header.extend_from_slice(&encoded_name);
        let zip64_payload_offset = local_header_offset + 30 + encoded_name.len() as u64 + 4;
        header.extend_from_slice(&extra_block);
        self.write_out(&header)?;

        let compressor = match method {
            ZipMethod::Stored => Compressor::Stored,
            ZipMethod::Deflated => Compressor::Deflate(DeflateEncoder::new(
                CompressedBuffer::with_size_hint(declared_size),
                Compression::new(self.level),
            )),
            _ => unreachable!("method validated above"),
        };

        self.current = Some(CurrentEntry {
            encoded_name,
            encoded_comment,
            extra_fields,
            method,
            flags,
            local_header_offset,
            zip64_payload_offset,
            dos_time,
            declared_size,
            declared_crc,
            version_made_by: entry.version_made_by(),
            version_needed,
            internal_attributes: entry.internal_attributes(),
            external_attributes: entry.external_attributes(),
            use_descriptor,
            local_zip64,
            is_directory: entry.is_directory(),
            compressor,
            hasher: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        });
        Ok(())
    }

    /// Writes entry data, compressing on the fly.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let current = self.current.as_mut().ok_or_else(|| {
            ArchiveError::IllegalState("no open entry; call put_entry first".to_string())
        })?;
        if current.is_directory && !data.is_empty() {
            return Err(ArchiveError::IllegalState(
                "directory entries cannot carry data".to_string(),
            ));
        }
        current.hasher.update(data);
        current.uncompressed_count += data.len() as u64;
        match &mut current.compressor {
            Compressor::Stored => {
                self.sink.write_all(data)?;
                self.position += data.len() as u64;
                current.compressed_count += data.len() as u64;
            }
            Compressor::Deflate(encoder) => {
                encoder.write_all(data)?;
                let buffer = encoder.get_mut();
                if buffer.should_flush() {
                    let chunk = buffer.take();
                    self.sink.write_all(&chunk)?;
                    self.position += chunk.len() as u64;
                    current.compressed_count += chunk.len() as u64;
                }
            }
        }
        Ok(())
    }

    /// Finalizes the open entry: flushes compression, emits the data
    /// descriptor or patches the local header, and queues the central
    /// record.
    pub fn close_entry(&mut self) -> Result<()> {
        let mut current = self.current.take().ok_or_else(|| {
            ArchiveError::IllegalState("no open entry to close".to_string())
        })?;

        match current.compressor {
            Compressor::Stored => {}
            Compressor::Deflate(encoder) => {
                let mut buffer = encoder.finish()?;
                let rest = buffer.take();
                if !rest.is_empty() {
                    self.sink.write_all(&rest)?;
                    self.position += rest.len() as u64;
                    current.compressed_count += rest.len() as u64;
                }
            }
        }

        let crc32 = current.hasher.finalize();
        let compressed_size = current.compressed_count;
        let uncompressed_size = current.uncompressed_count;

        if let Some(declared) = current.declared_size {
            if declared != uncompressed_size {
                return Err(ArchiveError::SizeMismatch {
                    declared,
                    actual: uncompressed_size,
                });
            }
        }
        if let Some(declared) = current.declared_crc {
            if declared != crc32 {
                return Err(ArchiveError::CrcMismatch {
                    expected: declared,
                    actual: crc32,
                });
            }
        }

        let overflow = compressed_size >= ZIP64_MAGIC as u64
            || uncompressed_size >= ZIP64_MAGIC as u64;
        if overflow && !current.local_zip64 {
            return Err(ArchiveError::Unsupported(
                "entry grew past 4 GiB but no ZIP64 extra field was reserved".to_string(),
            ));
        }

        if current.use_descriptor {
            let mut descriptor = Vec::with_capacity(24);
            descriptor.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
            descriptor.write_u32::<LittleEndian>(crc32)?;
            if current.local_zip64 {
                descriptor.write_u64::<LittleEndian>(compressed_size)?;
                descriptor.write_u64::<LittleEndian>(uncompressed_size)?;
            } else {
                descriptor.write_u32::<LittleEndian>(compressed_size as u32)?;
                descriptor.write_u32::<LittleEndian>(uncompressed_size as u32)?;
            }
            self.write_out(&descriptor)?;
        } else if self.sink.is_seekable() {
            let mut fixed = Vec::with_capacity(12);
            fixed.write_u32::<LittleEndian>(crc32)?;
            if current.local_zip64 {
                fixed.write_u32::<LittleEndian>(ZIP64_MAGIC)?;
                fixed.write_u32::<LittleEndian>(ZIP64_MAGIC)?;
                self.sink.patch(current.local_header_offset + 14, &fixed)?;
                let mut zip64_payload = Vec::with_capacity(16);
                zip64_payload.write_u64::<LittleEndian>(uncompressed_size)?;
                zip64_payload.write_u64::<LittleEndian>(compressed_size)?;
                self.sink.patch(current.zip64_payload_offset, &zip64_payload)?;
            } else {
                fixed.write_u32::<LittleEndian>(compressed_size as u32)?;
                fixed.write_u32::<LittleEndian>(uncompressed_size as u32)?;
                self.sink.patch(current.local_header_offset + 14, &fixed)?;
            }
        }
        // stream + stored: the header already carried the final values

        self.entries.push(CentralRecord {
            encoded_name: current.encoded_name,
            encoded_comment: current.encoded_comment,
            extra_fields: current.extra_fields,
            method: current.method,
            flags: current.flags,
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset: current.local_header_offset,
            dos_time: current.dos_time,
            version_made_by: current.version_made_by,
            version_needed: current.version_needed,
            internal_attributes: current.internal_attributes,
            external_attributes: current.external_attributes,
        });
        Ok(())
    }

    /// Writes the central directory, the optional ZIP64 tail and the final
    /// end-of-central-directory record. The open entry, if any, is closed
    /// first.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(ArchiveError::IllegalState(
                "finish has already been called".to_string(),
            ));
        }
        if self.current.is_some() {
            self.close_entry()?;
        }

        let central_offset = self.position;
        for index in 0..self.entries.len() {
            let record = self.build_central_record(index)?;
            self.write_out(&record)?;
        }
        let central_size = self.position - central_offset;

        let entry_count = self.entries.len() as u64;
        let needs_zip64_eocd = self.zip64_mode == Zip64Mode::Always
            || entry_count >= ZIP64_MAGIC_SHORT as u64
            || central_size >= ZIP64_MAGIC as u64
            || central_offset >= ZIP64_MAGIC as u64;
        if needs_zip64_eocd && self.zip64_mode == Zip64Mode::Never {
            return Err(ArchiveError::Unsupported(
                "archive needs a ZIP64 end of central directory but the ZIP64 mode is Never"
                    .to_string(),
            ));
        }

        if needs_zip64_eocd {
            let zip64_eocd_offset = self.position;
            let mut tail = Vec::with_capacity(76);
            tail.write_u32::<LittleEndian>(ZIP64_EOCD_SIGNATURE)?;
            tail.write_u64::<LittleEndian>(44)?; // record size past this field
            tail.write_u16::<LittleEndian>(45)?; // version made by
            tail.write_u16::<LittleEndian>(45)?; // version needed
            tail.write_u32::<LittleEndian>(0)?; // this disk
            tail.write_u32::<LittleEndian>(0)?; // central directory disk
            tail.write_u64::<LittleEndian>(entry_count)?;
            tail.write_u64::<LittleEndian>(entry_count)?;
            tail.write_u64::<LittleEndian>(central_size)?;
            tail.write_u64::<LittleEndian>(central_offset)?;
            tail.write_u32::<LittleEndian>(ZIP64_EOCD_LOCATOR_SIGNATURE)?;
            tail.write_u32::<LittleEndian>(0)?; // disk with the ZIP64 EOCD
            tail.write_u64::<LittleEndian>(zip64_eocd_offset)?;
            tail.write_u32::<LittleEndian>(1)?; // total disks
            self.write_out(&tail)?;
        }

        let encoding = self.effective_encoding();
        let comment_bytes = encoding
            .encode(&self.comment)
            .or_else(|| {
                self.fallback_to_utf8
                    .then(|| self.comment.as_bytes().to_vec())
            })
            .ok_or_else(|| {
                ArchiveError::Unsupported(format!(
                    "archive comment cannot be encoded as {}",
                    encoding.name()
                ))
            })?;

        let mut eocd = Vec::with_capacity(22 + comment_bytes.len());
        eocd.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        eocd.write_u16::<LittleEndian>(0)?; // this disk
        eocd.write_u16::<LittleEndian>(0)?; // central directory disk
        let count_16 = entry_count.min(ZIP64_MAGIC_SHORT as u64) as u16;
        eocd.write_u16::<LittleEndian>(count_16)?;
        eocd.write_u16::<LittleEndian>(count_16)?;
        eocd.write_u32::<LittleEndian>(central_size.min(ZIP64_MAGIC as u64) as u32)?;
        eocd.write_u32::<LittleEndian>(central_offset.min(ZIP64_MAGIC as u64) as u32)?;
        eocd.write_u16::<LittleEndian>(comment_bytes.len() as u16)?;
        eocd.extend_from_slice(&comment_bytes);
        self.write_out(&eocd)?;

        self.sink.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Releases the sink. Implicitly finishes the archive when `finish`
    /// has not been called yet; safe to combine with an earlier `finish`.
    pub fn close(mut self) -> Result<S> {
        if !self.finished {
            self.finish()?;
        }
        Ok(self.sink)
    }

    fn write_out(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn build_central_record(&self, index: usize) -> Result<Vec<u8>> {
        let entry = &self.entries[index];
        let needs_zip64 = self.zip64_mode == Zip64Mode::Always
            || entry.compressed_size >= ZIP64_MAGIC as u64
            || entry.uncompressed_size >= ZIP64_MAGIC as u64
            || entry.local_header_offset >= ZIP64_MAGIC as u64;
        if needs_zip64 && self.zip64_mode == Zip64Mode::Never {
            return Err(ArchiveError::Unsupported(
                "central record needs ZIP64 but the ZIP64 mode is Never".to_string(),
            ));
        }

        // the central copy truncates extended timestamps to mtime
        let mut extras: Vec<ExtraField> = Vec::new();
        if needs_zip64 {
            let always = self.zip64_mode == Zip64Mode::Always;
            extras.push(ExtraField::Zip64(Zip64ExtraField::from_values(
                Zip64Values {
                    uncompressed_size: (always
                        || entry.uncompressed_size >= ZIP64_MAGIC as u64)
                        .then_some(entry.uncompressed_size),
                    compressed_size: (always || entry.compressed_size >= ZIP64_MAGIC as u64)
                        .then_some(entry.compressed_size),
                    local_header_offset: (always
                        || entry.local_header_offset >= ZIP64_MAGIC as u64)
                        .then_some(entry.local_header_offset),
                    disk_start: None,
                },
            )));
        }
        for field in &entry.extra_fields {
            match field {
                ExtraField::ExtendedTimestamp(ts) => extras.push(ExtraField::Opaque {
                    tag: ExtendedTimestamp::TAG,
                    payload: ts.payload_central(),
                }),
                other => extras.push(other.clone()),
            }
        }
        let extra_block = crate::zip::extra::serialize_extra_fields(&extras)?;

        let zip64_usize =
            needs_zip64 && (self.zip64_mode == Zip64Mode::Always
                || entry.uncompressed_size >= ZIP64_MAGIC as u64);
        let zip64_csize =
            needs_zip64 && (self.zip64_mode == Zip64Mode::Always
                || entry.compressed_size >= ZIP64_MAGIC as u64);
        let zip64_offset =
            needs_zip64 && (self.zip64_mode == Zip64Mode::Always
                || entry.local_header_offset >= ZIP64_MAGIC as u64);

        let mut record =
            Vec::with_capacity(46 + entry.encoded_name.len() + extra_block.len());
        record.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_SIGNATURE)?;
        record.write_u16::<LittleEndian>(entry.version_made_by)?;
        record.write_u16::<LittleEndian>(if needs_zip64 {
            45
        } else {
            entry.version_needed
        })?;
        record.write_u16::<LittleEndian>(entry.flags.raw())?;
        record.write_u16::<LittleEndian>(entry.method.code())?;
        record.write_u16::<LittleEndian>((entry.dos_time & 0xFFFF) as u16)?;
        record.write_u16::<LittleEndian>((entry.dos_time >> 16) as u16)?;
        record.write_u32::<LittleEndian>(entry.crc32)?;
        record.write_u32::<LittleEndian>(if zip64_csize {
            ZIP64_MAGIC
        } else {
            entry.compressed_size as u32
        })?;
        record.write_u32::<LittleEndian>(if zip64_usize {
            ZIP64_MAGIC
        } else {
            entry.uncompressed_size as u32
        })?;
        record.write_u16::<LittleEndian>(entry.encoded_name.len() as u16)?;
        record.write_u16::<LittleEndian>(extra_block.len() as u16)?;
        record.write_u16::<LittleEndian>(entry.encoded_comment.len() as u16)?;
        record.write_u16::<LittleEndian>(0)?; // disk number start
        record.write_u16::<LittleEndian>(entry.internal_attributes)?;
        record.write_u32::<LittleEndian>(entry.external_attributes)?;
        record.write_u32::<LittleEndian>(if zip64_offset {
            ZIP64_MAGIC
        } else {
            entry.local_header_offset as u32
        })?;
        record.extend_from_slice(&entry.encoded_name);
        record.extend_from_slice(&extra_block);
        record.extend_from_slice(&entry.encoded_comment);
        Ok(record)
    }
}
