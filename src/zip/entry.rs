//! Logical ZIP entry metadata.

use crate::dostime;
use crate::zip::extra::{AesExtraField, ExtendedTimestamp, ExtraField, NtfsExtraField};
use crate::zip::{GeneralPurposeBit, ZipMethod};

/// Where an entry's decoded name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    /// Raw header bytes decoded with the archive encoding.
    RawBytes,
    /// Raw header bytes decoded as UTF-8 because bit 11 was set.
    Utf8Flag,
    /// The Unicode path extra field, after its CRC matched the raw bytes.
    UnicodeExtraField,
    /// Lossy fallback after the declared encoding failed to decode.
    Fallback,
}

/// Where an entry's decoded comment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentSource {
    RawBytes,
    UnicodeExtraField,
}

/// Platform that produced an entry, from the version-made-by high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Dos,
    Unix,
    Ntfs,
    Other(u8),
}

impl Platform {
    fn from_version_made_by(version: u16) -> Self {
        match (version >> 8) as u8 {
            0 => Platform::Dos,
            3 => Platform::Unix,
            10 => Platform::Ntfs,
            other => Platform::Other(other),
        }
    }
}

/// One member of a ZIP archive.
///
/// Read-path entries are produced by the central-directory walk with the
/// central record authoritative for sizes and CRC. Write-path entries are
/// built by the caller; fields the writer computes (sizes, CRC, offset)
/// may be left at their defaults.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub(crate) name: String,
    pub(crate) raw_name: Vec<u8>,
    pub(crate) name_source: NameSource,
    pub(crate) comment: String,
    pub(crate) raw_comment: Vec<u8>,
    pub(crate) comment_source: CommentSource,
    pub(crate) method: Option<ZipMethod>,
    pub(crate) flags: GeneralPurposeBit,
    pub(crate) version_made_by: u16,
    pub(crate) version_needed: u16,
    pub(crate) crc32: Option<u32>,
    pub(crate) compressed_size: Option<u64>,
    pub(crate) uncompressed_size: Option<u64>,
    pub(crate) dos_time: u32,
    pub(crate) local_header_offset: u64,
    pub(crate) disk_number_start: u32,
    pub(crate) internal_attributes: u16,
    pub(crate) external_attributes: u32,
    pub(crate) extra_fields: Vec<ExtraField>,
}

impl ZipEntry {
    /// Creates an entry for writing. The method defaults to the writer's
    /// configured method until set explicitly.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            raw_name: name.as_bytes().to_vec(),
            name,
            name_source: NameSource::RawBytes,
            comment: String::new(),
            raw_comment: Vec::new(),
            comment_source: CommentSource::RawBytes,
            method: None,
            flags: GeneralPurposeBit::default(),
            version_made_by: 20,
            version_needed: 20,
            crc32: None,
            compressed_size: None,
            uncompressed_size: None,
            dos_time: dostime::DOSTIME_BEFORE_1980,
            local_header_offset: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields: Vec::new(),
        }
    }

    /// Creates a directory entry: trailing slash, STORED, size zero.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        let mut entry = Self::new(name);
        entry.method = Some(ZipMethod::Stored);
        entry.uncompressed_size = Some(0);
        entry.compressed_size = Some(0);
        entry.crc32 = Some(0);
        entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The undecoded name bytes exactly as stored in the header.
    pub fn raw_name(&self) -> &[u8] {
        &self.raw_name
    }

    pub fn name_source(&self) -> NameSource {
        self.name_source
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn comment_source(&self) -> CommentSource {
        self.comment_source
    }

    /// Compression method, or `None` for a write-path entry that defers to
    /// the writer's default.
    pub fn method(&self) -> Option<ZipMethod> {
        self.method
    }

    pub fn set_method(&mut self, method: ZipMethod) {
        self.method = Some(method);
    }

    pub fn flags(&self) -> GeneralPurposeBit {
        self.flags
    }

    pub fn crc32(&self) -> u32 {
        self.crc32.unwrap_or(0)
    }

    pub fn set_crc32(&mut self, crc32: u32) {
        self.crc32 = Some(crc32);
    }

    /// Compressed size, when known.
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    /// Uncompressed size, when known.
    pub fn size(&self) -> Option<u64> {
        self.uncompressed_size
    }

    pub fn set_size(&mut self, size: u64) {
        self.uncompressed_size = Some(size);
    }

    pub fn set_compressed_size(&mut self, size: u64) {
        self.compressed_size = Some(size);
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Offset of the local file header from the start of the archive.
    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub fn disk_number_start(&self) -> u32 {
        self.disk_number_start
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    pub fn version_made_by(&self) -> u16 {
        self.version_made_by
    }

    pub fn version_needed(&self) -> u16 {
        self.version_needed
    }

    pub fn platform(&self) -> Platform {
        Platform::from_version_made_by(self.version_made_by)
    }

    /// Unix permission bits, for entries made on a Unix-like platform.
    pub fn unix_mode(&self) -> Option<u32> {
        match self.platform() {
            Platform::Unix => Some(self.external_attributes >> 16),
            _ => None,
        }
    }

    /// Stores Unix permission bits in the external attributes and marks the
    /// entry as made on Unix.
    pub fn set_unix_mode(&mut self, mode: u32) {
        self.external_attributes =
            mode << 16 | if self.is_directory() { 0x10 } else { 0 };
        self.version_made_by = 3 << 8 | (self.version_made_by & 0xFF);
    }

    /// Packed DOS modification time.
    pub fn dos_time(&self) -> u32 {
        self.dos_time
    }

    /// Modification time as seconds since the Unix epoch.
    ///
    /// Prefers the high-resolution extended timestamp or NTFS extra field
    /// over the 2-second DOS value.
    pub fn mtime_unix(&self) -> i64 {
        if let Some(ts) = self.extended_timestamp().and_then(|t| t.mtime) {
            return ts as i64;
        }
        if let Some(ntfs) = self.ntfs_times() {
            return ntfs.mtime_unix();
        }
        dostime::dos_to_unix(self.dos_time)
    }

    /// Access time from an extra field, when present.
    pub fn atime_unix(&self) -> Option<i64> {
        if let Some(ts) = self.extended_timestamp().and_then(|t| t.atime) {
            return Some(ts as i64);
        }
        self.ntfs_times().map(|n| n.atime_unix())
    }

    /// Creation time from an extra field, when present.
    pub fn ctime_unix(&self) -> Option<i64> {
        if let Some(ts) = self.extended_timestamp().and_then(|t| t.ctime) {
            return Some(ts as i64);
        }
        self.ntfs_times().map(|n| n.ctime_unix())
    }

    /// Sets the modification time, truncated to DOS granularity, and
    /// records the exact value in an extended-timestamp extra field.
    pub fn set_mtime_unix(&mut self, secs: i64) {
        self.dos_time = dostime::unix_to_dos(secs);
        if secs >= 0 && secs <= u32::MAX as i64 {
            self.extra_fields
                .retain(|f| f.tag() != ExtendedTimestamp::TAG);
            self.extra_fields
                .push(ExtraField::ExtendedTimestamp(ExtendedTimestamp::from_mtime(
                    secs as u32,
                )));
        }
    }

    /// Whether the name denotes a directory (trailing `/`).
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// The ordered extra-field records of this entry.
    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra_fields
    }

    pub fn add_extra_field(&mut self, field: ExtraField) {
        self.extra_fields.push(field);
    }

    /// Looks up the first extra field with the given tag.
    pub fn extra_field(&self, tag: u16) -> Option<&ExtraField> {
        self.extra_fields.iter().find(|f| f.tag() == tag)
    }

    pub(crate) fn extended_timestamp(&self) -> Option<&ExtendedTimestamp> {
        self.extra_fields.iter().find_map(|f| match f {
            ExtraField::ExtendedTimestamp(t) => Some(t),
            _ => None,
        })
    }

    pub(crate) fn ntfs_times(&self) -> Option<&NtfsExtraField> {
        self.extra_fields.iter().find_map(|f| match f {
            ExtraField::Ntfs(n) => Some(n),
            _ => None,
        })
    }

    pub(crate) fn aes_extra(&self) -> Option<&AesExtraField> {
        self.extra_fields.iter().find_map(|f| match f {
            ExtraField::Aes(a) => Some(a),
            _ => None,
        })
    }

    /// Whether reading this entry's data requires decryption support.
    pub fn is_encrypted(&self) -> bool {
        self.flags.uses_encryption()
            || self.flags.uses_strong_encryption()
            || self.aes_extra().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_entries() {
        let dir = ZipEntry::directory("docs");
        assert_eq!(dir.name(), "docs/");
        assert!(dir.is_directory());
        assert_eq!(dir.method(), Some(ZipMethod::Stored));
        assert_eq!(dir.size(), Some(0));

        let file = ZipEntry::new("docs/readme.txt");
        assert!(!file.is_directory());
    }

    #[test]
    fn unix_mode_round_trip() {
        let mut entry = ZipEntry::new("script.sh");
        assert_eq!(entry.unix_mode(), None);
        entry.set_unix_mode(0o755);
        assert_eq!(entry.unix_mode(), Some(0o755));
        assert_eq!(entry.platform(), Platform::Unix);
    }

    #[test]
    fn mtime_prefers_extended_timestamp() {
        let mut entry = ZipEntry::new("a.txt");
        let odd_second = 1_700_000_001i64;
        entry.set_mtime_unix(odd_second);
        // the DOS field loses the odd second, the extra field keeps it
        assert_eq!(dostime::dos_to_unix(entry.dos_time()), odd_second - 1);
        assert_eq!(entry.mtime_unix(), odd_second);
    }

    #[test]
    fn encryption_detection() {
        let mut entry = ZipEntry::new("secret.bin");
        assert!(!entry.is_encrypted());
        entry.flags = GeneralPurposeBit::from_raw(1);
        assert!(entry.is_encrypted());

        let mut aes = ZipEntry::new("aes.bin");
        aes.add_extra_field(ExtraField::Aes(AesExtraField {
            vendor_version: 2,
            strength: 3,
            actual_method: 8,
        }));
        assert!(aes.is_encrypted());
    }
}
