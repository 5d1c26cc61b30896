//! Typed ZIP extra-field records.
//!
//! Extra fields are sequences of `(tag u16, length u16, payload)` triples
//! attached to local and central headers. Tags this library understands are
//! parsed into typed records; everything else is preserved verbatim as an
//! opaque record and round-trips byte-identically. A typed parser that
//! rejects its payload downgrades the record to opaque instead of failing
//! the whole walk.

use crate::error::{ArchiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Offset between the Windows FILETIME epoch (1601) and the Unix epoch.
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// One extra-field record as found in a local or central header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64ExtraField),
    UnicodePath(UnicodeExtraField),
    UnicodeComment(UnicodeExtraField),
    ExtendedTimestamp(ExtendedTimestamp),
    Ntfs(NtfsExtraField),
    UnixNew(UnixExtraField),
    UnixOld(UnixOldExtraField),
    Aes(AesExtraField),
    /// PKWare strong-encryption header; recognized only to refuse decryption.
    StrongEncryption { payload: Vec<u8> },
    /// Record with a tag this library does not interpret.
    Opaque { tag: u16, payload: Vec<u8> },
}

impl ExtraField {
    pub fn tag(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => Zip64ExtraField::TAG,
            ExtraField::UnicodePath(_) => UnicodeExtraField::PATH_TAG,
            ExtraField::UnicodeComment(_) => UnicodeExtraField::COMMENT_TAG,
            ExtraField::ExtendedTimestamp(_) => ExtendedTimestamp::TAG,
            ExtraField::Ntfs(_) => NtfsExtraField::TAG,
            ExtraField::UnixNew(_) => UnixExtraField::TAG,
            ExtraField::UnixOld(_) => UnixOldExtraField::TAG,
            ExtraField::Aes(_) => AesExtraField::TAG,
            ExtraField::StrongEncryption { .. } => 0x0017,
            ExtraField::Opaque { tag, .. } => *tag,
        }
    }

    /// Serialized payload bytes (without the tag/length prefix).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            ExtraField::Zip64(f) => f.raw.clone(),
            ExtraField::UnicodePath(f) | ExtraField::UnicodeComment(f) => f.payload(),
            ExtraField::ExtendedTimestamp(f) => f.payload(),
            ExtraField::Ntfs(f) => f.payload(),
            ExtraField::UnixNew(f) => f.payload(),
            ExtraField::UnixOld(f) => f.payload(),
            ExtraField::Aes(f) => f.payload(),
            ExtraField::StrongEncryption { payload } => payload.clone(),
            ExtraField::Opaque { payload, .. } => payload.clone(),
        }
    }
}

/// Walks an extra-field block into records.
///
/// A truncated `(tag, length)` header or a payload running past the block
/// is a format error; the walk never reads beyond `bytes`.
pub fn parse_extra_fields(bytes: &[u8]) -> Result<Vec<ExtraField>> {
    let mut fields = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if pos + 4 > bytes.len() {
            return Err(ArchiveError::Format(
                "truncated extra field header".to_string(),
            ));
        }
        let tag = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        let len = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            return Err(ArchiveError::Format(format!(
                "extra field 0x{tag:04x} overruns its block by {} bytes",
                pos + len - bytes.len()
            )));
        }
        let payload = &bytes[pos..pos + len];
        fields.push(parse_one(tag, payload));
        pos += len;
    }
    Ok(fields)
}

fn parse_one(tag: u16, payload: &[u8]) -> ExtraField {
    let opaque = || ExtraField::Opaque {
        tag,
        payload: payload.to_vec(),
    };
    match tag {
        Zip64ExtraField::TAG => ExtraField::Zip64(Zip64ExtraField {
            raw: payload.to_vec(),
        }),
        UnicodeExtraField::PATH_TAG => UnicodeExtraField::parse(payload)
            .map(ExtraField::UnicodePath)
            .unwrap_or_else(opaque),
        UnicodeExtraField::COMMENT_TAG => UnicodeExtraField::parse(payload)
            .map(ExtraField::UnicodeComment)
            .unwrap_or_else(opaque),
        ExtendedTimestamp::TAG => ExtendedTimestamp::parse(payload)
            .map(ExtraField::ExtendedTimestamp)
            .unwrap_or_else(opaque),
        NtfsExtraField::TAG => NtfsExtraField::parse(payload)
            .map(ExtraField::Ntfs)
            .unwrap_or_else(opaque),
        UnixExtraField::TAG => UnixExtraField::parse(payload)
            .map(ExtraField::UnixNew)
            .unwrap_or_else(opaque),
        UnixOldExtraField::TAG => UnixOldExtraField::parse(payload)
            .map(ExtraField::UnixOld)
            .unwrap_or_else(opaque),
        AesExtraField::TAG => AesExtraField::parse(payload)
            .map(ExtraField::Aes)
            .unwrap_or_else(opaque),
        0x0017 => ExtraField::StrongEncryption {
            payload: payload.to_vec(),
        },
        _ => opaque(),
    }
}

/// Serializes records back into an extra-field block.
///
/// The ZIP format stores the block length in a 16-bit field, so the total
/// serialized size (payloads plus 4 bytes of framing each) must fit in a
/// `u16`.
pub fn serialize_extra_fields(fields: &[ExtraField]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for field in fields {
        let payload = field.payload();
        if payload.len() > u16::MAX as usize {
            return Err(ArchiveError::Format(format!(
                "extra field 0x{:04x} payload of {} bytes exceeds the u16 length field",
                field.tag(),
                payload.len()
            )));
        }
        out.write_u16::<LittleEndian>(field.tag()).unwrap();
        out.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
        out.extend_from_slice(&payload);
        if out.len() > u16::MAX as usize {
            return Err(ArchiveError::Format(format!(
                "extra field block of {} bytes exceeds the u16 length field",
                out.len()
            )));
        }
    }
    Ok(out)
}

/// ZIP64 extended information (tag 0x0001).
///
/// The payload is a sequence of 64-bit values in the order of the 32-bit
/// header fields that overflowed: uncompressed size, compressed size,
/// local-header offset, disk start (32-bit). Which values are present can
/// only be decided with the header in hand, so the raw payload is kept and
/// decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64ExtraField {
    pub raw: Vec<u8>,
}

/// Values recovered from a ZIP64 extra field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Values {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    pub const TAG: u16 = 0x0001;

    /// Builds the payload for the given values, in field order.
    pub fn from_values(values: Zip64Values) -> Self {
        let mut raw = Vec::new();
        if let Some(v) = values.uncompressed_size {
            raw.write_u64::<LittleEndian>(v).unwrap();
        }
        if let Some(v) = values.compressed_size {
            raw.write_u64::<LittleEndian>(v).unwrap();
        }
        if let Some(v) = values.local_header_offset {
            raw.write_u64::<LittleEndian>(v).unwrap();
        }
        if let Some(v) = values.disk_start {
            raw.write_u32::<LittleEndian>(v).unwrap();
        }
        Self { raw }
    }

    /// Decodes the payload given which 32-bit header fields overflowed.
    pub fn decode(
        &self,
        need_uncompressed: bool,
        need_compressed: bool,
        need_offset: bool,
        need_disk: bool,
    ) -> Result<Zip64Values> {
        let mut cursor = Cursor::new(&self.raw[..]);
        let mut values = Zip64Values::default();
        let overrun = |what: &str| {
            ArchiveError::Format(format!("ZIP64 extra field too short for {what}"))
        };
        if need_uncompressed {
            values.uncompressed_size =
                Some(cursor.read_u64::<LittleEndian>().map_err(|_| {
                    overrun("uncompressed size")
                })?);
        }
        if need_compressed {
            values.compressed_size = Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| overrun("compressed size"))?,
            );
        }
        if need_offset {
            values.local_header_offset = Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| overrun("local header offset"))?,
            );
        }
        if need_disk {
            values.disk_start = Some(
                cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| overrun("disk start"))?,
            );
        }
        Ok(values)
    }
}

/// Info-ZIP Unicode path (0x7075) or comment (0x6375) extra field.
///
/// Carries a UTF-8 replacement for the raw name/comment bytes, guarded by a
/// CRC-32 over the original bytes so a stale field from a renamed entry is
/// detected and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodeExtraField {
    pub crc32: u32,
    pub unicode: Vec<u8>,
}

impl UnicodeExtraField {
    pub const PATH_TAG: u16 = 0x7075;
    pub const COMMENT_TAG: u16 = 0x6375;
    const VERSION: u8 = 1;

    pub fn new(original_bytes: &[u8], unicode: &str) -> Self {
        Self {
            crc32: crc32fast::hash(original_bytes),
            unicode: unicode.as_bytes().to_vec(),
        }
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 5 || payload[0] != Self::VERSION {
            return None;
        }
        let crc32 = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        Some(Self {
            crc32,
            unicode: payload[5..].to_vec(),
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.unicode.len());
        out.push(Self::VERSION);
        out.write_u32::<LittleEndian>(self.crc32).unwrap();
        out.extend_from_slice(&self.unicode);
        out
    }

    /// The UTF-8 replacement string, if the stored CRC matches the CRC-32
    /// of the original raw bytes.
    pub fn unicode_if_matches(&self, original_bytes: &[u8]) -> Option<String> {
        if crc32fast::hash(original_bytes) != self.crc32 {
            return None;
        }
        String::from_utf8(self.unicode.clone()).ok()
    }
}

/// Extended timestamp extra field (0x5455).
///
/// Local-header copies may carry up to three Unix timestamps selected by
/// the flag bits; central-directory copies are truncated to the
/// modification time, so missing trailing values are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub flags: u8,
    pub mtime: Option<u32>,
    pub atime: Option<u32>,
    pub ctime: Option<u32>,
}

impl ExtendedTimestamp {
    pub const TAG: u16 = 0x5455;
    const MTIME_BIT: u8 = 1;
    const ATIME_BIT: u8 = 2;
    const CTIME_BIT: u8 = 4;

    pub fn from_mtime(mtime: u32) -> Self {
        Self {
            flags: Self::MTIME_BIT,
            mtime: Some(mtime),
            atime: None,
            ctime: None,
        }
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        let (&flags, mut rest) = payload.split_first()?;
        let mut take = |bit: u8| -> Option<u32> {
            if flags & bit == 0 || rest.len() < 4 {
                return None;
            }
            let value = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            rest = &rest[4..];
            Some(value)
        };
        let mtime = take(Self::MTIME_BIT);
        let atime = take(Self::ATIME_BIT);
        let ctime = take(Self::CTIME_BIT);
        Some(Self {
            flags,
            mtime,
            atime,
            ctime,
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = vec![self.flags];
        for value in [self.mtime, self.atime, self.ctime].into_iter().flatten() {
            out.write_u32::<LittleEndian>(value).unwrap();
        }
        out
    }

    /// Central-directory payload: flags plus the modification time only.
    pub fn payload_central(&self) -> Vec<u8> {
        let mut out = vec![self.flags];
        if let Some(mtime) = self.mtime {
            out.write_u32::<LittleEndian>(mtime).unwrap();
        }
        out
    }
}

/// NTFS extra field (0x000A) with three Windows FILETIME values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtfsExtraField {
    /// 100-nanosecond intervals since 1601-01-01.
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
}

impl NtfsExtraField {
    pub const TAG: u16 = 0x000A;

    fn parse(payload: &[u8]) -> Option<Self> {
        // 4 reserved bytes, then tag/size TLVs
        let mut rest = payload.get(4..)?;
        while rest.len() >= 4 {
            let tag = u16::from_le_bytes([rest[0], rest[1]]);
            let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if rest.len() < size {
                return None;
            }
            if tag == 0x0001 && size >= 24 {
                let mut cursor = Cursor::new(&rest[..24]);
                return Some(Self {
                    mtime: cursor.read_u64::<LittleEndian>().ok()?,
                    atime: cursor.read_u64::<LittleEndian>().ok()?,
                    ctime: cursor.read_u64::<LittleEndian>().ok()?,
                });
            }
            rest = &rest[size..];
        }
        None
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.write_u32::<LittleEndian>(0).unwrap(); // reserved
        out.write_u16::<LittleEndian>(0x0001).unwrap();
        out.write_u16::<LittleEndian>(24).unwrap();
        out.write_u64::<LittleEndian>(self.mtime).unwrap();
        out.write_u64::<LittleEndian>(self.atime).unwrap();
        out.write_u64::<LittleEndian>(self.ctime).unwrap();
        out
    }

    /// Modification time as seconds since the Unix epoch.
    pub fn mtime_unix(&self) -> i64 {
        filetime_to_unix(self.mtime)
    }

    pub fn atime_unix(&self) -> i64 {
        filetime_to_unix(self.atime)
    }

    pub fn ctime_unix(&self) -> i64 {
        filetime_to_unix(self.ctime)
    }
}

fn filetime_to_unix(filetime: u64) -> i64 {
    (filetime / 10_000_000) as i64 - FILETIME_EPOCH_OFFSET_SECS
}

/// Info-ZIP "new" Unix extra field (0x7875): variable-width UID/GID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixExtraField {
    pub uid: u64,
    pub gid: u64,
}

impl UnixExtraField {
    pub const TAG: u16 = 0x7875;
    const VERSION: u8 = 1;

    fn parse(payload: &[u8]) -> Option<Self> {
        let (&version, rest) = payload.split_first()?;
        if version != Self::VERSION {
            return None;
        }
        let (uid, rest) = read_sized_int(rest)?;
        let (gid, _) = read_sized_int(rest)?;
        Some(Self { uid, gid })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = vec![Self::VERSION];
        out.push(4);
        out.write_u32::<LittleEndian>(self.uid as u32).unwrap();
        out.push(4);
        out.write_u32::<LittleEndian>(self.gid as u32).unwrap();
        out
    }
}

// Reads a (size u8, little-endian integer) pair of at most 8 bytes.
fn read_sized_int(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let (&size, rest) = bytes.split_first()?;
    let size = size as usize;
    if size > 8 || rest.len() < size {
        return None;
    }
    let mut value = 0u64;
    for (i, &b) in rest[..size].iter().enumerate() {
        value |= (b as u64) << (8 * i);
    }
    Some((value, &rest[size..]))
}

/// Info-ZIP "old" Unix extra field (0x5855): timestamps plus optional
/// UID/GID in the local-header copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixOldExtraField {
    pub atime: u32,
    pub mtime: u32,
    pub uid: Option<u16>,
    pub gid: Option<u16>,
}

impl UnixOldExtraField {
    pub const TAG: u16 = 0x5855;

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 8 {
            return None;
        }
        let mut cursor = Cursor::new(payload);
        let atime = cursor.read_u32::<LittleEndian>().ok()?;
        let mtime = cursor.read_u32::<LittleEndian>().ok()?;
        let (uid, gid) = if payload.len() >= 12 {
            (
                cursor.read_u16::<LittleEndian>().ok(),
                cursor.read_u16::<LittleEndian>().ok(),
            )
        } else {
            (None, None)
        };
        Some(Self {
            atime,
            mtime,
            uid,
            gid,
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.write_u32::<LittleEndian>(self.atime).unwrap();
        out.write_u32::<LittleEndian>(self.mtime).unwrap();
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            out.write_u16::<LittleEndian>(uid).unwrap();
            out.write_u16::<LittleEndian>(gid).unwrap();
        }
        out
    }
}

/// WinZip AES extra field (0x9901).
///
/// Parsed only far enough to refuse encrypted entries with a precise
/// error and to report the actual compression method hidden behind
/// method code 99.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// AE-1 or AE-2
    pub vendor_version: u16,
    /// 1 = AES-128, 2 = AES-192, 3 = AES-256
    pub strength: u8,
    /// The real method of the encrypted data.
    pub actual_method: u16,
}

impl AesExtraField {
    pub const TAG: u16 = 0x9901;
    const VENDOR_ID: [u8; 2] = *b"AE";

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 7 || payload[2..4] != Self::VENDOR_ID {
            return None;
        }
        Some(Self {
            vendor_version: u16::from_le_bytes([payload[0], payload[1]]),
            strength: payload[4],
            actual_method: u16::from_le_bytes([payload[5], payload[6]]),
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7);
        out.write_u16::<LittleEndian>(self.vendor_version).unwrap();
        out.extend_from_slice(&Self::VENDOR_ID);
        out.push(self.strength);
        out.write_u16::<LittleEndian>(self.actual_method).unwrap();
        out
    }
}
