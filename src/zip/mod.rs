//! ZIP archive support: seekable reading, streaming reading and writing.

pub mod entry;
pub mod extra;
pub mod reader;
pub mod stream;
pub mod writer;

pub use entry::{CommentSource, NameSource, ZipEntry};
pub use extra::ExtraField;
pub use reader::{ZipArchive, ZipReaderOptions};
pub use stream::ZipStreamReader;
pub use writer::{SeekableSink, StreamSink, UnicodeExtraPolicy, Zip64Mode, ZipWriter};

/// Local file header signature `PK\x03\x04`.
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;

/// Central directory record signature `PK\x01\x02`.
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4B50;

/// End of central directory signature `PK\x05\x06`.
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4B50;

/// ZIP64 end of central directory record signature `PK\x06\x06`.
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;

/// ZIP64 end of central directory locator signature `PK\x06\x07`.
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;

/// Data descriptor signature `PK\x07\x08` (also the split-archive marker).
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;

/// Sentinel in 32-bit size/offset fields indicating a ZIP64 extra field.
pub const ZIP64_MAGIC: u32 = 0xFFFF_FFFF;

/// Sentinel in 16-bit count fields indicating a ZIP64 extra field.
pub const ZIP64_MAGIC_SHORT: u16 = 0xFFFF;

/// Compression method recorded in local and central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMethod {
    Stored,
    Deflated,
    Deflate64,
    Bzip2,
    Lzma,
    Zstd,
    Xz,
    Ppmd,
    /// Method code this library has no name for.
    Unknown(u16),
}

impl ZipMethod {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ZipMethod::Stored,
            8 => ZipMethod::Deflated,
            9 => ZipMethod::Deflate64,
            12 => ZipMethod::Bzip2,
            14 => ZipMethod::Lzma,
            93 => ZipMethod::Zstd,
            95 => ZipMethod::Xz,
            98 => ZipMethod::Ppmd,
            other => ZipMethod::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            ZipMethod::Stored => 0,
            ZipMethod::Deflated => 8,
            ZipMethod::Deflate64 => 9,
            ZipMethod::Bzip2 => 12,
            ZipMethod::Lzma => 14,
            ZipMethod::Zstd => 93,
            ZipMethod::Xz => 95,
            ZipMethod::Ppmd => 98,
            ZipMethod::Unknown(code) => code,
        }
    }
}

/// The 16-bit general purpose bit flag of local and central records.
///
/// Only the bits this library interprets are exposed; the raw value is
/// preserved so unknown bits round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeneralPurposeBit(u16);

impl GeneralPurposeBit {
    const ENCRYPTION: u16 = 1 << 0;
    const DATA_DESCRIPTOR: u16 = 1 << 3;
    const STRONG_ENCRYPTION: u16 = 1 << 6;
    const UTF8_NAMES: u16 = 1 << 11;
    const CENTRAL_DIRECTORY_ENCRYPTION: u16 = 1 << 13;

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn uses_encryption(self) -> bool {
        self.0 & Self::ENCRYPTION != 0
    }

    pub fn uses_strong_encryption(self) -> bool {
        self.0 & Self::STRONG_ENCRYPTION != 0
            || self.0 & Self::CENTRAL_DIRECTORY_ENCRYPTION != 0
    }

    pub fn uses_data_descriptor(self) -> bool {
        self.0 & Self::DATA_DESCRIPTOR != 0
    }

    pub fn uses_utf8_names(self) -> bool {
        self.0 & Self::UTF8_NAMES != 0
    }

    pub fn set_data_descriptor(&mut self, value: bool) {
        self.set(Self::DATA_DESCRIPTOR, value);
    }

    pub fn set_utf8_names(&mut self, value: bool) {
        self.set(Self::UTF8_NAMES, value);
    }

    fn set(&mut self, mask: u16, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}
