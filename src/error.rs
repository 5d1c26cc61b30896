//! Error types for s-arc

use std::io;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error types that can occur while reading or writing archives
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error from the underlying byte source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unrecognized archive structure
    #[error("invalid archive format: {0}")]
    Format(String),

    /// Feature the library does not support (encryption, multi-volume, ...)
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Compression method with no registered codec
    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// Stored CRC-32 does not match the data
    #[error("CRC-32 mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Declared size does not match the number of bytes produced
    #[error("size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    /// A buffering decompressor would exceed the configured memory budget
    #[error("memory limit of {limit_kb} KiB exceeded")]
    MemoryLimitExceeded { limit_kb: u64 },

    /// Operation called in the wrong order (read before first entry, ...)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Entry not found in the archive
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

impl ArchiveError {
    /// Recovers a structured error that crossed a `std::io::Read` boundary.
    ///
    /// The per-entry readers implement `Read` and therefore report CRC and
    /// size failures as `io::Error` values wrapping an `ArchiveError`. This
    /// unwraps such values back into the original error and falls back to
    /// `ArchiveError::Io` for plain I/O failures.
    pub fn from_io(err: io::Error) -> ArchiveError {
        if err.get_ref().map_or(false, |e| e.is::<ArchiveError>()) {
            let kind = err.kind();
            if let Some(inner) = err.into_inner() {
                match inner.downcast::<ArchiveError>() {
                    Ok(archive_err) => return *archive_err,
                    Err(inner) => return ArchiveError::Io(io::Error::new(kind, inner)),
                }
            }
            return ArchiveError::Io(io::Error::new(kind, "I/O error"));
        }
        ArchiveError::Io(err)
    }
}

impl From<ArchiveError> for io::Error {
    fn from(err: ArchiveError) -> io::Error {
        match err {
            ArchiveError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
