//! # s-arc: Streaming ZIP and ARJ archive library
//!
//! `s-arc` reads and writes ZIP archives and reads ARJ archives through
//! uniform streaming interfaces, with split-volume ZIP support and a
//! pluggable codec registry.
//!
//! ## Features
//!
//! - **Random-access ZIP reading**: central-directory driven, with ZIP64,
//!   Unicode extra fields and per-entry CRC verification
//! - **Streaming ZIP reading**: forward-only over local headers, including
//!   data-descriptor entries, no seeking required
//! - **ZIP writing**: seekable or pure-stream targets, configurable ZIP64
//!   policy, name encodings and Unicode extra fields
//! - **Split ZIP**: transparent concatenation of `.z01`/`.z02`/.../`.zip`
//!   segments
//! - **ARJ reading**: CRC-validated header scanning, STORED entry data
//! - **Codec registry**: deflate, gzip, bzip2, xz, lzma, zstd plus
//!   signature-based auto-detection
//!
//! ## Quick start
//!
//! ### Reading a ZIP file
//!
//! ```no_run
//! use s_arc::ZipArchive;
//!
//! let mut archive = ZipArchive::open_file("archive.zip")?;
//! for entry in archive.entries() {
//!     println!("{}: {:?} bytes", entry.name(), entry.size());
//! }
//! let data = archive.read_entry_by_name("file.txt")?;
//! # Ok::<(), s_arc::ArchiveError>(())
//! ```
//!
//! ### Writing a ZIP file
//!
//! ```no_run
//! use s_arc::{ZipEntry, ZipWriter};
//!
//! let mut writer = ZipWriter::create("output.zip")?;
//! writer.put_entry(ZipEntry::new("file1.txt"))?;
//! writer.write(b"Hello, World!")?;
//! writer.close_entry()?;
//! writer.finish()?;
//! # Ok::<(), s_arc::ArchiveError>(())
//! ```

pub mod arj;
pub mod dostime;
pub mod encoding;
pub mod error;
pub mod registry;
pub mod split;
pub mod streams;
pub mod zip;

pub use arj::{ArjEntry, ArjReader};
pub use encoding::Encoding;
pub use error::{ArchiveError, Result};
pub use registry::{Codec, CompressorRegistry};
pub use split::MultiSegmentReader;
pub use streams::{BoundedReader, Crc32VerifyingReader};
pub use zip::{
    CommentSource, ExtraField, GeneralPurposeBit, NameSource, UnicodeExtraPolicy, Zip64Mode,
    ZipArchive, ZipEntry, ZipMethod, ZipReaderOptions, ZipStreamReader, ZipWriter,
};
