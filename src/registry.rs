//! Pluggable compressor registry.
//!
//! Maps textual codec names and ZIP method codes to stream factories. The
//! built-in set covers the codecs this crate links (deflate, gzip, bzip2,
//! xz, lzma, zstd) plus detection-only entries for formats whose magic we
//! can recognize without being able to decode them. Registering a codec
//! under an existing name replaces it, so callers can override or extend
//! the built-ins.

use crate::error::{ArchiveError, Result};
use std::io::{self, Read, Write};

/// Number of leading bytes [`CompressorRegistry::detect`] inspects.
pub const SIGNATURE_PROBE_LENGTH: usize = 12;

type DecoderFn =
    for<'a> fn(Box<dyn Read + 'a>, Option<u64>) -> Result<Box<dyn Read + 'a>>;
type EncoderFn =
    for<'a> fn(Box<dyn Write + 'a>, u32) -> Result<Box<dyn CompressorWrite + 'a>>;

/// Compressing writer that must be finished to flush stream trailers.
pub trait CompressorWrite: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> CompressorWrite for flate2::write::DeflateEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

impl<W: Write> CompressorWrite for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

#[cfg(feature = "bzip2-support")]
impl<W: Write> CompressorWrite for bzip2::write::BzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

#[cfg(feature = "xz-support")]
impl<W: Write> CompressorWrite for xz2::write::XzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

#[cfg(feature = "zstd-support")]
impl<W: Write> CompressorWrite for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish().map(|_| ())
    }
}

/// One registered codec.
#[derive(Debug)]
pub struct Codec {
    name: &'static str,
    zip_method: Option<u16>,
    matches: fn(&[u8]) -> bool,
    decoder: Option<DecoderFn>,
    encoder: Option<EncoderFn>,
}

impl Codec {
    pub fn new(
        name: &'static str,
        zip_method: Option<u16>,
        matches: fn(&[u8]) -> bool,
        decoder: Option<DecoderFn>,
        encoder: Option<EncoderFn>,
    ) -> Self {
        Self {
            name,
            zip_method,
            matches,
            decoder,
            encoder,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// ZIP method code served by this codec, if it is a ZIP method.
    pub fn zip_method(&self) -> Option<u16> {
        self.zip_method
    }

    /// Whether this codec can produce a decompressing reader.
    pub fn is_input_available(&self) -> bool {
        self.decoder.is_some()
    }

    /// Whether this codec can produce a compressing writer.
    pub fn is_output_available(&self) -> bool {
        self.encoder.is_some()
    }

    /// Signature probe over the leading bytes of a stream.
    pub fn matches(&self, signature: &[u8]) -> bool {
        (self.matches)(signature)
    }

    /// Wraps `source` in a decompressing reader.
    ///
    /// `memory_limit_kb` bounds decoder allocations for codecs that buffer
    /// (xz/lzma); exceeding it surfaces as
    /// [`ArchiveError::MemoryLimitExceeded`].
    pub fn decoder<'a>(
        &self,
        source: Box<dyn Read + 'a>,
        memory_limit_kb: Option<u64>,
    ) -> Result<Box<dyn Read + 'a>> {
        match self.decoder {
            Some(make) => make(source, memory_limit_kb),
            None => Err(ArchiveError::Unsupported(format!(
                "codec {} cannot decompress",
                self.name
            ))),
        }
    }

    /// Wraps `sink` in a compressing writer at the given level.
    pub fn encoder<'a>(
        &self,
        sink: Box<dyn Write + 'a>,
        level: u32,
    ) -> Result<Box<dyn CompressorWrite + 'a>> {
        match self.encoder {
            Some(make) => make(sink, level),
            None => Err(ArchiveError::Unsupported(format!(
                "codec {} cannot compress",
                self.name
            ))),
        }
    }
}

/// Registry of codecs, ordered by registration for auto-detection.
#[derive(Debug)]
pub struct CompressorRegistry {
    codecs: Vec<Codec>,
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CompressorRegistry {
    /// Registry with no codecs.
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Registry with every codec this build knows about.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Codec::new(
            "deflate",
            Some(8),
            matches_zlib,
            Some(make_deflate_decoder),
            Some(make_deflate_encoder),
        ));
        registry.register(Codec::new(
            "gzip",
            None,
            |sig| sig.starts_with(&[0x1F, 0x8B]),
            Some(make_gzip_decoder),
            Some(make_gzip_encoder),
        ));
        #[cfg(feature = "bzip2-support")]
        registry.register(Codec::new(
            "bzip2",
            Some(12),
            |sig| sig.starts_with(b"BZh"),
            Some(make_bzip2_decoder),
            Some(make_bzip2_encoder),
        ));
        #[cfg(feature = "xz-support")]
        registry.register(Codec::new(
            "xz",
            Some(95),
            |sig| sig.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
            Some(make_xz_decoder),
            Some(make_xz_encoder),
        ));
        #[cfg(feature = "xz-support")]
        registry.register(Codec::new(
            "lzma",
            Some(14),
            |sig| sig.starts_with(&[0x5D, 0x00, 0x00]),
            Some(make_lzma_decoder),
            None,
        ));
        #[cfg(feature = "zstd-support")]
        registry.register(Codec::new(
            "zstd",
            Some(93),
            |sig| sig.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]),
            Some(make_zstd_decoder),
            None,
        ));
        // Detection-only codecs: their magic is recognized so callers get a
        // precise "cannot decompress" answer instead of garbage.
        registry.register(Codec::new(
            "snappy-framed",
            None,
            |sig| sig.starts_with(&[0xFF, 0x06, 0x00, 0x00, 0x73, 0x4E, 0x61, 0x50, 0x70, 0x59]),
            None,
            None,
        ));
        registry.register(Codec::new(
            "lz4-framed",
            None,
            |sig| sig.starts_with(&[0x04, 0x22, 0x4D, 0x18]),
            None,
            None,
        ));
        registry.register(Codec::new("lz4-block", None, |_| false, None, None));
        registry.register(Codec::new(
            "z",
            None,
            |sig| sig.starts_with(&[0x1F, 0x9D]),
            None,
            None,
        ));
        registry.register(Codec::new(
            "pack200",
            None,
            |sig| sig.starts_with(&[0xCA, 0xFE, 0xD0, 0x0D]),
            None,
            None,
        ));
        registry
    }

    /// Adds a codec; an existing codec with the same name is replaced in
    /// place, keeping its detection priority.
    pub fn register(&mut self, codec: Codec) {
        match self
            .codecs
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(codec.name))
        {
            Some(i) => self.codecs[i] = codec,
            None => self.codecs.push(codec),
        }
    }

    /// Looks up a codec by case-insensitive name.
    pub fn by_name(&self, name: &str) -> Option<&Codec> {
        self.codecs
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Looks up the codec serving a ZIP method code.
    pub fn by_zip_method(&self, code: u16) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.zip_method == Some(code))
    }

    /// Identifies a compressed stream from its leading bytes (callers
    /// should pass [`SIGNATURE_PROBE_LENGTH`] bytes when available).
    pub fn detect(&self, signature: &[u8]) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.matches(signature))
    }

    /// Registered codec names in detection order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.iter().map(|c| c.name)
    }
}

// zlib-wrapped deflate: 0x78 followed by a standard flag byte.
fn matches_zlib(sig: &[u8]) -> bool {
    sig.len() >= 2 && sig[0] == 0x78 && matches!(sig[1], 0x01 | 0x5E | 0x9C | 0xDA)
}

fn make_deflate_decoder<'a>(
    source: Box<dyn Read + 'a>,
    _memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(flate2::read::DeflateDecoder::new(source)))
}

fn make_deflate_encoder<'a>(
    sink: Box<dyn Write + 'a>,
    level: u32,
) -> Result<Box<dyn CompressorWrite + 'a>> {
    Ok(Box::new(flate2::write::DeflateEncoder::new(
        sink,
        flate2::Compression::new(level.min(9)),
    )))
}

fn make_gzip_decoder<'a>(
    source: Box<dyn Read + 'a>,
    _memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(flate2::read::MultiGzDecoder::new(source)))
}

fn make_gzip_encoder<'a>(
    sink: Box<dyn Write + 'a>,
    level: u32,
) -> Result<Box<dyn CompressorWrite + 'a>> {
    Ok(Box::new(flate2::write::GzEncoder::new(
        sink,
        flate2::Compression::new(level.min(9)),
    )))
}

#[cfg(feature = "bzip2-support")]
fn make_bzip2_decoder<'a>(
    source: Box<dyn Read + 'a>,
    _memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(bzip2::read::BzDecoder::new(source)))
}

#[cfg(feature = "bzip2-support")]
fn make_bzip2_encoder<'a>(
    sink: Box<dyn Write + 'a>,
    level: u32,
) -> Result<Box<dyn CompressorWrite + 'a>> {
    Ok(Box::new(bzip2::write::BzEncoder::new(
        sink,
        bzip2::Compression::new(level.clamp(1, 9)),
    )))
}

#[cfg(feature = "xz-support")]
fn make_xz_encoder<'a>(
    sink: Box<dyn Write + 'a>,
    level: u32,
) -> Result<Box<dyn CompressorWrite + 'a>> {
    Ok(Box::new(xz2::write::XzEncoder::new(sink, level.min(9))))
}

#[cfg(feature = "zstd-support")]
fn make_zstd_decoder<'a>(
    source: Box<dyn Read + 'a>,
    _memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(zstd::stream::read::Decoder::new(source)?))
}

#[cfg(feature = "xz-support")]
fn make_xz_decoder<'a>(
    source: Box<dyn Read + 'a>,
    memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    match memory_limit_kb {
        Some(limit_kb) => {
            let stream = xz2::stream::Stream::new_stream_decoder(limit_kb * 1024, 0)
                .map_err(xz_setup_error)?;
            Ok(Box::new(XzMemGuard {
                inner: xz2::read::XzDecoder::new_stream(source, stream),
                limit_kb,
            }))
        }
        None => Ok(Box::new(xz2::read::XzDecoder::new(source))),
    }
}

#[cfg(feature = "xz-support")]
fn make_lzma_decoder<'a>(
    source: Box<dyn Read + 'a>,
    memory_limit_kb: Option<u64>,
) -> Result<Box<dyn Read + 'a>> {
    let limit = memory_limit_kb.map_or(u64::MAX, |kb| kb * 1024);
    let stream = xz2::stream::Stream::new_lzma_decoder(limit).map_err(xz_setup_error)?;
    let decoder = xz2::read::XzDecoder::new_stream(source, stream);
    match memory_limit_kb {
        Some(limit_kb) => Ok(Box::new(XzMemGuard {
            inner: decoder,
            limit_kb,
        })),
        None => Ok(Box::new(decoder)),
    }
}

#[cfg(feature = "xz-support")]
fn xz_setup_error(err: xz2::stream::Error) -> ArchiveError {
    ArchiveError::Format(format!("cannot initialize xz decoder: {err}"))
}

/// Translates liblzma's memory-limit failure into the crate error so a
/// configured budget is reported as such instead of a generic I/O error.
#[cfg(feature = "xz-support")]
struct XzMemGuard<R: Read> {
    inner: xz2::read::XzDecoder<R>,
    limit_kb: u64,
}

#[cfg(feature = "xz-support")]
impl<R: Read> Read for XzMemGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|err| {
            let is_memlimit = err
                .get_ref()
                .and_then(|e| e.downcast_ref::<xz2::stream::Error>())
                .map_or(false, |e| matches!(e, xz2::stream::Error::MemLimit));
            if is_memlimit {
                ArchiveError::MemoryLimitExceeded {
                    limit_kb: self.limit_kb,
                }
                .into()
            } else {
                err
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_by_name_is_case_insensitive() {
        let registry = CompressorRegistry::builtin();
        assert!(registry.by_name("GZIP").is_some());
        assert!(registry.by_name("deflate").is_some());
        assert!(registry.by_name("nonesuch").is_none());
    }

    #[test]
    fn zip_method_lookup() {
        let registry = CompressorRegistry::builtin();
        assert_eq!(registry.by_zip_method(8).unwrap().name(), "deflate");
        assert!(registry.by_zip_method(99).is_none());
    }

    #[test]
    fn signature_detection() {
        let registry = CompressorRegistry::builtin();
        assert_eq!(
            registry.detect(&[0x1F, 0x8B, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap().name(),
            "gzip"
        );
        assert_eq!(
            registry.detect(b"BZh91AY&SY\x00\x00").unwrap().name(),
            "bzip2"
        );
        assert_eq!(
            registry.detect(&[0x1F, 0x9D, 0x90, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap().name(),
            "z"
        );
        assert!(registry.detect(b"PK\x03\x04....").is_none());
    }

    #[test]
    fn detection_only_codecs_refuse_streams() {
        let registry = CompressorRegistry::builtin();
        let z = registry.by_name("z").unwrap();
        assert!(!z.is_input_available());
        assert!(!z.is_output_available());
        match z.decoder(Box::new(&b""[..]), None) {
            Err(ArchiveError::Unsupported(_)) => {}
            Err(_) => panic!("expected ArchiveError::Unsupported"),
            Ok(_) => panic!("expected an error, got Ok"),
        }
    }

    #[test]
    fn registration_overrides_by_name() {
        let mut registry = CompressorRegistry::builtin();
        let before = registry.names().count();
        registry.register(Codec::new("gzip", None, |_| false, None, None));
        assert_eq!(registry.names().count(), before);
        assert!(!registry.by_name("gzip").unwrap().is_input_available());
    }

    #[test]
    fn deflate_round_trip_through_registry() {
        use std::io::Write as _;
        let registry = CompressorRegistry::builtin();
        let codec = registry.by_name("deflate").unwrap();

        let mut compressed = Vec::new();
        let mut encoder = codec.encoder(Box::new(&mut compressed), 6).unwrap();
        encoder.write_all(b"registry round trip payload").unwrap();
        encoder.finish().unwrap();

        let mut decoder = codec.decoder(Box::new(&compressed[..]), None).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"registry round trip payload");
    }
}
