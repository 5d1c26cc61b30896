//! Split (spanned) archive support.
//!
//! A split ZIP is stored as numbered segments `base.z01`, `base.z02`, ...
//! with the final segment named `base.zip`. [`MultiSegmentReader`]
//! concatenates the segments into one logical seekable byte source;
//! [`open_split_zip`] discovers the siblings of the final `.zip` segment,
//! validates the spanning signature and returns the combined reader.

use crate::error::{ArchiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Little-endian signature at the start of the first split segment
/// (shared with the data-descriptor record).
pub const SPLIT_SIGNATURE: u32 = 0x0807_4B50;

/// Read-only concatenation of ordered seekable segments.
///
/// Reads and seeks cross segment boundaries transparently. Segments after
/// the active one are not repositioned until the logical position reaches
/// them.
#[derive(Debug)]
pub struct MultiSegmentReader<R: Read + Seek> {
    segments: Vec<R>,
    /// Cumulative end offset of each segment.
    ends: Vec<u64>,
    position: u64,
    current: usize,
}

impl<R: Read + Seek> MultiSegmentReader<R> {
    /// Builds the combined reader, measuring each segment and rewinding it.
    pub fn new(mut segments: Vec<R>) -> Result<Self> {
        if segments.is_empty() {
            return Err(ArchiveError::Format(
                "split archive needs at least one segment".to_string(),
            ));
        }
        let mut ends = Vec::with_capacity(segments.len());
        let mut total = 0u64;
        for seg in &mut segments {
            let len = seg.seek(SeekFrom::End(0))?;
            seg.seek(SeekFrom::Start(0))?;
            total += len;
            ends.push(total);
        }
        Ok(Self {
            segments,
            ends,
            position: 0,
            current: 0,
        })
    }

    /// Total size in bytes across all segments.
    pub fn total_size(&self) -> u64 {
        *self.ends.last().unwrap()
    }

    fn segment_start(&self, index: usize) -> u64 {
        if index == 0 {
            0
        } else {
            self.ends[index - 1]
        }
    }

    fn segment_index_for(&self, pos: u64) -> usize {
        match self.ends.binary_search(&pos) {
            // position equal to a cumulative end belongs to the next segment
            Ok(i) => (i + 1).min(self.segments.len() - 1),
            Err(i) => i.min(self.segments.len() - 1),
        }
    }
}

impl<R: Read + Seek> Read for MultiSegmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.total_size() {
            return Ok(0);
        }
        let mut filled = 0usize;
        while filled < buf.len() && self.position < self.total_size() {
            let n = self.segments[self.current].read(&mut buf[filled..])?;
            if n == 0 {
                // active segment exhausted, move to the next one
                if self.current + 1 >= self.segments.len() {
                    break;
                }
                self.current += 1;
                self.segments[self.current].seek(SeekFrom::Start(0))?;
                continue;
            }
            filled += n;
            self.position += n as u64;
            if self.position == self.ends[self.current] && self.current + 1 < self.segments.len() {
                self.current += 1;
                self.segments[self.current].seek(SeekFrom::Start(0))?;
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> Seek for MultiSegmentReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let total = self.total_size();
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => total as i64 + delta,
            SeekFrom::Current(delta) => self.position as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of split archive",
            ));
        }
        let target = target as u64;
        let index = self.segment_index_for(target);
        let local = target.min(total) - self.segment_start(index);
        self.segments[index].seek(SeekFrom::Start(local))?;
        self.current = index;
        self.position = target;
        Ok(target)
    }
}

/// Lists the segments belonging to a split ZIP, last segment (`.zip`) last.
///
/// Siblings match `<base>.[zZ][0-9]+` and sort by numeric extension; an
/// extension not starting with `z` sorts first.
pub fn split_segments_for(last_segment: &Path) -> Result<Vec<PathBuf>> {
    let extension_ok = last_segment
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"));
    if !extension_ok {
        return Err(ArchiveError::Format(
            "last split segment must have a .zip extension".to_string(),
        ));
    }
    let stem = last_segment
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ArchiveError::Format("split segment has no base name".to_string()))?;

    let parent = last_segment.parent().unwrap_or_else(|| Path::new("."));
    let mut segments = Vec::new();
    if let Ok(dir) = std::fs::read_dir(parent) {
        for dir_entry in dir.flatten() {
            let path = dir_entry.path();
            if is_split_segment_of(&path, stem) {
                segments.push(path);
            }
        }
    }
    segments.sort_by(|a, b| compare_segment_numbers(a, b));
    segments.push(last_segment.to_path_buf());
    Ok(segments)
}

fn is_split_segment_of(path: &Path, stem: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(ext) = name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return false;
    };
    let mut chars = ext.chars();
    matches!(chars.next(), Some('z') | Some('Z'))
        && chars.clone().count() > 0
        && chars.all(|c| c.is_ascii_digit())
}

fn compare_segment_numbers(a: &Path, b: &Path) -> std::cmp::Ordering {
    let number = |p: &Path| -> Option<u32> {
        let ext = p.extension()?.to_str()?;
        let rest = ext.strip_prefix(['z', 'Z'])?;
        rest.parse().ok()
    };
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (None, _) => std::cmp::Ordering::Less,
        (_, None) => std::cmp::Ordering::Greater,
    }
}

/// Opens a split ZIP from its final `.zip` segment.
///
/// When sibling segments exist, the leading four bytes of the first segment
/// must carry the spanning signature `0x08074B50`; the combined reader is
/// rewound to position 0 after validation. A `.zip` without siblings is
/// opened as a single segment with no signature check.
pub fn open_split_zip(last_segment: &Path) -> Result<MultiSegmentReader<File>> {
    let paths = split_segments_for(last_segment)?;
    let multi_part = paths.len() > 1;
    let mut segments = Vec::with_capacity(paths.len());
    for path in &paths {
        segments.push(File::open(path)?);
    }
    let mut combined = MultiSegmentReader::new(segments)?;
    if multi_part {
        validate_split_signature(&mut combined)?;
    }
    Ok(combined)
}

/// Checks the spanning signature at the start of a combined reader and
/// rewinds it to position 0.
pub fn validate_split_signature<R: Read + Seek>(reader: &mut R) -> Result<()> {
    reader.seek(SeekFrom::Start(0))?;
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != SPLIT_SIGNATURE {
        return Err(ArchiveError::Format(
            "first split segment does not begin with the spanning signature".to_string(),
        ));
    }
    reader.seek(SeekFrom::Start(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn three_segments() -> MultiSegmentReader<Cursor<Vec<u8>>> {
        let segments = vec![
            Cursor::new(b"abcde".to_vec()),
            Cursor::new(b"fgh".to_vec()),
            Cursor::new(b"ijklmnop".to_vec()),
        ];
        MultiSegmentReader::new(segments).unwrap()
    }

    #[test]
    fn reads_across_boundaries() {
        let mut reader = three_segments();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefghijklmnop");
        assert_eq!(reader.total_size(), 16);
    }

    #[test]
    fn single_read_spans_multiple_segments() {
        let mut reader = three_segments();
        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdefg");
    }

    #[test]
    fn seek_lands_in_correct_segment() {
        let mut reader = three_segments();
        reader.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ghij");

        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"op");
    }

    #[test]
    fn seek_read_equivalence_with_single_buffer() {
        // every (position, length) window matches the flat equivalent
        let flat = b"abcdefghijklmnop";
        for pos in 0..=flat.len() {
            let mut reader = three_segments();
            reader.seek(SeekFrom::Start(pos as u64)).unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, &flat[pos..], "window at {pos}");
        }
    }

    #[test]
    fn read_at_end_returns_eof() {
        let mut reader = three_segments();
        reader.seek(SeekFrom::Start(16)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn split_signature_validation() {
        let mut good = Cursor::new(vec![0x50, 0x4B, 0x07, 0x08, 1, 2, 3]);
        validate_split_signature(&mut good).unwrap();
        assert_eq!(good.position(), 0);

        let mut bad = Cursor::new(vec![0x50, 0x4B, 0x03, 0x04]);
        assert!(matches!(
            validate_split_signature(&mut bad),
            Err(ArchiveError::Format(_))
        ));
    }

    #[test]
    fn segment_name_matching() {
        assert!(is_split_segment_of(Path::new("/tmp/a.z01"), "a"));
        assert!(is_split_segment_of(Path::new("/tmp/a.Z9"), "a"));
        assert!(!is_split_segment_of(Path::new("/tmp/a.zip"), "a"));
        assert!(!is_split_segment_of(Path::new("/tmp/a.z"), "a"));
        assert!(!is_split_segment_of(Path::new("/tmp/b.z01"), "a"));
        assert!(!is_split_segment_of(Path::new("/tmp/a.z1x"), "a"));
    }

    #[test]
    fn segment_ordering_is_numeric() {
        let mut paths = vec![
            PathBuf::from("a.z10"),
            PathBuf::from("a.z2"),
            PathBuf::from("a.z01"),
        ];
        paths.sort_by(|a, b| compare_segment_numbers(a, b));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a.z01"),
                PathBuf::from("a.z2"),
                PathBuf::from("a.z10"),
            ]
        );
    }
}
