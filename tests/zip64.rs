use s_arc::zip::SeekableSink;
use s_arc::{Zip64Mode, ZipArchive, ZipEntry, ZipWriter};
use std::io::{Cursor, Read, Seek, Write};

// Crafts a minimal ZIP64 archive by hand: one stored entry written with a
// data descriptor, a central directory whose 32-bit fields are sentinels
// resolved by the ZIP64 extra field, a ZIP64 EOCD record and locator, and
// a classic EOCD full of placeholders.
#[test]
fn read_crafted_zip64_archive() {
    let mut f = Cursor::new(Vec::new());

    // local file header for a.txt (sizes deferred to the descriptor)
    f.write_all(&[0x50, 0x4b, 0x03, 0x04]).unwrap();
    f.write_all(&[45, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags (bit 3 set)
    f.write_all(&[0, 0]).unwrap(); // stored
    f.write_all(&[0, 0, 0, 0]).unwrap(); // mod time/date
    f.write_all(&0u32.to_le_bytes()).unwrap(); // crc placeholder
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap();
    f.write_all(&5u16.to_le_bytes()).unwrap(); // name length
    f.write_all(&0u16.to_le_bytes()).unwrap(); // extra length
    f.write_all(b"a.txt").unwrap();

    let data = b"hello";
    f.write_all(data).unwrap();

    // ZIP64-style data descriptor with 64-bit sizes
    let crc = crc32fast::hash(data);
    f.write_all(&[0x50, 0x4b, 0x07, 0x08]).unwrap();
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();

    let cd_start = f.stream_position().unwrap();

    // central directory record with sentinel sizes and offset
    f.write_all(&[0x50, 0x4b, 0x01, 0x02]).unwrap();
    f.write_all(&[45, 0]).unwrap(); // version made by
    f.write_all(&[45, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags
    f.write_all(&[0, 0]).unwrap(); // stored
    f.write_all(&[0, 0, 0, 0]).unwrap(); // mod time/date
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // csize sentinel
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // usize sentinel
    f.write_all(&5u16.to_le_bytes()).unwrap(); // name length
    f.write_all(&28u16.to_le_bytes()).unwrap(); // extra length
    f.write_all(&0u16.to_le_bytes()).unwrap(); // comment length
    f.write_all(&0u16.to_le_bytes()).unwrap(); // disk start
    f.write_all(&0u16.to_le_bytes()).unwrap(); // internal attrs
    f.write_all(&0u32.to_le_bytes()).unwrap(); // external attrs
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // offset sentinel
    f.write_all(b"a.txt").unwrap();
    // ZIP64 extra: uncompressed size, compressed size, local header offset
    f.write_all(&0x0001u16.to_le_bytes()).unwrap();
    f.write_all(&24u16.to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&0u64.to_le_bytes()).unwrap();

    let cd_end = f.stream_position().unwrap();

    // ZIP64 EOCD record
    let zip64_eocd_offset = cd_end;
    f.write_all(&[0x50, 0x4b, 0x06, 0x06]).unwrap();
    f.write_all(&44u64.to_le_bytes()).unwrap();
    f.write_all(&[45, 0]).unwrap();
    f.write_all(&[45, 0]).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&1u64.to_le_bytes()).unwrap();
    f.write_all(&1u64.to_le_bytes()).unwrap();
    f.write_all(&(cd_end - cd_start).to_le_bytes()).unwrap();
    f.write_all(&cd_start.to_le_bytes()).unwrap();

    // ZIP64 EOCD locator
    f.write_all(&[0x50, 0x4b, 0x06, 0x07]).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&zip64_eocd_offset.to_le_bytes()).unwrap();
    f.write_all(&1u32.to_le_bytes()).unwrap();

    // classic EOCD with placeholders
    f.write_all(&[0x50, 0x4b, 0x05, 0x06]).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFu16.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFu16.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();

    let mut archive = ZipArchive::open(f).unwrap();
    assert_eq!(archive.entries().len(), 1);
    let entry = archive.entries()[0].clone();
    assert_eq!(entry.name(), "a.txt");
    assert_eq!(entry.size(), Some(5));
    assert_eq!(entry.compressed_size(), Some(5));
    assert_eq!(entry.local_header_offset(), 0);

    let mut reader = archive.reader(&entry).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"hello");
}

fn write_with_mode(mode: Zip64Mode) -> Vec<u8> {
    let mut writer: ZipWriter<SeekableSink<Cursor<Vec<u8>>>> =
        ZipWriter::new_seekable(Cursor::new(Vec::new()));
    writer.set_use_zip64(mode);
    for (name, content) in [("one.txt", &b"first entry"[..]), ("two.txt", b"second entry")] {
        writer.put_entry(ZipEntry::new(name)).unwrap();
        writer.write(content).unwrap();
        writer.close_entry().unwrap();
    }
    writer.close().unwrap().into_inner().into_inner()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn as_needed_mode_writes_no_zip64_structures_for_small_archives() {
    let bytes = write_with_mode(Zip64Mode::AsNeeded);
    assert!(!contains(&bytes, &[0x50, 0x4b, 0x06, 0x06])); // no ZIP64 EOCD
    assert!(!contains(&bytes, &[0x50, 0x4b, 0x06, 0x07])); // no locator
    assert!(!contains(&bytes, &[0x01, 0x00, 0x10, 0x00])); // no 16-byte ZIP64 extra

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.read_entry_by_name("one.txt").unwrap(), b"first entry");
}

#[test]
fn always_mode_writes_zip64_everywhere_and_reads_back() {
    let bytes = write_with_mode(Zip64Mode::Always);
    assert!(contains(&bytes, &[0x50, 0x4b, 0x06, 0x06]));
    assert!(contains(&bytes, &[0x50, 0x4b, 0x06, 0x07]));

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.entries().len(), 2);
    for entry in archive.entries() {
        assert!(
            entry.extra_fields().iter().any(|f| f.tag() == 0x0001),
            "entry {} lacks a ZIP64 extra field",
            entry.name()
        );
    }
    assert_eq!(
        archive.read_entry_by_name("two.txt").unwrap(),
        b"second entry"
    );
}

#[test]
fn never_mode_writes_plain_archives() {
    let bytes = write_with_mode(Zip64Mode::Never);
    assert!(!contains(&bytes, &[0x50, 0x4b, 0x06, 0x06]));
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.read_entry_by_name("one.txt").unwrap(), b"first entry");
}
