use s_arc::zip::SeekableSink;
use s_arc::{
    ArchiveError, Encoding, NameSource, UnicodeExtraPolicy, ZipArchive, ZipEntry, ZipMethod,
    ZipReaderOptions, ZipWriter,
};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

fn write_archive(build: impl FnOnce(&mut ZipWriter<SeekableSink<Cursor<Vec<u8>>>>)) -> Vec<u8> {
    let mut writer = ZipWriter::new_seekable(Cursor::new(Vec::new()));
    build(&mut writer);
    writer.close().unwrap().into_inner().into_inner()
}

#[test]
fn round_trip_single_entry() {
    let bytes = write_archive(|writer| {
        let mut entry = ZipEntry::new("test1.xml");
        entry.set_method(ZipMethod::Deflated);
        writer.put_entry(entry).unwrap();
        writer.write(b"Hello").unwrap();
        writer.close_entry().unwrap();
    });

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.entries().len(), 1);
    let entry = archive.entries()[0].clone();
    assert_eq!(entry.name(), "test1.xml");
    assert_eq!(entry.method(), Some(ZipMethod::Deflated));
    assert_eq!(entry.size(), Some(5));
    assert_eq!(entry.crc32(), crc32fast::hash(b"Hello"));

    let mut reader = archive.reader(&entry).unwrap();
    let mut buf = [0u8; 6];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], b"Hello");
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn duplicate_names_keep_central_directory_order() {
    let bytes = write_archive(|writer| {
        for content in [&b"first copy"[..], b"second copy"] {
            writer.put_entry(ZipEntry::new("dup.txt")).unwrap();
            writer.write(content).unwrap();
            writer.close_entry().unwrap();
        }
    });

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let duplicates: Vec<ZipEntry> = archive
        .entries_by_name("dup.txt")
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(duplicates.len(), 2);

    let mut contents = Vec::new();
    for entry in &duplicates {
        let mut reader = archive.reader(entry).unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        contents.push(data);
    }
    assert_eq!(contents[0], b"first copy");
    assert_eq!(contents[1], b"second copy");
}

#[test]
fn comments_round_trip() {
    let bytes = write_archive(|writer| {
        writer.set_comment("archive level comment");
        let mut entry = ZipEntry::new("a.txt");
        entry.set_comment("entry level comment");
        writer.put_entry(entry).unwrap();
        writer.write(b"x").unwrap();
        writer.close_entry().unwrap();
    });

    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.comment(), "archive level comment");
    assert_eq!(archive.entries()[0].comment(), "entry level comment");
}

#[test]
fn directory_entries_round_trip() {
    let bytes = write_archive(|writer| {
        writer.put_entry(ZipEntry::directory("docs")).unwrap();
        writer.close_entry().unwrap();
        writer.put_entry(ZipEntry::new("docs/readme.txt")).unwrap();
        writer.write(b"contents").unwrap();
        writer.close_entry().unwrap();
    });

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let dir = archive.entries()[0].clone();
    assert!(dir.is_directory());
    assert_eq!(dir.size(), Some(0));
    assert_eq!(dir.method(), Some(ZipMethod::Stored));

    let mut reader = archive.reader(&dir).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn stored_entries_round_trip_on_seekable_output() {
    let data = b"stored, never deflated";
    let bytes = write_archive(|writer| {
        let mut entry = ZipEntry::new("raw.bin");
        entry.set_method(ZipMethod::Stored);
        writer.put_entry(entry).unwrap();
        writer.write(data).unwrap();
        writer.close_entry().unwrap();
    });

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entries()[0].clone();
    assert_eq!(entry.method(), Some(ZipMethod::Stored));
    assert_eq!(entry.compressed_size(), Some(data.len() as u64));
    assert_eq!(archive.read_entry_by_name("raw.bin").unwrap(), data);
}

#[test]
fn modification_time_round_trips_at_dos_granularity() {
    let mtime = 1_700_000_000i64; // even, fits DOS range
    let bytes = write_archive(|writer| {
        let mut entry = ZipEntry::new("timed.txt");
        entry.set_mtime_unix(mtime);
        writer.put_entry(entry).unwrap();
        writer.write(b"tick").unwrap();
        writer.close_entry().unwrap();
    });

    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.entries()[0].mtime_unix(), mtime);
    assert_eq!(
        s_arc::dostime::dos_to_unix(archive.entries()[0].dos_time()),
        mtime
    );
}

#[test]
fn corrupted_data_fails_on_read() {
    let mut bytes = write_archive(|writer| {
        writer.put_entry(ZipEntry::new("a.bin")).unwrap();
        writer.write(b"some reasonably compressible payload payload payload").unwrap();
        writer.close_entry().unwrap();
    });

    // flip one byte inside the compressed data (header is 30 + name)
    let data_offset = 30 + "a.bin".len();
    bytes[data_offset + 3] ^= 0x20;

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entries()[0].clone();
    let mut reader = archive.reader(&entry).unwrap();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).unwrap_err();
    // either the CRC check or the inflater itself trips
    match ArchiveError::from_io(err) {
        ArchiveError::CrcMismatch { .. } | ArchiveError::Io(_) => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unicode_extra_fields_control_the_decoded_name() {
    let bytes = write_archive(|writer| {
        writer.set_encoding(Some(Encoding::Cp437));
        writer.set_create_unicode_extra_fields(UnicodeExtraPolicy::Always);
        writer.put_entry(ZipEntry::new("café.txt")).unwrap();
        writer.write(b"beans").unwrap();
        writer.close_entry().unwrap();
    });

    // with Unicode extras honored the name comes from the extra field
    let options = ZipReaderOptions {
        encoding: Encoding::Cp437,
        ..Default::default()
    };
    let archive = ZipArchive::open_with_options(Cursor::new(bytes.clone()), options).unwrap();
    let entry = &archive.entries()[0];
    assert_eq!(entry.name(), "café.txt");
    assert_eq!(entry.name_source(), NameSource::UnicodeExtraField);
    assert_eq!(entry.raw_name(), b"caf\x82.txt");

    // with them disabled the raw CP437 bytes decide
    let options = ZipReaderOptions {
        encoding: Encoding::Cp437,
        use_unicode_extra_fields: false,
        ..Default::default()
    };
    let archive = ZipArchive::open_with_options(Cursor::new(bytes.clone()), options).unwrap();
    let entry = &archive.entries()[0];
    assert_eq!(entry.name(), "café.txt");
    assert_eq!(entry.name_source(), NameSource::RawBytes);

    // a wrong declared encoding without the extras falls back lossily
    let options = ZipReaderOptions {
        encoding: Encoding::Utf8,
        use_unicode_extra_fields: false,
        ..Default::default()
    };
    let archive = ZipArchive::open_with_options(Cursor::new(bytes), options).unwrap();
    assert_eq!(archive.entries()[0].name_source(), NameSource::Fallback);
}

#[test]
fn utf8_names_carry_the_language_encoding_flag() {
    let bytes = write_archive(|writer| {
        writer.put_entry(ZipEntry::new("plain.txt")).unwrap();
        writer.write(b"x").unwrap();
        writer.close_entry().unwrap();
    });

    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = &archive.entries()[0];
    assert!(entry.flags().uses_utf8_names());
    assert_eq!(entry.name_source(), NameSource::Utf8Flag);
}

// Minimal expander used to check the zip-slip guard: entries whose
// normalized path would leave the target directory are refused.
fn safe_destination(target: &Path, entry_name: &str) -> Option<PathBuf> {
    let mut resolved = target.to_path_buf();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    resolved.starts_with(target).then_some(resolved)
}

#[test]
fn zip_slip_entries_are_readable_but_not_extractable() {
    let bytes = write_archive(|writer| {
        writer.put_entry(ZipEntry::new("../evil.txt")).unwrap();
        writer.write(b"outside").unwrap();
        writer.close_entry().unwrap();
        writer.put_entry(ZipEntry::new("good.txt")).unwrap();
        writer.write(b"inside").unwrap();
        writer.close_entry().unwrap();
    });

    // the reader itself accepts the entry
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.entries().len(), 2);
    assert_eq!(archive.read_entry_by_name("../evil.txt").unwrap(), b"outside");

    // a path-checking expander refuses to materialize it
    let target = Path::new("/tmp/extraction-target");
    assert_eq!(safe_destination(target, "../evil.txt"), None);
    assert_eq!(
        safe_destination(target, "good.txt"),
        Some(target.join("good.txt"))
    );
    assert_eq!(safe_destination(target, "a/../../b"), None);
    assert_eq!(safe_destination(target, "/abs/path"), None);
}

#[test]
fn raw_reader_returns_compressed_bytes() {
    let bytes = write_archive(|writer| {
        writer.put_entry(ZipEntry::new("z.txt")).unwrap();
        writer.write(b"raw access test data, raw access test data").unwrap();
        writer.close_entry().unwrap();
    });

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entries()[0].clone();
    let mut raw = archive.raw_reader(&entry).unwrap();
    let mut compressed = Vec::new();
    raw.read_to_end(&mut compressed).unwrap();
    assert_eq!(compressed.len() as u64, entry.compressed_size().unwrap());

    // the raw bytes inflate to the original data
    let mut decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).unwrap();
    assert_eq!(inflated, b"raw access test data, raw access test data");
}

#[test]
fn encrypted_entries_are_refused() {
    // craft a stored entry with general purpose bit 0 set
    let mut bytes = write_archive(|writer| {
        let mut entry = ZipEntry::new("sec.bin");
        entry.set_method(ZipMethod::Stored);
        writer.put_entry(entry).unwrap();
        writer.write(b"data").unwrap();
        writer.close_entry().unwrap();
    });
    // set the encryption bit in both the local header and the central
    // record flag fields
    bytes[6] |= 0x01;
    let cd_sig = [0x50, 0x4B, 0x01, 0x02];
    let cd_pos = bytes
        .windows(4)
        .position(|w| w == cd_sig)
        .expect("central directory present");
    bytes[cd_pos + 8] |= 0x01;

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.entries()[0].clone();
    assert!(entry.is_encrypted());
    match archive.reader(&entry) {
        Err(ArchiveError::Unsupported(_)) => {}
        Err(other) => panic!("expected ArchiveError::Unsupported, got {:?}", other),
        Ok(_) => panic!("expected an error, got Ok"),
    };
}
