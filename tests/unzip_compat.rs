use s_arc::{ZipEntry, ZipWriter};
use std::process::Command;
use tempfile::tempdir;

// Writes a ZIP with the library and asks the system `unzip -t` to verify
// it. Skipped when `unzip` is not installed.

#[test]
fn unzip_accepts_seekable_output() {
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    {
        let mut writer = ZipWriter::create(&zip_path).unwrap();
        writer.put_entry(ZipEntry::new("hello.txt")).unwrap();
        writer.write(b"hello from test").unwrap();
        writer.close_entry().unwrap();

        writer.put_entry(ZipEntry::new("big.bin")).unwrap();
        // enough data to make a non-trivial archive
        for _ in 0..1024 {
            writer.write(&[0u8; 1024]).unwrap();
        }
        writer.close_entry().unwrap();

        writer.put_entry(ZipEntry::directory("empty-dir")).unwrap();
        writer.close_entry().unwrap();

        writer.finish().unwrap();
    }

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}
