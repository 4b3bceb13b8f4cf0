#![cfg(unix)]

use std::io::Write as _;

use byteflow::{
    BufferOptions, FdReader, FdReaderOptions, FdWriter, FdWriterOptions, FlushType, Reader,
    StatusKind, Writer,
};
use easy_hex::Hex;
use pretty_assertions::assert_eq;

mod test_utils;

fn temp_file_with(content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn dev_null_is_not_random_access() {
    let reader = FdReader::open("/dev/null", FdReaderOptions::new()).unwrap();
    assert!(!reader.supports_random_access());
    assert!(reader.ok());
}

#[test]
fn regular_file_probe_learns_the_size() {
    let file = temp_file_with(&[7u8; 100]);
    let mut reader = FdReader::open(file.path(), FdReaderOptions::new()).unwrap();
    assert!(reader.supports_random_access());
    assert_eq!(reader.size(), Some(100));

    let content = test_utils::read_all(&mut reader);
    assert_eq!(content, vec![7u8; 100]);
}

#[test]
fn open_missing_file_names_the_path() {
    let result = FdReader::open("/definitely/not/here", FdReaderOptions::new());
    let status = result.unwrap_err();
    assert_eq!(status.kind(), StatusKind::NotFound);
    assert!(status.to_string().contains("/definitely/not/here"));
}

#[test]
fn seek_and_reread_matches_direct_read() {
    let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let file = temp_file_with(&content);

    let mut reader = FdReader::open(
        file.path(),
        FdReaderOptions::new().with_buffer_options(BufferOptions::new().with_buffer_size(64)),
    )
    .unwrap();
    let mut head = [0u8; 1000];
    assert_eq!(reader.read(&mut head), 1000);

    assert!(reader.seek(123));
    assert_eq!(reader.pos(), 123);
    let rest = test_utils::read_all(&mut reader);
    assert_eq!(Hex(rest), Hex(content[123..].to_vec()));

    // Seeking past the end parks at the end without failing.
    assert!(!reader.seek(1_000_000));
    assert!(reader.ok());
    assert_eq!(reader.pos(), 10_000);
}

#[test]
fn assumed_pos_disables_random_access() {
    let file = temp_file_with(b"0123456789");
    let mut reader = FdReader::open(
        file.path(),
        FdReaderOptions::new().with_assumed_pos(1000),
    )
    .unwrap();
    assert!(!reader.supports_random_access());
    assert_eq!(reader.pos(), 1000);

    // Bytes still come from the descriptor's own offset.
    let mut dest = [0u8; 4];
    assert_eq!(reader.read(&mut dest), 4);
    assert_eq!(&dest, b"0123");
    assert_eq!(reader.pos(), 1004);

    // A backward seek reports the recorded reason.
    assert!(!reader.seek(500));
    assert!(!reader.ok());
    assert_eq!(reader.status().unwrap().kind(), StatusKind::Unimplemented);
    let message = reader.status().unwrap().to_string();
    assert!(message.contains("reading"), "missing annotation: {message}");
}

#[test]
fn independent_pos_reads_at_the_offset() {
    let file = temp_file_with(b"0123456789");
    let reopened = std::fs::File::open(file.path()).unwrap();
    let mut reader = FdReader::new(
        reopened,
        FdReaderOptions::new().with_independent_pos(4),
    );
    assert!(reader.supports_random_access());
    assert_eq!(reader.pos(), 4);
    assert_eq!(test_utils::read_all(&mut reader), b"456789");
}

#[test]
fn assumed_and_independent_pos_are_mutually_exclusive() {
    let file = temp_file_with(b"x");
    let reopened = std::fs::File::open(file.path()).unwrap();
    let reader = FdReader::new(
        reopened,
        FdReaderOptions::new()
            .with_assumed_pos(1)
            .with_independent_pos(2),
    );
    assert!(!reader.ok());
    assert_eq!(reader.status().unwrap().kind(), StatusKind::InvalidArgument);
}

#[test]
fn reading_at_the_offset_limit_fails_cleanly() {
    let file = temp_file_with(b"0123456789");
    let reopened = std::fs::File::open(file.path()).unwrap();
    let mut reader = FdReader::new(
        reopened,
        FdReaderOptions::new().with_assumed_pos(i64::MAX as u64),
    );
    assert!(reader.ok());
    assert!(!reader.pull(1, 1));
    assert!(!reader.ok());
    assert_eq!(
        reader.status().unwrap().kind(),
        StatusKind::ResourceExhausted
    );
}

#[test]
fn new_reader_reads_independently() {
    let content: Vec<u8> = (0..100u8).collect();
    let file = temp_file_with(&content);
    let mut reader = FdReader::open(file.path(), FdReaderOptions::new()).unwrap();

    let mut head = [0u8; 10];
    assert_eq!(reader.read(&mut head), 10);

    let mut independent = reader.new_reader(50).unwrap();
    assert_eq!(test_utils::read_all(&mut *independent), content[50..]);

    // The original continues where it was.
    assert_eq!(reader.pos(), 10);
    assert_eq!(test_utils::read_all(&mut reader), content[10..]);
}

#[test]
fn growing_source_sees_appended_bytes() {
    let file = temp_file_with(b"first");
    let mut reader = FdReader::open(
        file.path(),
        FdReaderOptions::new().with_growing_source(true),
    )
    .unwrap();
    assert_eq!(test_utils::read_all(&mut reader), b"first");
    assert!(reader.ok());

    let mut appender = std::fs::OpenOptions::new()
        .append(true)
        .open(file.path())
        .unwrap();
    appender.write_all(b" second").unwrap();
    appender.flush().unwrap();

    assert_eq!(test_utils::read_all(&mut reader), b" second");
}

#[test]
fn copy_to_fd_writer_moves_the_bytes() {
    let content: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let src_file = temp_file_with(&content);
    let dest_file = tempfile::NamedTempFile::new().unwrap();

    let mut reader = FdReader::open(src_file.path(), FdReaderOptions::new()).unwrap();
    let mut writer = FdWriter::open(dest_file.path(), FdWriterOptions::new()).unwrap();

    assert!(reader.copy_to(60_000, &mut writer));
    assert!(writer.flush(FlushType::FromProcess));
    assert_eq!(reader.pos(), 60_000);

    let copied = std::fs::read(dest_file.path()).unwrap();
    assert_eq!(Hex(copied), Hex(content[..60_000].to_vec()));
}

#[test]
fn copy_to_appending_writer_falls_back() {
    let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let src_file = temp_file_with(&content);
    let dest_file = temp_file_with(b"existing:");

    let mut reader = FdReader::open(src_file.path(), FdReaderOptions::new()).unwrap();
    // Append mode makes the kernel-to-kernel copy unavailable; the
    // buffered path must produce identical output.
    let mut writer = FdWriter::open(
        dest_file.path(),
        FdWriterOptions::new().with_append(true),
    )
    .unwrap();

    assert!(reader.copy_to(10_000, &mut writer));
    assert!(writer.close().is_ok());

    let copied = std::fs::read(dest_file.path()).unwrap();
    assert_eq!(&copied[..9], b"existing:");
    assert_eq!(Hex(copied[9..].to_vec()), Hex(content));
}

#[test]
fn copy_past_the_end_reports_end_of_source() {
    let src_file = temp_file_with(b"short");
    let dest_file = tempfile::NamedTempFile::new().unwrap();

    let mut reader = FdReader::open(src_file.path(), FdReaderOptions::new()).unwrap();
    let mut writer = FdWriter::open(dest_file.path(), FdWriterOptions::new()).unwrap();

    assert!(!reader.copy_to(100, &mut writer));
    assert!(reader.ok());
    assert!(writer.flush(FlushType::FromProcess));
    assert_eq!(std::fs::read(dest_file.path()).unwrap(), b"short");
}

#[test]
fn fd_writer_supports_truncate_and_read_mode() {
    let dest_file = tempfile::NamedTempFile::new().unwrap();
    let mut writer = FdWriter::open(dest_file.path(), FdWriterOptions::new()).unwrap();
    assert!(writer.write(b"0123456789"));

    let mut reader = writer.read_mode(3).unwrap();
    assert_eq!(test_utils::read_all(&mut *reader), b"3456789");

    assert!(writer.truncate(5));
    assert!(writer.close().is_ok());
    assert_eq!(std::fs::read(dest_file.path()).unwrap(), b"01234");
}

#[test]
fn fd_writer_seek_rewrites_in_place() {
    let dest_file = tempfile::NamedTempFile::new().unwrap();
    let mut writer = FdWriter::open(dest_file.path(), FdWriterOptions::new()).unwrap();
    assert!(writer.write(b"0123456789"));
    assert!(writer.seek(4));
    assert!(writer.write(b"xy"));
    assert!(writer.close().is_ok());
    assert_eq!(std::fs::read(dest_file.path()).unwrap(), b"0123xy6789");
}

#[test]
fn set_read_all_hint_is_harmless() {
    let file = temp_file_with(b"hello");
    let mut reader = FdReader::open(file.path(), FdReaderOptions::new()).unwrap();
    reader.set_read_all_hint(true);
    assert!(reader.tolerates_reading_ahead());
    assert_eq!(test_utils::read_all(&mut reader), b"hello");
    reader.set_read_all_hint(false);
    assert!(reader.ok());
}
