use assert_matches::assert_matches;
use byteflow::{
    zstd_uncompressed_size, BufferOptions, BytesReader, Reader, StatusKind, VecWriter, Writer,
    ZstdDictionary, ZstdReader, ZstdReaderOptions, ZstdWriter, ZstdWriterOptions,
};
use easy_hex::Hex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

mod test_utils;

fn fox_data() -> Vec<u8> {
    "The quick brown fox ".repeat(1000).into_bytes()
}

fn compressed_fox() -> Vec<u8> {
    // The single-shot API stores the content size in the frame header.
    zstd::bulk::compress(&fox_data(), 3).unwrap()
}

#[test]
fn decodes_a_frame_and_reports_its_size() {
    let mut reader = ZstdReader::new(
        BytesReader::new(compressed_fox()),
        ZstdReaderOptions::new(),
    );
    assert!(reader.supports_size());
    assert_eq!(reader.size(), Some(20_000));

    let decoded = test_utils::read_all(&mut reader);
    assert_eq!(Hex(decoded), Hex(fox_data()));

    // A second read reports a clean end of stream.
    let mut extra = [0u8; 16];
    assert_eq!(reader.read(&mut extra), 0);
    assert!(reader.ok());
    assert!(reader.close().is_ok());
}

#[test]
fn truncated_stream_fails_when_not_growing() {
    let encoded = compressed_fox();
    let truncated = &encoded[..encoded.len() - 10];

    let mut reader = ZstdReader::new(
        BytesReader::new(truncated.to_vec()),
        ZstdReaderOptions::new(),
    );
    let _partial = test_utils::read_all(&mut reader);
    assert!(!reader.ok());
    let status = reader.status().unwrap();
    assert_eq!(status.kind(), StatusKind::InvalidArgument);
    assert_eq!(status.message(), "Truncated Zstd-compressed stream");
}

#[test]
fn truncated_stream_resumes_when_growing() {
    let encoded = compressed_fox();
    let (head, tail) = encoded.split_at(encoded.len() - 10);

    let source = test_utils::SharedSource::new(head.to_vec());
    let mut reader = ZstdReader::new(
        source.reader(usize::MAX >> 1),
        ZstdReaderOptions::new().with_growing_source(true),
    );

    let mut decoded = test_utils::read_all(&mut reader);
    assert!(reader.ok(), "running out of a growing source is not an error");
    assert!(reader.is_truncated());

    // Feed the missing bytes and keep reading.
    source.append(tail);
    decoded.extend_from_slice(&test_utils::read_all(&mut reader));
    assert!(reader.ok());
    assert!(!reader.is_truncated());
    assert_eq!(Hex(decoded), Hex(fox_data()));
}

#[test]
fn closing_while_truncated_and_growing_fails() {
    let encoded = compressed_fox();
    let head = &encoded[..encoded.len() - 10];

    let source = test_utils::SharedSource::new(head.to_vec());
    let mut reader = ZstdReader::new(
        source.reader(usize::MAX >> 1),
        ZstdReaderOptions::new().with_growing_source(true),
    );
    let _partial = test_utils::read_all(&mut reader);
    assert!(reader.is_truncated());

    let result = reader.close();
    assert_eq!(result.unwrap_err().kind(), StatusKind::InvalidArgument);
}

#[test]
fn one_shot_read_equals_chunked_reads() {
    let data = fox_data();

    // One big read lets the decoder write straight into the destination.
    let mut reader = ZstdReader::new(
        BytesReader::new(compressed_fox()),
        ZstdReaderOptions::new(),
    );
    let mut one_shot = vec![0u8; data.len() + 10];
    let length_read = reader.read(&mut one_shot);
    assert_eq!(length_read, data.len());
    one_shot.truncate(length_read);
    assert!(reader.ok());

    // Small reads go through the internal buffer.
    let mut reader = ZstdReader::new(
        BytesReader::new(compressed_fox()),
        ZstdReaderOptions::new().with_buffer_options(BufferOptions::new().with_buffer_size(61)),
    );
    let chunked = test_utils::read_all(&mut reader);

    assert_eq!(Hex(one_shot), Hex(chunked));
}

#[test]
fn decodes_from_a_single_byte_source() {
    let source = test_utils::SharedSource::new(compressed_fox());
    let mut reader = ZstdReader::new(source.reader(1), ZstdReaderOptions::new());
    let decoded = test_utils::read_all(&mut reader);
    assert_eq!(Hex(decoded), Hex(fox_data()));
}

#[test]
fn rewinds_by_restarting_the_frame() {
    let data = fox_data();
    let mut reader = ZstdReader::new(
        BytesReader::new(compressed_fox()),
        ZstdReaderOptions::new().with_buffer_options(BufferOptions::new().with_buffer_size(64)),
    );
    assert!(reader.supports_rewind());

    let mut head = vec![0u8; 1000];
    assert_eq!(reader.read(&mut head), 1000);
    assert!(reader.seek(10));
    assert_eq!(reader.pos(), 10);

    let rest = test_utils::read_all(&mut reader);
    assert_eq!(Hex(rest), Hex(data[10..].to_vec()));
}

#[test]
fn new_reader_decodes_independently() {
    let data = fox_data();
    let mut reader = ZstdReader::new(
        BytesReader::new(compressed_fox()),
        ZstdReaderOptions::new(),
    );
    assert!(reader.supports_new_reader());

    let mut independent = reader.new_reader(500).unwrap();
    let from_independent = test_utils::read_all(&mut *independent);
    assert_eq!(Hex(from_independent), Hex(data[500..].to_vec()));

    let from_original = test_utils::read_all(&mut reader);
    assert_eq!(Hex(from_original), Hex(data));
}

#[test]
fn skippable_frame_has_zero_uncompressed_bytes() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&0x184D_2A50u32.to_le_bytes());
    frame.extend_from_slice(&4u32.to_le_bytes());
    frame.extend_from_slice(b"misc");

    let mut probe = BytesReader::new(frame.clone());
    assert_eq!(zstd_uncompressed_size(&mut probe), Some(0));
    assert_eq!(probe.pos(), 0, "probing does not consume");

    let mut reader = ZstdReader::new(BytesReader::new(frame), ZstdReaderOptions::new());
    assert_eq!(reader.size(), Some(0));
    let decoded = test_utils::read_all(&mut reader);
    assert!(decoded.is_empty());
    assert!(reader.ok());
}

#[test]
fn size_is_unknown_without_a_declared_content_size() {
    // The streaming API does not know the input size up front, so the
    // frame header carries no content size.
    let encoded = zstd::encode_all(&b"some bytes"[..], 3).unwrap();
    let mut probe = BytesReader::new(encoded.clone());
    assert_eq!(zstd_uncompressed_size(&mut probe), None);

    let mut reader = ZstdReader::new(BytesReader::new(encoded), ZstdReaderOptions::new());
    assert!(!reader.supports_size());
    assert_matches!(reader.size(), None);
    assert_eq!(reader.status().unwrap().kind(), StatusKind::Unimplemented);
}

#[test]
fn dictionary_round_trip() {
    let dictionary = b"The quick brown fox jumps over the lazy dog".to_vec();
    let data = b"The quick brown fox jumps over the lazy dog once more".to_vec();

    let mut compressor = zstd::bulk::Compressor::with_dictionary(3, &dictionary).unwrap();
    let encoded = compressor.compress(&data).unwrap();

    let mut reader = ZstdReader::new(
        BytesReader::new(encoded),
        ZstdReaderOptions::new().with_dictionary(ZstdDictionary::new(dictionary)),
    );
    let decoded = test_utils::read_all(&mut reader);
    assert_eq!(Hex(decoded), Hex(data));
}

#[test]
fn writer_declares_the_final_size() {
    let data = fox_data();
    let mut writer = ZstdWriter::new(
        VecWriter::new(),
        ZstdWriterOptions::new().with_final_size(Some(data.len() as u64)),
    );
    assert!(writer.write(&data));
    assert!(writer.close().is_ok());

    let mut reader = ZstdReader::new(
        BytesReader::new(writer.dest().as_slice().to_vec()),
        ZstdReaderOptions::new(),
    );
    assert_eq!(reader.size(), Some(20_000));
    let decoded = test_utils::read_all(&mut reader);
    assert_eq!(Hex(decoded), Hex(data));
}

#[test]
fn flush_makes_written_data_decodable() {
    let mut writer = ZstdWriter::new(VecWriter::new(), ZstdWriterOptions::new());
    assert!(writer.write(b"first part"));
    assert!(writer.flush(byteflow::FlushType::FromObject));

    // The flushed prefix decodes on its own even though the frame is
    // still open.
    let flushed = writer.dest().as_slice().to_vec();
    let source = test_utils::SharedSource::new(flushed);
    let mut reader = ZstdReader::new(
        source.reader(usize::MAX >> 1),
        ZstdReaderOptions::new().with_growing_source(true),
    );
    let decoded = test_utils::read_all(&mut reader);
    assert_eq!(decoded, b"first part");
}

proptest! {
    #[test]
    fn writer_output_decodes_with_the_reference_decoder(
        payload in test_utils::arb_payload(),
        level in test_utils::arb_compression_level(),
    ) {
        let mut writer = ZstdWriter::new(
            VecWriter::new(),
            ZstdWriterOptions::new().with_compression_level(level),
        );
        prop_assert!(writer.write(&payload));
        prop_assert!(writer.close().is_ok());

        let decoded = zstd::decode_all(writer.dest().as_slice()).unwrap();
        prop_assert_eq!(Hex(decoded), payload);
    }

    #[test]
    fn reader_decodes_reference_encoder_output(
        payload in test_utils::arb_payload(),
        level in test_utils::arb_compression_level(),
        buffer_options in test_utils::arb_buffer_options(),
    ) {
        let encoded = zstd::encode_all(&payload[..], level).unwrap();
        let mut reader = ZstdReader::new(
            BytesReader::new(encoded),
            ZstdReaderOptions::new().with_buffer_options(buffer_options),
        );
        let decoded = test_utils::read_all(&mut reader);
        prop_assert_eq!(Hex(decoded), payload);
        prop_assert!(reader.ok());
    }

    #[test]
    fn encode_decode_round_trip(
        payload in test_utils::arb_payload(),
        level in test_utils::arb_compression_level(),
    ) {
        let mut writer = ZstdWriter::new(
            VecWriter::new(),
            ZstdWriterOptions::new()
                .with_compression_level(level)
                .with_final_size(Some(payload.len() as u64)),
        );
        prop_assert!(writer.write(&payload));
        prop_assert!(writer.close().is_ok());

        let mut reader = ZstdReader::new(
            BytesReader::new(writer.dest().as_slice().to_vec()),
            ZstdReaderOptions::new(),
        );
        prop_assert_eq!(reader.size(), Some(payload.len() as u64));
        let decoded = test_utils::read_all(&mut reader);
        prop_assert_eq!(Hex(decoded), payload);
    }
}
