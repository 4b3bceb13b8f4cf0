use crate::{
    chain::Chain,
    digests::Digester,
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

/// A reader forwarding another reader's bytes while feeding each one to a
/// digester exactly once, in source order.
///
/// The wrapper is transparent: positions, capabilities, and failures are
/// the source's. Rewinding is not supported, since replayed bytes would be
/// digested twice. [`new_reader`](Reader::new_reader) returns a plain,
/// non-digesting reader over the source.
pub struct DigestingReader<R, D> {
    src: R,
    digester: D,
}

impl<R: Reader, D: Digester> DigestingReader<R, D> {
    pub fn new(src: R, digester: D) -> Self {
        DigestingReader { src, digester }
    }

    /// The digest of every byte read so far. Valid at any point, including
    /// after close; a source failure does not taint the bytes digested
    /// before it.
    pub fn digest(&self) -> D::Digest {
        self.digester.digest()
    }

    pub fn src(&self) -> &R {
        &self.src
    }

    /// Releases the source and the digester.
    pub fn into_parts(self) -> (R, D) {
        (self.src, self.digester)
    }
}

impl<R: Reader, D: Digester> Reader for DigestingReader<R, D> {
    fn state(&self) -> &StreamState {
        self.src.state()
    }

    fn state_mut(&mut self) -> &mut StreamState {
        self.src.state_mut()
    }

    fn close(&mut self) -> Result<(), Status> {
        self.src.close()
    }

    fn chunk(&self) -> &[u8] {
        self.src.chunk()
    }

    fn consume(&mut self, length: usize) {
        self.digester.update(&self.src.chunk()[..length]);
        self.src.consume(length);
    }

    fn pos(&self) -> Position {
        self.src.pos()
    }

    fn start_pos(&self) -> Position {
        self.src.start_pos()
    }

    fn limit_pos(&self) -> Position {
        self.src.limit_pos()
    }

    fn pull(&mut self, min_length: usize, recommended_length: usize) -> bool {
        self.src.pull(min_length, recommended_length)
    }

    fn supports_size(&self) -> bool {
        self.src.supports_size()
    }

    fn supports_new_reader(&self) -> bool {
        self.src.supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.src.tolerates_reading_ahead()
    }

    fn set_read_all_hint(&mut self, read_all_hint: bool) {
        self.src.set_read_all_hint(read_all_hint)
    }

    fn annotate_status(&self, status: Status) -> Status {
        self.src.annotate_status(status)
    }

    fn read(&mut self, dest: &mut [u8]) -> usize {
        // Let the source use its own fast paths, then digest what arrived.
        let length_read = self.src.read(dest);
        self.digester.update(&dest[..length_read]);
        length_read
    }

    fn read_to_chain(&mut self, length: usize, dest: &mut Chain) -> bool {
        // Blocks the source shares without copying are digested all the
        // same.
        let mut data = Chain::new();
        let read_ok = self.src.read_to_chain(length, &mut data);
        for block in data.blocks() {
            self.digester.update(block);
        }
        dest.append(data);
        read_ok
    }

    fn size(&mut self) -> Option<Position> {
        self.src.size()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        self.src.new_reader(initial_pos)
    }
}

/// A writer forwarding bytes to another writer while feeding each one to a
/// digester exactly once, in destination order. The mirror of
/// [`DigestingReader`].
pub struct DigestingWriter<W, D> {
    dest: W,
    digester: D,
}

impl<W: Writer, D: Digester> DigestingWriter<W, D> {
    pub fn new(dest: W, digester: D) -> Self {
        DigestingWriter { dest, digester }
    }

    /// The digest of every byte written so far. Valid at any point,
    /// including after close.
    pub fn digest(&self) -> D::Digest {
        self.digester.digest()
    }

    pub fn dest(&self) -> &W {
        &self.dest
    }

    pub fn into_parts(self) -> (W, D) {
        (self.dest, self.digester)
    }
}

impl<W: Writer, D: Digester> Writer for DigestingWriter<W, D> {
    fn state(&self) -> &StreamState {
        self.dest.state()
    }

    fn state_mut(&mut self) -> &mut StreamState {
        self.dest.state_mut()
    }

    fn close(&mut self) -> Result<(), Status> {
        self.dest.close()
    }

    fn pos(&self) -> Position {
        self.dest.pos()
    }

    fn start_pos(&self) -> Position {
        self.dest.start_pos()
    }

    fn available(&self) -> usize {
        self.dest.available()
    }

    fn space(&mut self) -> &mut [u8] {
        self.dest.space()
    }

    fn advance(&mut self, length: usize) {
        let Self { dest, digester } = self;
        digester.update(&dest.space()[..length]);
        dest.advance(length);
    }

    fn push(&mut self, min_length: usize, recommended_length: usize) -> bool {
        self.dest.push(min_length, recommended_length)
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        self.dest.flush(flush_type)
    }

    fn prefers_copying(&self) -> bool {
        self.dest.prefers_copying()
    }

    fn annotate_status(&self, status: Status) -> Status {
        self.dest.annotate_status(status)
    }

    fn write(&mut self, src: &[u8]) -> bool {
        self.digester.update(src);
        self.dest.write(src)
    }

    fn write_chain(&mut self, src: &Chain) -> bool {
        for block in src.blocks() {
            self.digester.update(block);
        }
        self.dest.write_chain(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytes_reader::BytesReader, digests::Crc32cDigester, null_writer::NullWriter,
    };

    #[test]
    fn reader_digest_matches_batch() {
        let mut reader =
            DigestingReader::new(BytesReader::new(&b"Hello, World!"[..]), Crc32cDigester::new());
        let mut dest = [0u8; 13];
        assert_eq!(reader.read(&mut dest), 13);
        assert_eq!(reader.digest(), 0x4BA3_B6E5);
    }

    #[test]
    fn writer_digests_through_the_cursor_path() {
        let mut writer = DigestingWriter::new(NullWriter::new(), Crc32cDigester::new());
        assert!(writer.push(7, 0));
        writer.space()[..7].copy_from_slice(b"Hello, ");
        writer.advance(7);
        assert!(writer.write(b"World!"));
        assert_eq!(writer.digest(), 0x4BA3_B6E5);
    }

    #[test]
    fn stolen_chain_blocks_are_digested() {
        let mut reader =
            DigestingReader::new(BytesReader::new(&b"Hello, World!"[..]), Crc32cDigester::new());
        let mut chain = Chain::new();
        assert!(reader.read_to_chain(13, &mut chain));
        assert_eq!(reader.digest(), 0x4BA3_B6E5);
    }
}
