use bytes::Bytes;

use crate::{
    bytes_reader::BytesReader,
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

const MIN_CAPACITY_STEP: usize = 256;

/// A writer accumulating into a `Vec<u8>`.
///
/// The vector is the destination and the buffer at once, so flushing is
/// trivial and random access, truncation, and read mode all work within
/// the bytes written so far.
#[derive(Debug, Default)]
pub struct VecWriter {
    data: Vec<u8>,
    cursor: usize,
    /// High-water mark of committed data; `cursor` may sit below it after
    /// a backward seek.
    end: usize,
    state: StreamState,
}

impl VecWriter {
    pub fn new() -> Self {
        VecWriter::default()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.end]
    }

    /// Closes the writer and returns the accumulated bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.end);
        self.data
    }
}

impl Writer for VecWriter {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        self.data.truncate(self.end);
        self.state.close();
        self.state.close_result()
    }

    fn pos(&self) -> Position {
        self.cursor as Position
    }

    fn start_pos(&self) -> Position {
        0
    }

    fn available(&self) -> usize {
        self.data.len() - self.cursor
    }

    fn space(&mut self) -> &mut [u8] {
        &mut self.data[self.cursor..]
    }

    fn advance(&mut self, length: usize) {
        assert!(
            length <= self.available(),
            "advanced {length} bytes with only {} of space",
            self.available()
        );
        self.cursor += length;
        self.end = self.end.max(self.cursor);
    }

    fn push(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if !self.ok() {
            return false;
        }
        if min_length == 0 {
            return true;
        }
        let wanted = min_length
            .max(recommended_length)
            .max(self.data.len())
            .max(MIN_CAPACITY_STEP);
        match self.cursor.checked_add(wanted) {
            Some(new_len) => {
                self.data.resize(new_len, 0);
                true
            }
            None => self.fail_overflow(),
        }
    }

    fn flush(&mut self, _flush_type: FlushType) -> bool {
        self.ok()
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn supports_read_mode(&self) -> bool {
        true
    }

    fn supports_truncate(&self) -> bool {
        true
    }

    fn prefers_copying(&self) -> bool {
        true
    }

    fn seek(&mut self, new_pos: Position) -> bool {
        if !self.ok() {
            return false;
        }
        if new_pos > self.end as Position {
            self.cursor = self.end;
            return false;
        }
        self.cursor = new_pos as usize;
        true
    }

    fn size(&mut self) -> Option<Position> {
        if !self.ok() {
            return None;
        }
        Some(self.end as Position)
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        if !self.ok() {
            return false;
        }
        if new_size > self.end as Position {
            return self.fail(Status::invalid_argument(
                "truncating past the written size",
            ));
        }
        self.end = new_size as usize;
        self.cursor = self.cursor.min(self.end);
        true
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.ok() {
            return None;
        }
        let mut reader = BytesReader::new(Bytes::copy_from_slice(&self.data[..self.end]));
        reader.seek(initial_pos);
        Some(Box::new(reader))
    }
}
