use bytes::Bytes;

use crate::{
    chain::Chain,
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
};

/// A reader over an in-memory byte sequence.
///
/// The whole sequence is the buffer window, so every operation is a fast
/// path: random access, rewind, and independent readers are all cheap, and
/// [`read_to_chain`](Reader::read_to_chain) shares slices of the backing
/// [`Bytes`] instead of copying.
#[derive(Debug)]
pub struct BytesReader {
    data: Bytes,
    cursor: usize,
    state: StreamState,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        BytesReader {
            data: data.into(),
            cursor: 0,
            state: StreamState::new(),
        }
    }
}

impl Reader for BytesReader {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        // Drop the remaining window so a closed reader has nothing
        // available; the position is unchanged.
        self.data.truncate(self.cursor);
        self.state.close();
        self.state.close_result()
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    fn consume(&mut self, length: usize) {
        assert!(
            length <= self.data.len() - self.cursor,
            "consumed {length} bytes with only {} available",
            self.data.len() - self.cursor
        );
        self.cursor += length;
    }

    fn pos(&self) -> Position {
        self.cursor as Position
    }

    fn start_pos(&self) -> Position {
        0
    }

    fn limit_pos(&self) -> Position {
        self.data.len() as Position
    }

    fn pull(&mut self, min_length: usize, _recommended_length: usize) -> bool {
        self.data.len() - self.cursor >= min_length
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn supports_new_reader(&self) -> bool {
        true
    }

    fn tolerates_reading_ahead(&self) -> bool {
        true
    }

    fn read_to_chain(&mut self, length: usize, dest: &mut Chain) -> bool {
        let taken = length.min(self.data.len() - self.cursor);
        dest.push(self.data.slice(self.cursor..self.cursor + taken));
        self.cursor += taken;
        taken == length
    }

    fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        if new_pos <= self.data.len() as Position {
            self.cursor = new_pos as usize;
            true
        } else {
            false
        }
    }

    fn seek(&mut self, new_pos: Position) -> bool {
        if !self.ok() {
            return false;
        }
        if new_pos > self.data.len() as Position {
            // The source ends first; the position parks at the end.
            self.cursor = self.data.len();
            return false;
        }
        self.cursor = new_pos as usize;
        true
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        self.seek(new_pos)
    }

    fn size(&mut self) -> Option<Position> {
        if !self.ok() {
            return None;
        }
        Some(self.data.len() as Position)
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.ok() {
            return None;
        }
        let mut reader = BytesReader::new(self.data.clone());
        reader.seek(initial_pos);
        Some(Box::new(reader))
    }
}
