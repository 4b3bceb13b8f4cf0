use crate::{
    chain::Chain,
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

const SCRATCH_SIZE: usize = 16 * 1024;

/// A writer that discards everything while tracking the position, so it
/// can terminate a pipeline whose side effects (digests, counters) are the
/// point.
#[derive(Debug, Default)]
pub struct NullWriter {
    /// Reused scratch block handed out as `space()`; allocated on first
    /// demand so an idle writer costs nothing.
    scratch: Vec<u8>,
    cursor: usize,
    start_pos: Position,
    state: StreamState,
}

impl NullWriter {
    pub fn new() -> Self {
        NullWriter::default()
    }

    fn discard_buffered(&mut self) {
        self.start_pos += self.cursor as Position;
        self.cursor = 0;
    }
}

impl Writer for NullWriter {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        self.discard_buffered();
        self.state.close();
        self.state.close_result()
    }

    fn pos(&self) -> Position {
        self.start_pos + self.cursor as Position
    }

    fn start_pos(&self) -> Position {
        self.start_pos
    }

    fn available(&self) -> usize {
        self.scratch.len() - self.cursor
    }

    fn space(&mut self) -> &mut [u8] {
        &mut self.scratch[self.cursor..]
    }

    fn advance(&mut self, length: usize) {
        assert!(
            length <= self.available(),
            "advanced {length} bytes with only {} of space",
            self.available()
        );
        self.cursor += length;
    }

    fn push(&mut self, min_length: usize, _recommended_length: usize) -> bool {
        if !self.ok() {
            return false;
        }
        if min_length == 0 {
            return true;
        }
        self.discard_buffered();
        if self.scratch.len() < min_length.max(SCRATCH_SIZE) {
            self.scratch.resize(min_length.max(SCRATCH_SIZE), 0);
        }
        true
    }

    fn flush(&mut self, _flush_type: FlushType) -> bool {
        self.discard_buffered();
        self.ok()
    }

    fn prefers_copying(&self) -> bool {
        false
    }

    fn write(&mut self, src: &[u8]) -> bool {
        if !self.ok() {
            return false;
        }
        self.discard_buffered();
        self.start_pos += src.len() as Position;
        true
    }

    fn write_chain(&mut self, src: &Chain) -> bool {
        if !self.ok() {
            return false;
        }
        self.discard_buffered();
        self.start_pos += src.len();
        true
    }

    fn write_chars(&mut self, length: Position, _byte: u8) -> bool {
        if !self.ok() {
            return false;
        }
        self.discard_buffered();
        self.start_pos += length;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discards_but_counts() {
        let mut writer = NullWriter::new();
        assert!(writer.write(b"hello"));
        assert!(writer.write_zeros(1000));
        assert_eq!(writer.pos(), 1005);

        // The cursor path counts too.
        assert!(writer.push(3, 0));
        writer.advance(3);
        assert_eq!(writer.pos(), 1008);
    }
}
