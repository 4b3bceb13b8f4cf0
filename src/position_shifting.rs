use crate::{
    chain::Chain,
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

fn underflow_error(new_pos: Position, base_pos: Position) -> Status {
    Status::invalid_argument(format!(
        "position {new_pos} is below the base position {base_pos}"
    ))
}

/// A reader presenting another reader with all positions shifted up by a
/// constant `base_pos`: the inner stream's byte 0 appears at `base_pos`.
///
/// Seeking below `base_pos` fails; positions that would not fit in
/// [`Position`] fail with `ResourceExhausted`. The buffer is the inner
/// reader's, so the fast path stays a fast path.
pub struct PositionShiftingReader<R> {
    src: R,
    base_pos: Position,
    state: StreamState,
}

impl<R: Reader> PositionShiftingReader<R> {
    pub fn new(src: R, base_pos: Position) -> Self {
        let mut state = StreamState::new();
        if src.limit_pos() > Position::MAX - base_pos {
            state = StreamState::failed(Status::resource_exhausted("reader position overflow"));
        }
        PositionShiftingReader {
            src,
            base_pos,
            state,
        }
    }

    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    pub fn src(&self) -> &R {
        &self.src
    }

    /// Latches the source's failure on this reader, once.
    fn inherit_src_failure(&mut self) {
        if !self.src.ok() && self.state.ok() {
            let status = self
                .src
                .status()
                .cloned()
                .expect("source reported !ok without a status");
            self.state.fail(status);
        }
    }

    /// Fails when the shifted position would not be representable.
    fn check_overflow(&mut self) -> bool {
        if self.src.limit_pos() > Position::MAX - self.base_pos {
            return self.fail(Status::resource_exhausted("reader position overflow"));
        }
        true
    }
}

impl<R: Reader> Reader for PositionShiftingReader<R> {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state.is_open() {
            if let Err(status) = self.src.close() {
                if self.state.ok() {
                    self.state.fail(status);
                }
            }
            self.state.close();
        }
        self.state.close_result()
    }

    fn chunk(&self) -> &[u8] {
        self.src.chunk()
    }

    fn consume(&mut self, length: usize) {
        self.src.consume(length)
    }

    fn pos(&self) -> Position {
        self.src.pos().saturating_add(self.base_pos)
    }

    fn start_pos(&self) -> Position {
        self.src.start_pos().saturating_add(self.base_pos)
    }

    fn limit_pos(&self) -> Position {
        self.src.limit_pos().saturating_add(self.base_pos)
    }

    fn pull(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if !self.state.ok() {
            return false;
        }
        let pulled = self.src.pull(min_length, recommended_length);
        self.inherit_src_failure();
        pulled && self.check_overflow()
    }

    fn supports_random_access(&self) -> bool {
        self.src.supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        self.src.supports_rewind()
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
        if self.state.is_open() {
            let status = self.src.annotate_status(status);
            status.annotate(format!("at byte {} after position shift", self.pos()))
        } else {
            status
        }
    }

    fn read(&mut self, dest: &mut [u8]) -> usize {
        if !self.state.ok() {
            return 0;
        }
        let length_read = self.src.read(dest);
        self.inherit_src_failure();
        self.check_overflow();
        length_read
    }

    fn read_to_chain(&mut self, length: usize, dest: &mut Chain) -> bool {
        if !self.state.ok() {
            return false;
        }
        let read_ok = self.src.read_to_chain(length, dest);
        self.inherit_src_failure();
        read_ok && self.check_overflow()
    }

    fn seek(&mut self, new_pos: Position) -> bool {
        if !self.state.ok() {
            return false;
        }
        if new_pos < self.base_pos {
            return self.fail(underflow_error(new_pos, self.base_pos));
        }
        let sought = self.src.seek(new_pos - self.base_pos);
        self.inherit_src_failure();
        sought
    }

    fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        new_pos >= self.base_pos && self.src.seek_in_buffer(new_pos - self.base_pos)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        self.seek(new_pos)
    }

    fn size(&mut self) -> Option<Position> {
        if !self.state.ok() {
            return None;
        }
        let size = self.src.size();
        self.inherit_src_failure();
        match size {
            Some(size) => match size.checked_add(self.base_pos) {
                Some(shifted) => Some(shifted),
                None => {
                    self.fail(Status::resource_exhausted("reader position overflow"));
                    None
                }
            },
            None => None,
        }
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.state.ok() {
            return None;
        }
        if initial_pos < self.base_pos {
            self.fail(underflow_error(initial_pos, self.base_pos));
            return None;
        }
        let inner = self.src.new_reader(initial_pos - self.base_pos);
        self.inherit_src_failure();
        let inner = inner?;
        Some(Box::new(PositionShiftingReader::new(inner, self.base_pos)))
    }
}

/// A writer presenting another writer with all positions shifted up by a
/// constant `base_pos`. The mirror of [`PositionShiftingReader`].
pub struct PositionShiftingWriter<W> {
    dest: W,
    base_pos: Position,
    state: StreamState,
}

impl<W: Writer> PositionShiftingWriter<W> {
    pub fn new(dest: W, base_pos: Position) -> Self {
        let mut state = StreamState::new();
        if dest.pos() > Position::MAX - base_pos {
            state = StreamState::failed(Status::resource_exhausted("writer position overflow"));
        }
        PositionShiftingWriter {
            dest,
            base_pos,
            state,
        }
    }

    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    pub fn dest(&self) -> &W {
        &self.dest
    }

    fn inherit_dest_failure(&mut self) {
        if !self.dest.ok() && self.state.ok() {
            let status = self
                .dest
                .status()
                .cloned()
                .expect("destination reported !ok without a status");
            self.state.fail(status);
        }
    }

    fn check_overflow(&mut self) -> bool {
        if self.dest.pos() > Position::MAX - self.base_pos {
            return self.fail(Status::resource_exhausted("writer position overflow"));
        }
        true
    }
}

impl<W: Writer> Writer for PositionShiftingWriter<W> {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state.is_open() {
            if let Err(status) = self.dest.close() {
                if self.state.ok() {
                    self.state.fail(status);
                }
            }
            self.state.close();
        }
        self.state.close_result()
    }

    fn pos(&self) -> Position {
        self.dest.pos().saturating_add(self.base_pos)
    }

    fn start_pos(&self) -> Position {
        self.dest.start_pos().saturating_add(self.base_pos)
    }

    fn available(&self) -> usize {
        self.dest.available()
    }

    fn space(&mut self) -> &mut [u8] {
        self.dest.space()
    }

    fn advance(&mut self, length: usize) {
        self.dest.advance(length)
    }

    fn push(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if !self.state.ok() {
            return false;
        }
        let pushed = self.dest.push(min_length, recommended_length);
        self.inherit_dest_failure();
        pushed && self.check_overflow()
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        if !self.state.ok() {
            return false;
        }
        let flushed = self.dest.flush(flush_type);
        self.inherit_dest_failure();
        flushed
    }

    fn supports_random_access(&self) -> bool {
        self.dest.supports_random_access()
    }

    fn supports_read_mode(&self) -> bool {
        self.dest.supports_read_mode()
    }

    fn supports_truncate(&self) -> bool {
        self.dest.supports_truncate()
    }

    fn prefers_copying(&self) -> bool {
        self.dest.prefers_copying()
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state.is_open() {
            let status = self.dest.annotate_status(status);
            status.annotate(format!("at byte {} after position shift", self.pos()))
        } else {
            status
        }
    }

    fn write(&mut self, src: &[u8]) -> bool {
        if !self.state.ok() {
            return false;
        }
        let wrote = self.dest.write(src);
        self.inherit_dest_failure();
        wrote && self.check_overflow()
    }

    fn write_chain(&mut self, src: &Chain) -> bool {
        if !self.state.ok() {
            return false;
        }
        let wrote = self.dest.write_chain(src);
        self.inherit_dest_failure();
        wrote && self.check_overflow()
    }

    fn seek(&mut self, new_pos: Position) -> bool {
        if !self.state.ok() {
            return false;
        }
        if new_pos < self.base_pos {
            return self.fail(underflow_error(new_pos, self.base_pos));
        }
        let sought = self.dest.seek(new_pos - self.base_pos);
        self.inherit_dest_failure();
        sought
    }

    fn size(&mut self) -> Option<Position> {
        if !self.state.ok() {
            return None;
        }
        let size = self.dest.size();
        self.inherit_dest_failure();
        match size {
            Some(size) => match size.checked_add(self.base_pos) {
                Some(shifted) => Some(shifted),
                None => {
                    self.fail(Status::resource_exhausted("writer position overflow"));
                    None
                }
            },
            None => None,
        }
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        if !self.state.ok() {
            return false;
        }
        if new_size < self.base_pos {
            return self.fail(underflow_error(new_size, self.base_pos));
        }
        let truncated = self.dest.truncate(new_size - self.base_pos);
        self.inherit_dest_failure();
        truncated
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.state.ok() {
            return None;
        }
        if initial_pos < self.base_pos {
            self.fail(underflow_error(initial_pos, self.base_pos));
            return None;
        }
        let inner = self.dest.read_mode(initial_pos - self.base_pos);
        self.inherit_dest_failure();
        let inner = inner?;
        Some(Box::new(PositionShiftingReader::new(inner, self.base_pos)))
    }
}
