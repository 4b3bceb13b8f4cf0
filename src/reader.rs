use bytes::Bytes;

use crate::{
    chain::Chain,
    state::StreamState,
    status::{Position, Status},
    writer::Writer,
};

/// A buffered byte source.
///
/// A reader exposes a window of buffered data through [`chunk`](Reader::chunk)
/// and [`consume`](Reader::consume); most operations stay inside the window
/// and only fall back to [`pull`](Reader::pull) when it runs dry. Absolute
/// positions are tracked alongside: `pos()` is the position of the next
/// unread byte, `start_pos()..=limit_pos()` spans the buffered window, and
/// `available() == chunk().len()`.
///
/// End-of-source is not an error: `pull` returns `false` with the reader
/// still `ok()`. Failures latch on the reader; every later operation
/// fast-fails until the reader is dropped.
///
/// A `&mut R` is a borrowed dependency: it forwards every operation but its
/// `close` only detaches, leaving the underlying reader open, so layers can
/// be stacked over a reader the caller keeps using afterwards.
pub trait Reader {
    fn state(&self) -> &StreamState;

    fn state_mut(&mut self) -> &mut StreamState;

    /// Closes the reader, releasing what it owns. Idempotent; reports the
    /// latched failure if there is one.
    fn close(&mut self) -> Result<(), Status>;

    /// The buffered bytes between the cursor and the window limit.
    fn chunk(&self) -> &[u8];

    /// Marks `length` bytes of `chunk()` as read.
    ///
    /// Panics if `length > available()`.
    fn consume(&mut self, length: usize);

    /// Position of the next byte `chunk()` would yield.
    fn pos(&self) -> Position;

    /// Position of the first byte retained in the buffer window.
    fn start_pos(&self) -> Position;

    /// Position one past the last buffered byte.
    fn limit_pos(&self) -> Position;

    /// Ensures `available() >= min_length`, pulling from the source if
    /// needed, preferably `recommended_length` bytes. Returns `false` when
    /// the source ends or the reader failed; `pull(0, _)` never allocates.
    fn pull(&mut self, min_length: usize, recommended_length: usize) -> bool;

    // Capabilities are per-instance and monotonic for the reader's life.

    fn supports_random_access(&self) -> bool {
        false
    }

    fn supports_rewind(&self) -> bool {
        self.supports_random_access()
    }

    fn supports_size(&self) -> bool {
        self.supports_random_access()
    }

    fn supports_new_reader(&self) -> bool {
        false
    }

    /// Whether reading ahead of what was asked for is acceptable, e.g. it
    /// is not when the source is interactive.
    fn tolerates_reading_ahead(&self) -> bool {
        false
    }

    /// Hints that all remaining data will be read sequentially.
    fn set_read_all_hint(&mut self, read_all_hint: bool) {
        let _ = read_all_hint;
    }

    fn ok(&self) -> bool {
        self.state().ok()
    }

    fn status(&self) -> Option<&Status> {
        self.state().status()
    }

    /// Adds this layer's position context to `status`. Layers override this
    /// to name their source and position coordinate.
    fn annotate_status(&self, status: Status) -> Status {
        if self.state().is_open() {
            status.annotate(format!("at byte {}", self.pos()))
        } else {
            status
        }
    }

    /// Latches `status`, annotated with this layer's context. Returns
    /// `false` so it can be used directly in failure return positions.
    fn fail(&mut self, status: Status) -> bool {
        let annotated = self.annotate_status(status);
        self.state_mut().fail(annotated)
    }

    /// Latches `status` as-is, for failures that are already annotated,
    /// e.g. inherited from an inner reader.
    fn fail_without_annotation(&mut self, status: Status) -> bool {
        self.state_mut().fail(status)
    }

    fn fail_overflow(&mut self) -> bool {
        self.fail(Status::resource_exhausted("reader position overflow"))
    }

    fn available(&self) -> usize {
        self.chunk().len()
    }

    /// Reads one byte. `None` on end-of-source or failure.
    fn read_byte(&mut self) -> Option<u8> {
        if !self.pull(1, 1) {
            return None;
        }
        let byte = self.chunk()[0];
        self.consume(1);
        Some(byte)
    }

    /// Reads up to `dest.len()` bytes. Returns the number of bytes read,
    /// which is less than requested only on end-of-source or failure.
    fn read(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dest.len() {
            if self.available() == 0 && !self.pull(1, dest.len() - copied) {
                break;
            }
            let length = self.available().min(dest.len() - copied);
            dest[copied..copied + length].copy_from_slice(&self.chunk()[..length]);
            self.consume(length);
            copied += length;
        }
        copied
    }

    /// Reads exactly `length` bytes, appending them to `dest` as blocks.
    /// Sources holding shareable data append it without copying. Returns
    /// `false` on end-of-source or failure; whatever was read stays in
    /// `dest`.
    fn read_to_chain(&mut self, mut length: usize, dest: &mut Chain) -> bool {
        while length > 0 {
            if self.available() == 0 && !self.pull(1, length) {
                return false;
            }
            let taken = self.available().min(length);
            dest.push(Bytes::copy_from_slice(&self.chunk()[..taken]));
            self.consume(taken);
            length -= taken;
        }
        true
    }

    /// Copies exactly `length` bytes to `dest`. Returns `false` on
    /// end-of-source or when either stream failed.
    fn copy_to(&mut self, length: Position, dest: &mut dyn Writer) -> bool {
        copy_by_pulling(self, length, dest)
    }

    /// Moves the cursor to `new_pos` if that position is still buffered.
    /// The default only moves forward within `chunk()`; buffered readers
    /// override it to also rewind over their retained prefix.
    fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        if new_pos >= self.pos() && new_pos <= self.limit_pos() {
            self.consume((new_pos - self.pos()) as usize);
            true
        } else {
            false
        }
    }

    /// Sets the position for subsequent reads. Seeking forward always
    /// works (at worst by reading and discarding); seeking backward out of
    /// the buffer requires [`supports_rewind`](Reader::supports_rewind).
    /// Returns `false` with the reader still `ok()` when the source ends
    /// before `new_pos`.
    fn seek(&mut self, new_pos: Position) -> bool {
        if self.seek_in_buffer(new_pos) {
            return true;
        }
        self.seek_behind_buffer(new_pos)
    }

    /// Slow path of [`seek`](Reader::seek), reached with `new_pos` outside
    /// the buffered window. The default can only go forward.
    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.ok() {
            return false;
        }
        if new_pos <= self.limit_pos() {
            return self.fail(Status::unimplemented("seeking backwards not supported"));
        }
        seek_forward_by_reading(self, new_pos)
    }

    /// Advances the position by `length`, reading and discarding data when
    /// random access is unavailable.
    fn skip(&mut self, length: Position) -> bool {
        match self.pos().checked_add(length) {
            Some(new_pos) => self.seek(new_pos),
            None => {
                self.fail_overflow();
                false
            }
        }
    }

    /// The total size of the source. Fails `Unimplemented` when the source
    /// cannot tell.
    fn size(&mut self) -> Option<Position> {
        self.fail(Status::unimplemented("size is not supported by this reader"));
        None
    }

    /// Spawns an independent reader over the same source, positioned at
    /// `initial_pos`. The new reader and this one may be used concurrently
    /// if the ultimate source supports it. `None` on failure or when
    /// [`supports_new_reader`](Reader::supports_new_reader) is `false`.
    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        let _ = initial_pos;
        self.fail(Status::unimplemented(
            "independent readers are not supported by this reader",
        ));
        None
    }

    /// Closes the reader, first verifying that the source ends exactly at
    /// the current position.
    fn verify_end_and_close(&mut self) -> Result<(), Status> {
        if self.pull(1, 1) {
            self.fail(Status::invalid_argument("end of data expected"));
        }
        self.close()
    }
}

/// Copies `length` bytes from `src` to `dest` through `src`'s buffer, the
/// fallback for sources without a faster transfer path.
pub(crate) fn copy_by_pulling<R: Reader + ?Sized>(
    src: &mut R,
    mut length: Position,
    dest: &mut dyn Writer,
) -> bool {
    while length > 0 {
        if src.available() == 0 && !src.pull(1, length.min(usize::MAX as Position) as usize) {
            return false;
        }
        let taken = (src.available() as Position).min(length) as usize;
        if !dest.write(&src.chunk()[..taken]) {
            return false;
        }
        src.consume(taken);
        length -= taken as Position;
    }
    true
}

/// Seeks forward by reading and discarding the intervening data; `new_pos`
/// must be at or past the current position. Returns `false` with the
/// reader still `ok()` when the source ends first.
pub(crate) fn seek_forward_by_reading<R: Reader + ?Sized>(
    src: &mut R,
    new_pos: Position,
) -> bool {
    while src.limit_pos() < new_pos {
        let buffered = src.available();
        src.consume(buffered);
        if !src.pull(1, (new_pos - src.pos()).min(usize::MAX as Position) as usize) {
            return false;
        }
    }
    let overshoot = (src.limit_pos() - new_pos) as usize;
    src.consume(src.available() - overshoot);
    true
}

macro_rules! forward_reader_methods {
    () => {
        fn state(&self) -> &StreamState {
            (**self).state()
        }
        fn state_mut(&mut self) -> &mut StreamState {
            (**self).state_mut()
        }
        fn chunk(&self) -> &[u8] {
            (**self).chunk()
        }
        fn consume(&mut self, length: usize) {
            (**self).consume(length)
        }
        fn pos(&self) -> Position {
            (**self).pos()
        }
        fn start_pos(&self) -> Position {
            (**self).start_pos()
        }
        fn limit_pos(&self) -> Position {
            (**self).limit_pos()
        }
        fn pull(&mut self, min_length: usize, recommended_length: usize) -> bool {
            (**self).pull(min_length, recommended_length)
        }
        fn supports_random_access(&self) -> bool {
            (**self).supports_random_access()
        }
        fn supports_rewind(&self) -> bool {
            (**self).supports_rewind()
        }
        fn supports_size(&self) -> bool {
            (**self).supports_size()
        }
        fn supports_new_reader(&self) -> bool {
            (**self).supports_new_reader()
        }
        fn tolerates_reading_ahead(&self) -> bool {
            (**self).tolerates_reading_ahead()
        }
        fn set_read_all_hint(&mut self, read_all_hint: bool) {
            (**self).set_read_all_hint(read_all_hint)
        }
        fn annotate_status(&self, status: Status) -> Status {
            (**self).annotate_status(status)
        }
        fn read(&mut self, dest: &mut [u8]) -> usize {
            (**self).read(dest)
        }
        fn read_byte(&mut self) -> Option<u8> {
            (**self).read_byte()
        }
        fn read_to_chain(&mut self, length: usize, dest: &mut Chain) -> bool {
            (**self).read_to_chain(length, dest)
        }
        fn copy_to(&mut self, length: Position, dest: &mut dyn Writer) -> bool {
            (**self).copy_to(length, dest)
        }
        fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
            (**self).seek_in_buffer(new_pos)
        }
        fn seek(&mut self, new_pos: Position) -> bool {
            (**self).seek(new_pos)
        }
        fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
            (**self).seek_behind_buffer(new_pos)
        }
        fn skip(&mut self, length: Position) -> bool {
            (**self).skip(length)
        }
        fn size(&mut self) -> Option<Position> {
            (**self).size()
        }
        fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
            (**self).new_reader(initial_pos)
        }
    };
}

/// A borrowed dependency: operations forward to the underlying reader, but
/// `close` only detaches, leaving it open for its owner.
impl<R: Reader + ?Sized> Reader for &mut R {
    forward_reader_methods!();

    fn close(&mut self) -> Result<(), Status> {
        self.state().close_result()
    }

    fn verify_end_and_close(&mut self) -> Result<(), Status> {
        if self.pull(1, 1) {
            self.fail(Status::invalid_argument("end of data expected"));
        }
        self.state().close_result()
    }
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    forward_reader_methods!();

    fn close(&mut self) -> Result<(), Status> {
        (**self).close()
    }

    fn verify_end_and_close(&mut self) -> Result<(), Status> {
        (**self).verify_end_and_close()
    }
}
