use crate::status::{Position, Status};

pub const DEFAULT_MIN_BUFFER_SIZE: usize = 4 * 1024;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Buffer sizing policy for buffered streams.
#[derive(Debug, Clone, Copy)]
pub struct BufferOptions {
    pub min_buffer_size: usize,
    pub max_buffer_size: usize,
    /// Expected total size of the data, used to avoid overallocating near
    /// the end. Advisory; nothing breaks if it is wrong.
    pub size_hint: Option<Position>,
}

impl BufferOptions {
    pub fn new() -> Self {
        BufferOptions {
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            size_hint: None,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be greater than 0");
        self.min_buffer_size = buffer_size;
        self.max_buffer_size = buffer_size;
        self
    }

    pub fn with_min_buffer_size(mut self, min_buffer_size: usize) -> Self {
        self.min_buffer_size = min_buffer_size;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_size_hint(mut self, size_hint: Option<Position>) -> Self {
        self.size_hint = size_hint;
        self
    }
}

impl Default for BufferOptions {
    fn default() -> Self {
        BufferOptions::new()
    }
}

/// Read-ahead heuristic: the buffer target starts at `min_buffer_size` and
/// grows with the distance consumed from the stream, clamped to
/// `max_buffer_size` and to the remaining data when a size hint is known.
#[derive(Debug, Clone)]
pub(crate) struct BufferSizer {
    options: BufferOptions,
    base_pos: Position,
}

impl BufferSizer {
    pub(crate) fn new(options: BufferOptions) -> Self {
        BufferSizer {
            options,
            base_pos: 0,
        }
    }

    pub(crate) fn options(&self) -> &BufferOptions {
        &self.options
    }

    pub(crate) fn set_size_hint(&mut self, size_hint: Option<Position>) {
        self.options.size_hint = size_hint;
    }

    /// Marks `pos` as the point reading began, so growth is measured from
    /// there rather than from an inherited stream position.
    pub(crate) fn begin_run(&mut self, pos: Position) {
        self.base_pos = pos;
    }

    pub(crate) fn buffer_length(
        &self,
        pos: Position,
        min_length: usize,
        recommended_length: usize,
    ) -> usize {
        let grown = pos.saturating_sub(self.base_pos).clamp(
            self.options.min_buffer_size as Position,
            self.options.max_buffer_size as Position,
        ) as usize;
        let mut length = grown.max(min_length).max(recommended_length);
        if let Some(hint) = self.options.size_hint {
            // Near the declared end, shrink the target to what remains.
            let remaining = hint.saturating_sub(pos);
            if remaining > 0 && remaining < length as Position {
                length = (remaining as usize).max(min_length);
            }
        }
        length
    }

    /// Copies the sizing policy to a sibling stream over the same source.
    pub(crate) fn share(&self) -> BufferSizer {
        self.clone()
    }
}

/// The reader-side buffer window.
///
/// `data[..filled]` holds bytes pulled from the source; `cursor` marks how
/// far the consumer has read. Invariants: `cursor <= filled <= data.len()`
/// and `limit_pos` is the absolute source position of `filled`, so
/// `pos() = limit_pos - (filled - cursor)`. The retained prefix
/// `data[..cursor]` allows seeks backward within the window.
#[derive(Debug, Default)]
pub(crate) struct ReadBuf {
    data: Vec<u8>,
    cursor: usize,
    filled: usize,
    limit_pos: Position,
}

impl ReadBuf {
    pub(crate) fn new() -> Self {
        ReadBuf::default()
    }

    pub(crate) fn chunk(&self) -> &[u8] {
        &self.data[self.cursor..self.filled]
    }

    pub(crate) fn available(&self) -> usize {
        self.filled - self.cursor
    }

    pub(crate) fn consume(&mut self, length: usize) {
        assert!(
            length <= self.available(),
            "consumed {length} bytes with only {} available",
            self.available()
        );
        self.cursor += length;
    }

    pub(crate) fn pos(&self) -> Position {
        self.limit_pos - self.available() as Position
    }

    pub(crate) fn start_pos(&self) -> Position {
        self.limit_pos - self.filled as Position
    }

    pub(crate) fn limit_pos(&self) -> Position {
        self.limit_pos
    }

    pub(crate) fn set_limit_pos(&mut self, limit_pos: Position) {
        debug_assert_eq!(self.filled, self.cursor, "repositioning a non-empty buffer");
        self.limit_pos = limit_pos;
    }

    /// Moves the cursor to `new_pos` if it lies within the buffered window.
    pub(crate) fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        if new_pos >= self.start_pos() && new_pos <= self.limit_pos {
            self.cursor = (new_pos - self.start_pos()) as usize;
            true
        } else {
            false
        }
    }

    /// Drops buffered data, keeping the stream position at `pos()`.
    pub(crate) fn drop_buffered(&mut self) {
        self.limit_pos = self.pos();
        self.cursor = 0;
        self.filled = 0;
    }

    /// Discards the consumed prefix and makes room for `spare` more bytes.
    pub(crate) fn make_room(&mut self, spare: usize) {
        if self.cursor > 0 {
            self.data.copy_within(self.cursor..self.filled, 0);
            self.filled -= self.cursor;
            self.cursor = 0;
        }
        let needed = self.filled + spare;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
    }

    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    pub(crate) fn advance_filled(&mut self, length: usize) {
        debug_assert!(self.filled + length <= self.data.len());
        self.filled += length;
        self.limit_pos += length as Position;
    }

    /// Accounts for `length` bytes read from the source directly into a
    /// caller's buffer, bypassing this one.
    pub(crate) fn note_direct_read(&mut self, length: usize) {
        debug_assert_eq!(self.available(), 0, "direct read with buffered data");
        self.cursor = 0;
        self.filled = 0;
        self.limit_pos += length as Position;
    }
}

/// Refill loop shared by buffered readers: compacts the buffer, ensures
/// room for `target_length`, and calls `fill(min_needed, spare, limit_pos)`
/// until at least `min_length` bytes are available. `fill` returns the
/// number of bytes written into `spare`; zero means end-of-source for now.
pub(crate) fn pull_with<F>(
    buf: &mut ReadBuf,
    min_length: usize,
    target_length: usize,
    mut fill: F,
) -> Result<bool, Status>
where
    F: FnMut(usize, &mut [u8], Position) -> Result<usize, Status>,
{
    buf.make_room(target_length.max(min_length));
    while buf.available() < min_length {
        let min_needed = min_length - buf.available();
        let limit_pos = buf.limit_pos();
        let filled = {
            let spare = buf.spare_mut();
            fill(min_needed, spare, limit_pos)?
        };
        if filled == 0 {
            return Ok(false);
        }
        buf.advance_filled(filled);
    }
    Ok(true)
}

/// The writer-side buffer window.
///
/// `data[..cursor]` holds bytes not yet pushed to the destination;
/// `start_pos` is the absolute destination position of `data[0]`, so
/// `pos() = start_pos + cursor`.
#[derive(Debug, Default)]
pub(crate) struct WriteBuf {
    data: Vec<u8>,
    cursor: usize,
    start_pos: Position,
}

impl WriteBuf {
    pub(crate) fn new() -> Self {
        WriteBuf::default()
    }

    pub(crate) fn space(&mut self) -> &mut [u8] {
        &mut self.data[self.cursor..]
    }

    pub(crate) fn available(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub(crate) fn advance(&mut self, length: usize) {
        assert!(
            length <= self.available(),
            "advanced {length} bytes with only {} of space",
            self.available()
        );
        self.cursor += length;
    }

    pub(crate) fn pos(&self) -> Position {
        self.start_pos + self.cursor as Position
    }

    pub(crate) fn start_pos(&self) -> Position {
        self.start_pos
    }

    pub(crate) fn set_start_pos(&mut self, start_pos: Position) {
        debug_assert_eq!(self.cursor, 0, "repositioning a non-empty buffer");
        self.start_pos = start_pos;
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.data[..self.cursor]
    }

    /// Accounts for the buffered bytes having reached the destination.
    pub(crate) fn mark_drained(&mut self) {
        self.start_pos += self.cursor as Position;
        self.cursor = 0;
    }

    /// Accounts for `length` bytes written to the destination directly,
    /// bypassing this buffer.
    pub(crate) fn note_direct_write(&mut self, length: usize) {
        debug_assert_eq!(self.cursor, 0, "direct write with buffered data");
        self.start_pos += length as Position;
    }

    /// Grows the buffer to `target_length` bytes of total capacity.
    pub(crate) fn grow(&mut self, target_length: usize) {
        if self.data.len() < target_length {
            self.data.resize(target_length, 0);
        }
    }
}
