use crate::{
    chain::Chain,
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
};

/// Scope of a [`Writer::flush`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushType {
    /// Make the data visible to the destination this writer writes to.
    /// A no-op for layers that do not own their destination.
    FromObject,
    /// Make the data visible to other processes, e.g. written to the file
    /// descriptor.
    FromProcess,
    /// Make the data durable across machine failure, e.g. fsynced.
    FromMachine,
}

/// A buffered byte sink, the mirror of [`Reader`].
///
/// A writer exposes free buffered space through [`space`](Writer::space)
/// and [`advance`](Writer::advance); [`push`](Writer::push) makes room when
/// the window fills. `pos()` is the position the next byte goes to and
/// `start_pos()` is the destination position of the start of the buffered
/// window.
///
/// Failures latch, exactly as on readers. A `&mut W` is a borrowed
/// dependency whose `close` only detaches.
pub trait Writer {
    fn state(&self) -> &StreamState;

    fn state_mut(&mut self) -> &mut StreamState;

    /// Flushes buffered data and closes the writer. Idempotent; reports
    /// the latched failure if there is one.
    fn close(&mut self) -> Result<(), Status>;

    /// Position of the next byte to be written.
    fn pos(&self) -> Position;

    /// Destination position corresponding to the start of the buffered
    /// window.
    fn start_pos(&self) -> Position;

    /// Free space in the buffered window.
    fn available(&self) -> usize;

    /// The writable window. Bytes placed here become part of the stream
    /// once [`advance`](Writer::advance) is called.
    fn space(&mut self) -> &mut [u8];

    /// Commits `length` bytes previously placed in `space()`.
    ///
    /// Panics if `length > available()`.
    fn advance(&mut self, length: usize);

    /// Ensures `available() >= min_length`, preferably
    /// `recommended_length`. `push(0, _)` never allocates. Returns `false`
    /// on failure.
    fn push(&mut self, min_length: usize, recommended_length: usize) -> bool;

    /// Propagates buffered data toward the ultimate destination, as far as
    /// `flush_type` requests. Returns `false` on failure.
    fn flush(&mut self, flush_type: FlushType) -> bool;

    fn supports_random_access(&self) -> bool {
        false
    }

    fn supports_read_mode(&self) -> bool {
        false
    }

    fn supports_truncate(&self) -> bool {
        false
    }

    /// Whether the writer would rather receive copied bytes than shared
    /// blocks, e.g. because it flattens everything anyway.
    fn prefers_copying(&self) -> bool {
        false
    }

    fn ok(&self) -> bool {
        self.state().ok()
    }

    fn status(&self) -> Option<&Status> {
        self.state().status()
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state().is_open() {
            status.annotate(format!("at byte {}", self.pos()))
        } else {
            status
        }
    }

    fn fail(&mut self, status: Status) -> bool {
        let annotated = self.annotate_status(status);
        self.state_mut().fail(annotated)
    }

    fn fail_without_annotation(&mut self, status: Status) -> bool {
        self.state_mut().fail(status)
    }

    fn fail_overflow(&mut self) -> bool {
        self.fail(Status::resource_exhausted("writer position overflow"))
    }

    /// Writes all of `src`. Returns `false` on failure; the amount written
    /// before a failure is unspecified.
    fn write(&mut self, mut src: &[u8]) -> bool {
        loop {
            let length = self.available().min(src.len());
            self.space()[..length].copy_from_slice(&src[..length]);
            self.advance(length);
            src = &src[length..];
            if src.is_empty() {
                return true;
            }
            if !self.push(1, src.len()) {
                return false;
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        self.write(std::slice::from_ref(&byte))
    }

    /// Writes every block of `src`. Writers that keep shared blocks may
    /// override this to steal them instead of copying.
    fn write_chain(&mut self, src: &Chain) -> bool {
        for block in src.blocks() {
            if !self.write(block) {
                return false;
            }
        }
        true
    }

    /// Writes `length` zero bytes, filling across buffer boundaries.
    fn write_zeros(&mut self, length: Position) -> bool {
        self.write_chars(length, 0)
    }

    /// Writes `length` copies of `byte`, filling across buffer boundaries.
    fn write_chars(&mut self, mut length: Position, byte: u8) -> bool {
        loop {
            let fill = (self.available() as Position).min(length) as usize;
            self.space()[..fill].fill(byte);
            self.advance(fill);
            length -= fill as Position;
            if length == 0 {
                return true;
            }
            if !self.push(1, length.min(usize::MAX as Position) as usize) {
                return false;
            }
        }
    }

    /// Writes the decimal representation of `value`. Negative NaN is
    /// normalized to positive NaN so the output is deterministic.
    fn write_f32(&mut self, value: f32) -> bool {
        let value = if value.is_nan() { f32::NAN } else { value };
        self.write(format!("{value}").as_bytes())
    }

    fn write_f64(&mut self, value: f64) -> bool {
        let value = if value.is_nan() { f64::NAN } else { value };
        self.write(format!("{value}").as_bytes())
    }

    /// Sets the position for subsequent writes, for writers with random
    /// access to their destination.
    fn seek(&mut self, new_pos: Position) -> bool {
        if new_pos == self.pos() {
            return self.ok();
        }
        self.fail(Status::unimplemented("seeking is not supported by this writer"))
    }

    /// The current size of the destination, where known.
    fn size(&mut self) -> Option<Position> {
        self.fail(Status::unimplemented("size is not supported by this writer"));
        None
    }

    /// Discards destination data past `new_size`.
    fn truncate(&mut self, new_size: Position) -> bool {
        let _ = new_size;
        self.fail(Status::unimplemented("truncation is not supported by this writer"))
    }

    /// Returns a reader over the bytes already written, positioned at
    /// `initial_pos`, for writers whose destination can be read back.
    /// Buffered data is flushed first.
    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        let _ = initial_pos;
        self.fail(Status::unimplemented("read mode is not supported by this writer"));
        None
    }

    /// Reveals the file-descriptor sink under this writer, if it is one,
    /// so sources can copy kernel-to-kernel.
    #[cfg(unix)]
    fn as_fd_writer(&mut self) -> Option<&mut crate::fd_writer::FdWriter> {
        None
    }
}

macro_rules! forward_writer_methods {
    () => {
        fn state(&self) -> &StreamState {
            (**self).state()
        }
        fn state_mut(&mut self) -> &mut StreamState {
            (**self).state_mut()
        }
        fn pos(&self) -> Position {
            (**self).pos()
        }
        fn start_pos(&self) -> Position {
            (**self).start_pos()
        }
        fn available(&self) -> usize {
            (**self).available()
        }
        fn space(&mut self) -> &mut [u8] {
            (**self).space()
        }
        fn advance(&mut self, length: usize) {
            (**self).advance(length)
        }
        fn push(&mut self, min_length: usize, recommended_length: usize) -> bool {
            (**self).push(min_length, recommended_length)
        }
        fn flush(&mut self, flush_type: FlushType) -> bool {
            (**self).flush(flush_type)
        }
        fn supports_random_access(&self) -> bool {
            (**self).supports_random_access()
        }
        fn supports_read_mode(&self) -> bool {
            (**self).supports_read_mode()
        }
        fn supports_truncate(&self) -> bool {
            (**self).supports_truncate()
        }
        fn prefers_copying(&self) -> bool {
            (**self).prefers_copying()
        }
        fn annotate_status(&self, status: Status) -> Status {
            (**self).annotate_status(status)
        }
        fn write(&mut self, src: &[u8]) -> bool {
            (**self).write(src)
        }
        fn write_byte(&mut self, byte: u8) -> bool {
            (**self).write_byte(byte)
        }
        fn write_chain(&mut self, src: &Chain) -> bool {
            (**self).write_chain(src)
        }
        fn write_zeros(&mut self, length: Position) -> bool {
            (**self).write_zeros(length)
        }
        fn write_chars(&mut self, length: Position, byte: u8) -> bool {
            (**self).write_chars(length, byte)
        }
        fn write_f32(&mut self, value: f32) -> bool {
            (**self).write_f32(value)
        }
        fn write_f64(&mut self, value: f64) -> bool {
            (**self).write_f64(value)
        }
        fn seek(&mut self, new_pos: Position) -> bool {
            (**self).seek(new_pos)
        }
        fn size(&mut self) -> Option<Position> {
            (**self).size()
        }
        fn truncate(&mut self, new_size: Position) -> bool {
            (**self).truncate(new_size)
        }
        fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
            (**self).read_mode(initial_pos)
        }
        #[cfg(unix)]
        fn as_fd_writer(&mut self) -> Option<&mut crate::fd_writer::FdWriter> {
            (**self).as_fd_writer()
        }
    };
}

/// A borrowed dependency: operations forward to the underlying writer, but
/// `close` only flushes this layer's view and detaches.
impl<W: Writer + ?Sized> Writer for &mut W {
    forward_writer_methods!();

    fn close(&mut self) -> Result<(), Status> {
        self.flush(FlushType::FromObject);
        self.state().close_result()
    }
}

impl<W: Writer + ?Sized> Writer for Box<W> {
    forward_writer_methods!();

    fn close(&mut self) -> Result<(), Status> {
        (**self).close()
    }
}
