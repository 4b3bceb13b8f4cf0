use once_cell::sync::Lazy;
use zstd::stream::raw::{Encoder, InBuffer, Operation as _, OutBuffer};
use zstd::zstd_safe::{CCtx, CParameter};

use crate::{
    buffer::{BufferOptions, BufferSizer, WriteBuf},
    recycling_pool::{Recycled, RecyclingPool, DEFAULT_MAX_IDLE_PER_KEY},
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

/// Compression contexts are pooled like decompression contexts; the level
/// and pledged size are set anew by each acquirer, so recycling only has
/// to reset the session.
static COMPRESSOR_POOL: Lazy<RecyclingPool<Encoder<'static>>> =
    Lazy::new(|| RecyclingPool::new(DEFAULT_MAX_IDLE_PER_KEY, recycle_compressor));

fn recycle_compressor(encoder: &mut Encoder<'static>) -> bool {
    encoder.reinit().is_ok()
}

/// Options for [`ZstdWriter`].
#[derive(Debug, Clone)]
pub struct ZstdWriterOptions {
    compression_level: i32,
    final_size: Option<Position>,
    buffer_options: BufferOptions,
}

impl ZstdWriterOptions {
    pub fn new() -> Self {
        ZstdWriterOptions {
            compression_level: 0,
            final_size: None,
            buffer_options: BufferOptions::new(),
        }
    }

    /// Compression level; `0` means the zstd default.
    pub fn with_compression_level(mut self, compression_level: i32) -> Self {
        self.compression_level = compression_level;
        self
    }

    /// Declares the exact number of bytes that will be written. The size
    /// is stored in the frame header, so readers learn it up front;
    /// writing a different number of bytes fails.
    pub fn with_final_size(mut self, final_size: Option<Position>) -> Self {
        self.final_size = final_size;
        self
    }

    pub fn with_buffer_options(mut self, buffer_options: BufferOptions) -> Self {
        self.buffer_options = buffer_options;
        self
    }
}

impl Default for ZstdWriterOptions {
    fn default() -> Self {
        ZstdWriterOptions::new()
    }
}

enum ZstdDrainError {
    /// A failure of this writer; annotated with the full layer context.
    Stream(Status),
    /// The destination failed; its status is already annotated.
    Dest(Status),
}

fn dest_error<W: Writer + ?Sized>(dest: &W) -> ZstdDrainError {
    ZstdDrainError::Dest(
        dest.status()
            .cloned()
            .expect("destination reported !ok without a status"),
    )
}

/// Runs `data` through `compressor`, pushing compressed output to `dest`
/// until everything is consumed.
fn compress_into<W: Writer>(
    dest: &mut W,
    compressor: &mut Encoder<'static>,
    data: &[u8],
) -> Result<(), ZstdDrainError> {
    let mut consumed = 0;
    while consumed < data.len() {
        if !dest.push(1, CCtx::out_size()) {
            return Err(dest_error(dest));
        }
        let (result, produced, eaten) = {
            let mut output = OutBuffer::around(dest.space());
            let mut input = InBuffer::around(&data[consumed..]);
            let result = compressor.run(&mut input, &mut output);
            (result, output.pos(), input.pos())
        };
        dest.advance(produced);
        consumed += eaten;
        if let Err(e) = result {
            return Err(ZstdDrainError::Stream(Status::internal(format!(
                "ZSTD_compressStream2() failed: {e}"
            ))));
        }
    }
    Ok(())
}

/// Drives `operation` (flush or finish) until the compressor reports
/// nothing left to emit.
fn drain_compressor<W: Writer>(
    dest: &mut W,
    compressor: &mut Encoder<'static>,
    mut operation: impl FnMut(&mut Encoder<'static>, &mut OutBuffer<'_, [u8]>) -> std::io::Result<usize>,
) -> Result<(), ZstdDrainError> {
    loop {
        if !dest.push(1, CCtx::out_size()) {
            return Err(dest_error(dest));
        }
        let (result, produced) = {
            let mut output = OutBuffer::around(dest.space());
            let result = operation(compressor, &mut output);
            (result, output.pos())
        };
        dest.advance(produced);
        match result {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) => {
                return Err(ZstdDrainError::Stream(Status::internal(format!(
                    "ZSTD_compressStream2() failed: {e}"
                ))))
            }
        }
    }
}

/// A writer compressing everything it receives into one Zstd frame on the
/// destination writer, the mirror of
/// [`ZstdReader`](crate::zstd_reader::ZstdReader).
///
/// Closing finishes the frame; [`flush`](Writer::flush) produces a block
/// boundary so everything written so far can already be decompressed.
pub struct ZstdWriter<W: Writer> {
    dest: W,
    compressor: Option<Recycled<'static, Encoder<'static>>>,
    buf: WriteBuf,
    sizer: BufferSizer,
    state: StreamState,
}

impl<W: Writer> ZstdWriter<W> {
    pub fn new(dest: W, options: ZstdWriterOptions) -> Self {
        let mut writer = ZstdWriter {
            dest,
            compressor: None,
            buf: WriteBuf::new(),
            sizer: BufferSizer::new(options.buffer_options),
            state: StreamState::new(),
        };
        if !writer.dest.ok() {
            let status = writer
                .dest
                .status()
                .cloned()
                .expect("destination reported !ok without a status")
                .annotate("at uncompressed byte 0");
            writer.state = StreamState::failed(status);
            return writer;
        }
        if let Err(status) = writer.initialize_compressor(&options) {
            writer.state = StreamState::failed(status.annotate("at uncompressed byte 0"));
        }
        writer.sizer.set_size_hint(options.final_size);
        writer
    }

    /// The destination writer, holding whatever compressed bytes have been
    /// pushed so far.
    pub fn dest(&self) -> &W {
        &self.dest
    }

    fn initialize_compressor(&mut self, options: &ZstdWriterOptions) -> Result<(), Status> {
        let mut compressor =
            COMPRESSOR_POOL.get((), || Encoder::new(0).expect("ZSTD_createCCtx() failed"));
        compressor
            .set_parameter(CParameter::CompressionLevel(options.compression_level))
            .map_err(|e| {
                Status::internal(format!(
                    "ZSTD_CCtx_setParameter(ZSTD_c_compressionLevel) failed: {e}"
                ))
            })?;
        compressor
            .set_pledged_src_size(options.final_size)
            .map_err(|e| Status::internal(format!("ZSTD_CCtx_setPledgedSrcSize() failed: {e}")))?;
        self.compressor = Some(compressor);
        Ok(())
    }

    fn latch(&mut self, failure: ZstdDrainError) -> bool {
        match failure {
            ZstdDrainError::Stream(status) => self.fail(status),
            ZstdDrainError::Dest(status) => {
                let status = if self.state.is_open() {
                    status.annotate(format!("at uncompressed byte {}", self.pos()))
                } else {
                    status
                };
                self.fail_without_annotation(status)
            }
        }
    }

    /// Compresses whatever is staged in the uncompressed buffer.
    fn drain_buffer(&mut self) -> Result<(), ZstdDrainError> {
        if self.buf.written().is_empty() {
            return Ok(());
        }
        let Self {
            dest,
            compressor,
            buf,
            ..
        } = self;
        let Some(compressor) = compressor.as_mut() else {
            return Err(ZstdDrainError::Stream(Status::internal(
                "the Zstd frame was already finished",
            )));
        };
        compress_into(dest, compressor, buf.written())?;
        buf.mark_drained();
        Ok(())
    }

    /// Finishes the frame, after which nothing more can be written.
    fn finish_frame(&mut self) -> Result<(), ZstdDrainError> {
        self.drain_buffer()?;
        let Self {
            dest, compressor, ..
        } = self;
        if let Some(compressor) = compressor.as_mut() {
            drain_compressor(dest, compressor, |encoder, output| {
                encoder.finish(output, false)
            })?;
        }
        self.compressor = None;
        Ok(())
    }
}

impl<W: Writer> Writer for ZstdWriter<W> {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state.is_open() {
            if self.state.ok() {
                if let Err(failure) = self.finish_frame() {
                    self.latch(failure);
                }
            }
            self.compressor = None;
            if let Err(status) = self.dest.close() {
                if self.state.ok() {
                    let status = status.annotate(format!("at uncompressed byte {}", self.pos()));
                    self.state.fail(status);
                }
            }
            self.state.close();
        }
        self.state.close_result()
    }

    fn pos(&self) -> Position {
        self.buf.pos()
    }

    fn start_pos(&self) -> Position {
        self.buf.start_pos()
    }

    fn available(&self) -> usize {
        self.buf.available()
    }

    fn space(&mut self) -> &mut [u8] {
        self.buf.space()
    }

    fn advance(&mut self, length: usize) {
        self.buf.advance(length)
    }

    fn push(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.buf.available() >= min_length {
            return true;
        }
        if !self.state.ok() || !self.state.is_open() {
            return false;
        }
        if let Err(failure) = self.drain_buffer() {
            return self.latch(failure);
        }
        let target = self
            .sizer
            .buffer_length(self.buf.pos(), min_length, recommended_length);
        self.buf.grow(target.max(min_length));
        true
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        if !self.state.ok() || !self.state.is_open() {
            return false;
        }
        if let Err(failure) = self.drain_buffer() {
            return self.latch(failure);
        }
        // Emit a block boundary so everything written so far decompresses.
        let Self {
            dest, compressor, ..
        } = self;
        if let Some(compressor) = compressor.as_mut() {
            if let Err(failure) = drain_compressor(dest, compressor, |encoder, output| {
                encoder.flush(output)
            }) {
                return self.latch(failure);
            }
        }
        if !self.dest.flush(flush_type) {
            let failure = dest_error(&self.dest);
            return self.latch(failure);
        }
        true
    }

    fn prefers_copying(&self) -> bool {
        true
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state.is_open() {
            let status = self.dest.annotate_status(status);
            status.annotate(format!("at uncompressed byte {}", self.pos()))
        } else {
            status
        }
    }

    fn write(&mut self, src: &[u8]) -> bool {
        // Large writes compress straight from the caller's slice.
        let target = self.sizer.buffer_length(self.buf.pos(), 1, 0);
        if src.len() >= target {
            if !self.state.ok() || !self.state.is_open() {
                return false;
            }
            if let Err(failure) = self.drain_buffer() {
                return self.latch(failure);
            }
            let Self {
                dest, compressor, ..
            } = self;
            let Some(compressor) = compressor.as_mut() else {
                return self.fail(Status::internal("the Zstd frame was already finished"));
            };
            if let Err(failure) = compress_into(dest, compressor, src) {
                return self.latch(failure);
            }
            self.buf.note_direct_write(src.len());
            return true;
        }
        let mut src = src;
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
}

impl<W: Writer> Drop for ZstdWriter<W> {
    fn drop(&mut self) {
        // Best effort: finish the frame so the output is well formed even
        // without an explicit close.
        if self.state.is_open() && self.state.ok() {
            let _ = self.finish_frame();
            let _ = self.dest.flush(FlushType::FromObject);
        }
    }
}
