use std::sync::Arc;

use once_cell::sync::Lazy;
use zstd::stream::raw::{Decoder, InBuffer, Operation as _, OutBuffer};
use zstd::zstd_safe::DParameter;

use crate::{
    buffer::{BufferOptions, BufferSizer, ReadBuf},
    reader::{seek_forward_by_reading, Reader},
    recycling_pool::{Recycled, RecyclingPool, DEFAULT_MAX_IDLE_PER_KEY},
    state::StreamState,
    status::{Position, Status},
};

/// Largest window the decoder accepts, bounded by the address space.
const MAX_WINDOW_LOG: u32 = if cfg!(target_pointer_width = "32") { 30 } else { 31 };

/// Frame header bounds: `get_frame_content_size` needs at least the 5-byte
/// prefix and never more than 18 bytes.
const FRAME_HEADER_SIZE_PREFIX: usize = 5;
const FRAME_HEADER_SIZE_MAX: usize = 18;

/// Skippable frames use magic numbers 0x184D2A50 through 0x184D2A5F.
const SKIPPABLE_FRAME_MAGIC: u32 = 0x184D_2A50;
const SKIPPABLE_FRAME_MAGIC_MASK: u32 = 0xFFFF_FFF0;

/// Decompression contexts are expensive and most streams are short, so
/// contexts are shared process-wide. Recycling resets the session and
/// clears the stable-output promise a previous holder may have made.
static DECOMPRESSOR_POOL: Lazy<RecyclingPool<Decoder<'static>>> =
    Lazy::new(|| RecyclingPool::new(DEFAULT_MAX_IDLE_PER_KEY, recycle_decompressor));

fn recycle_decompressor(decoder: &mut Decoder<'static>) -> bool {
    decoder.reinit().is_ok()
        && decoder
            .set_parameter(DParameter::StableOutBuffer(false))
            .is_ok()
}

/// A shared decompression dictionary: an immutable artifact prepared once
/// and attached to any number of decoders.
#[derive(Debug, Clone)]
pub struct ZstdDictionary {
    data: Arc<[u8]>,
}

impl ZstdDictionary {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        ZstdDictionary {
            data: Arc::from(data.into()),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Options for [`ZstdReader`].
#[derive(Debug, Clone, Default)]
pub struct ZstdReaderOptions {
    growing_source: bool,
    dictionary: Option<ZstdDictionary>,
    buffer_options: BufferOptions,
}

impl ZstdReaderOptions {
    pub fn new() -> Self {
        ZstdReaderOptions {
            growing_source: false,
            dictionary: None,
            buffer_options: BufferOptions::new(),
        }
    }

    /// Declares that the compressed source may keep growing: running out
    /// of compressed data mid-frame is then not an error, and reading
    /// again retries from where the data ended.
    pub fn with_growing_source(mut self, growing_source: bool) -> Self {
        self.growing_source = growing_source;
        self
    }

    pub fn with_dictionary(mut self, dictionary: ZstdDictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn with_buffer_options(mut self, buffer_options: BufferOptions) -> Self {
        self.buffer_options = buffer_options;
        self
    }
}

/// Either a process-pool context or a context constructed for this reader
/// because it needs a dictionary loaded.
enum ZstdDecompressor {
    Pooled(Recycled<'static, Decoder<'static>>),
    Dedicated(Decoder<'static>),
}

impl ZstdDecompressor {
    fn get(&mut self) -> &mut Decoder<'static> {
        match self {
            ZstdDecompressor::Pooled(decoder) => decoder,
            ZstdDecompressor::Dedicated(decoder) => decoder,
        }
    }
}

/// How a refill attempt failed.
enum ZstdFillError {
    /// A failure of this decoder; annotated with the full layer context.
    Stream(Status),
    /// The source failed; its status is already annotated, only the
    /// uncompressed position is added.
    Source(Status),
}

struct ZstdCore<R> {
    src: R,
    decompressor: Option<ZstdDecompressor>,
    dictionary: Option<ZstdDictionary>,
    /// Where the frame started in the source, for rewinds and independent
    /// readers.
    initial_compressed_pos: Position,
    growing_source: bool,
    just_initialized: bool,
    truncated: bool,
    exact_size: Option<Position>,
}

impl<R: Reader> ZstdCore<R> {
    fn initialize_decompressor(&mut self) -> Result<(), Status> {
        let mut decompressor = match &self.dictionary {
            None => ZstdDecompressor::Pooled(DECOMPRESSOR_POOL.get((), || {
                Decoder::new().expect("ZSTD_createDCtx() failed")
            })),
            Some(dictionary) => ZstdDecompressor::Dedicated(
                Decoder::with_dictionary(dictionary.as_bytes()).map_err(|e| {
                    Status::internal(format!("ZSTD_DCtx_loadDictionary() failed: {e}"))
                })?,
            ),
        };
        decompressor
            .get()
            .set_parameter(DParameter::WindowLogMax(MAX_WINDOW_LOG))
            .map_err(|e| {
                Status::internal(format!(
                    "ZSTD_DCtx_setParameter(ZSTD_d_windowLogMax) failed: {e}"
                ))
            })?;
        self.exact_size = zstd_uncompressed_size(&mut self.src);
        self.just_initialized = true;
        self.decompressor = Some(decompressor);
        Ok(())
    }

    /// Decompresses at least `min_length` bytes into `dest`, pulling
    /// compressed data from the source as needed. Returns the number of
    /// bytes produced together with the failure, if any; zero bytes with
    /// no failure is end-of-stream (or end-of-data-so-far for a growing
    /// source).
    fn read_internal(
        &mut self,
        min_length: usize,
        dest: &mut [u8],
        limit_pos: Position,
    ) -> (usize, Option<ZstdFillError>) {
        if self.decompressor.is_none() {
            return (0, None);
        }
        self.truncated = false;
        if self.just_initialized && self.exact_size.is_none() {
            // The source may have grown enough to hold the frame header.
            self.exact_size = zstd_uncompressed_size(&mut self.src);
        }
        let mut effective_min_length = min_length;
        if self.just_initialized && !self.growing_source {
            if let Some(size) = self.exact_size {
                if dest.len() as Position >= size {
                    // The whole frame fits in `dest`: promise a stable
                    // output buffer, letting zstd decompress straight into
                    // it without an internal copy, and decode everything
                    // in this call.
                    let result = self
                        .decompressor
                        .as_mut()
                        .expect("decompressor just checked")
                        .get()
                        .set_parameter(DParameter::StableOutBuffer(true));
                    if let Err(e) = result {
                        return (
                            0,
                            Some(ZstdFillError::Stream(Status::internal(format!(
                                "ZSTD_DCtx_setParameter(ZSTD_d_stableOutBuffer) failed: {e}"
                            )))),
                        );
                    }
                    effective_min_length = usize::MAX;
                }
            }
        }
        self.just_initialized = false;
        let max_length = (dest.len() as Position).min(Position::MAX - limit_pos) as usize;
        let mut output = OutBuffer::around(&mut dest[..max_length]);
        loop {
            let (result, consumed) = {
                let mut input = InBuffer::around(self.src.chunk());
                let result = self
                    .decompressor
                    .as_mut()
                    .expect("decompressor just checked")
                    .get()
                    .run(&mut input, &mut output);
                (result, input.pos())
            };
            self.src.consume(consumed);
            let hint = match result {
                Ok(0) => {
                    // Frame end. Return the context while it is cheap to
                    // reuse; further reads report end-of-stream.
                    self.decompressor = None;
                    return (output.pos(), None);
                }
                Ok(hint) => hint,
                Err(e) => {
                    return (
                        output.pos(),
                        Some(ZstdFillError::Stream(Status::invalid_argument(format!(
                            "ZSTD_decompressStream() failed: {e}"
                        )))),
                    );
                }
            };
            if output.pos() >= effective_min_length {
                return (output.pos(), None);
            }
            if self.src.available() > 0 {
                // Output space ran out while compressed data remains: the
                // decoded position cannot be represented.
                return (
                    output.pos(),
                    Some(ZstdFillError::Stream(Status::resource_exhausted(
                        "reader position overflow",
                    ))),
                );
            }
            if !self.src.pull(1, hint) {
                let produced = output.pos();
                if !self.src.ok() {
                    let status = self
                        .src
                        .status()
                        .cloned()
                        .expect("source reported !ok without a status");
                    return (produced, Some(ZstdFillError::Source(status)));
                }
                if !self.growing_source {
                    return (
                        produced,
                        Some(ZstdFillError::Stream(Status::invalid_argument(
                            "Truncated Zstd-compressed stream",
                        ))),
                    );
                }
                self.truncated = true;
                return (produced, None);
            }
        }
    }
}

/// A reader decompressing one Zstd frame (RFC 8878) from another reader.
///
/// The source is left positioned just past the compressed data, so framed
/// container formats can keep parsing after the frame. A skippable frame
/// decompresses to zero bytes.
pub struct ZstdReader<R> {
    core: ZstdCore<R>,
    buf: ReadBuf,
    sizer: BufferSizer,
    state: StreamState,
}

impl<R: Reader> ZstdReader<R> {
    pub fn new(src: R, options: ZstdReaderOptions) -> Self {
        let initial_compressed_pos = src.pos();
        let mut core = ZstdCore {
            src,
            decompressor: None,
            dictionary: options.dictionary,
            initial_compressed_pos,
            growing_source: options.growing_source,
            just_initialized: false,
            truncated: false,
            exact_size: None,
        };
        let mut sizer = BufferSizer::new(options.buffer_options);
        let mut state = StreamState::new();
        if !core.src.ok() && core.src.available() == 0 {
            let status = core
                .src
                .status()
                .cloned()
                .expect("source reported !ok without a status")
                .annotate("at uncompressed byte 0");
            state = StreamState::failed(status);
        } else if let Err(status) = core.initialize_decompressor() {
            state = StreamState::failed(status.annotate("at uncompressed byte 0"));
        }
        sizer.set_size_hint(core.exact_size);
        ZstdReader {
            core,
            buf: ReadBuf::new(),
            sizer,
            state,
        }
    }

    /// The source reader. Its position is wherever decompression last left
    /// it.
    pub fn src(&self) -> &R {
        &self.core.src
    }

    /// Whether the last read stopped at the end of a growing source with
    /// the frame unfinished.
    pub fn is_truncated(&self) -> bool {
        self.core.truncated
    }

    fn annotate_over_src(&self, status: Status) -> Status {
        if self.state.is_open() {
            status.annotate(format!("at uncompressed byte {}", self.pos()))
        } else {
            status
        }
    }

    fn latch(&mut self, failure: ZstdFillError) {
        match failure {
            ZstdFillError::Stream(status) => {
                self.fail(status);
            }
            ZstdFillError::Source(status) => {
                let status = self.annotate_over_src(status);
                self.fail_without_annotation(status);
            }
        }
    }
}

impl<R: Reader> Reader for ZstdReader<R> {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state.is_open() {
            if self.core.truncated && self.core.growing_source && self.state.ok() {
                let status =
                    self.annotate_status(Status::invalid_argument("Truncated Zstd-compressed stream"));
                self.state.fail(status);
            }
            self.core.decompressor = None;
            if let Err(status) = self.core.src.close() {
                if self.state.ok() {
                    let status = self.annotate_over_src(status);
                    self.state.fail(status);
                }
            }
            self.buf.drop_buffered();
            self.state.close();
        }
        self.state.close_result()
    }

    fn chunk(&self) -> &[u8] {
        self.buf.chunk()
    }

    fn consume(&mut self, length: usize) {
        self.buf.consume(length)
    }

    fn pos(&self) -> Position {
        self.buf.pos()
    }

    fn start_pos(&self) -> Position {
        self.buf.start_pos()
    }

    fn limit_pos(&self) -> Position {
        self.buf.limit_pos()
    }

    fn pull(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.buf.available() >= min_length {
            return true;
        }
        if !self.state.ok() || !self.state.is_open() {
            return false;
        }
        // After the frame ended the context is gone; do not allocate a
        // buffer just to report end-of-stream.
        if self.core.decompressor.is_none() {
            return false;
        }
        let target = self
            .sizer
            .buffer_length(self.buf.pos(), min_length, recommended_length);
        self.buf.make_room(target.max(min_length));
        while self.buf.available() < min_length {
            let min_needed = min_length - self.buf.available();
            let limit_pos = self.buf.limit_pos();
            let Self { core, buf, .. } = self;
            let (produced, failure) = core.read_internal(min_needed, buf.spare_mut(), limit_pos);
            buf.advance_filled(produced);
            match failure {
                None => {
                    if produced == 0 {
                        break;
                    }
                }
                Some(failure) => {
                    self.latch(failure);
                    break;
                }
            }
        }
        self.buf.available() >= min_length
    }

    fn supports_rewind(&self) -> bool {
        self.core.src.supports_rewind()
    }

    fn supports_size(&self) -> bool {
        self.core.exact_size.is_some()
    }

    fn supports_new_reader(&self) -> bool {
        self.core.src.supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.core.src.tolerates_reading_ahead()
    }

    fn set_read_all_hint(&mut self, read_all_hint: bool) {
        self.core.src.set_read_all_hint(read_all_hint);
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state.is_open() {
            let status = if self.core.truncated {
                status.annotate("reading truncated Zstd-compressed stream")
            } else {
                status
            };
            let status = self.core.src.annotate_status(status);
            status.annotate(format!("at uncompressed byte {}", self.pos()))
        } else {
            status
        }
    }

    fn read(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dest.len() {
            if self.buf.available() > 0 {
                let length = self.buf.available().min(dest.len() - copied);
                dest[copied..copied + length].copy_from_slice(&self.buf.chunk()[..length]);
                self.buf.consume(length);
                copied += length;
                continue;
            }
            if !self.state.ok() || !self.state.is_open() || self.core.decompressor.is_none() {
                break;
            }
            let remaining = dest.len() - copied;
            let target = self.sizer.buffer_length(self.buf.pos(), 1, remaining);
            if remaining >= target {
                // Decompress straight into the caller's slice; with the
                // whole frame fitting this is the stable-output path.
                let limit_pos = self.buf.limit_pos();
                let Self { core, buf, .. } = self;
                let (produced, failure) =
                    core.read_internal(remaining, &mut dest[copied..], limit_pos);
                buf.note_direct_read(produced);
                copied += produced;
                if let Some(failure) = failure {
                    self.latch(failure);
                    break;
                }
                if produced == 0 {
                    break;
                }
            } else if !self.pull(1, remaining) {
                break;
            }
        }
        copied
    }

    fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        self.buf.seek_in_buffer(new_pos)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if new_pos <= self.buf.limit_pos() {
            // Seeking backwards: restart the frame and decode forward.
            if !self.state.ok() {
                return false;
            }
            if !self.core.src.supports_rewind() {
                return self.fail(Status::unimplemented(
                    "seeking backwards requires a rewindable source",
                ));
            }
            self.core.truncated = false;
            self.buf.drop_buffered();
            self.buf.set_limit_pos(0);
            self.core.decompressor = None;
            if !self.core.src.seek(self.core.initial_compressed_pos) {
                let status = match self.core.src.status() {
                    Some(status) => status.clone(),
                    None => self
                        .core
                        .src
                        .annotate_status(Status::data_loss("Zstd-compressed stream got truncated")),
                };
                let status = self.annotate_over_src(status);
                return self.fail_without_annotation(status);
            }
            if let Err(status) = self.core.initialize_decompressor() {
                return self.fail(status);
            }
            self.sizer.set_size_hint(self.core.exact_size);
            if new_pos == 0 {
                return true;
            }
        }
        seek_forward_by_reading(self, new_pos)
    }

    fn size(&mut self) -> Option<Position> {
        if !self.state.ok() {
            return None;
        }
        match self.core.exact_size {
            Some(size) => Some(size),
            None => {
                self.fail(Status::unimplemented(
                    "Uncompressed size was not stored in the Zstd-compressed stream",
                ));
                None
            }
        }
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.core.src.supports_new_reader() {
            if self.state.ok() {
                self.fail(Status::unimplemented(
                    "independent readers require a source that supports them",
                ));
            }
            return None;
        }
        if !self.state.ok() {
            return None;
        }
        // Safe to call concurrently from here if the source's independent
        // readers are.
        let compressed_reader = match self.core.src.new_reader(self.core.initial_compressed_pos) {
            Some(reader) => reader,
            None => {
                let status = self
                    .core
                    .src
                    .status()
                    .cloned()
                    .expect("source refused a new reader without a status");
                let status = self.annotate_over_src(status);
                self.fail_without_annotation(status);
                return None;
            }
        };
        let mut reader = ZstdReader::new(
            compressed_reader,
            ZstdReaderOptions {
                growing_source: self.core.growing_source,
                dictionary: self.core.dictionary.clone(),
                buffer_options: *self.sizer.options(),
            },
        );
        reader.seek(initial_pos);
        Some(Box::new(reader))
    }
}

/// Reads the uncompressed size declared by the Zstd frame the source is
/// positioned at, without consuming it. `Some(0)` for a skippable frame;
/// `None` when the frame does not declare its size or no complete header
/// is available.
pub fn zstd_uncompressed_size<R: Reader + ?Sized>(src: &mut R) -> Option<Position> {
    if !src.pull(FRAME_HEADER_SIZE_PREFIX, FRAME_HEADER_SIZE_MAX) {
        return None;
    }
    loop {
        let chunk = src.chunk();
        let magic = u32::from_le_bytes(chunk[..4].try_into().expect("pull returned short chunk"));
        if magic & SKIPPABLE_FRAME_MAGIC_MASK == SKIPPABLE_FRAME_MAGIC {
            return Some(0);
        }
        match zstd::zstd_safe::get_frame_content_size(chunk) {
            Ok(Some(size)) => return Some(size),
            Ok(None) => return None,
            Err(_) => {
                // Possibly just a short header; retry with more bytes.
                let have = src.available();
                if have >= FRAME_HEADER_SIZE_MAX || !src.pull(have + 1, FRAME_HEADER_SIZE_MAX) {
                    return None;
                }
            }
        }
    }
}
