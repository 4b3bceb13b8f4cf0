use std::fs::{File, OpenOptions};
use std::io::{Seek as _, SeekFrom, Write as _};
use std::os::unix::fs::{FileExt as _, FileTypeExt as _};
use std::os::unix::io::{AsRawFd as _, RawFd};
use std::path::Path;

use crate::{
    buffer::{BufferOptions, BufferSizer, WriteBuf},
    fd_reader::{operation_failed, FdReader, FdReaderOptions},
    reader::Reader,
    state::StreamState,
    status::{Position, Status},
    writer::{FlushType, Writer},
};

const MAX_OFFSET: Position = i64::MAX as Position;

/// Cap on a single write syscall, mirroring the read-side cap.
const MAX_WRITE_LENGTH: usize = 1 << 30;

/// Options for [`FdWriter`].
#[derive(Debug, Clone)]
pub struct FdWriterOptions {
    assumed_filename: Option<String>,
    assumed_pos: Option<Position>,
    independent_pos: Option<Position>,
    append: bool,
    truncate: bool,
    buffer_options: BufferOptions,
}

impl FdWriterOptions {
    pub fn new() -> Self {
        FdWriterOptions {
            assumed_filename: None,
            assumed_pos: None,
            independent_pos: None,
            append: false,
            truncate: true,
            buffer_options: BufferOptions::new(),
        }
    }

    /// Overrides the filename used in error annotations.
    pub fn with_assumed_filename(mut self, filename: impl Into<String>) -> Self {
        self.assumed_filename = Some(filename.into());
        self
    }

    /// Declares the current descriptor position instead of probing for it.
    /// Disables random access. Mutually exclusive with
    /// `with_independent_pos`.
    pub fn with_assumed_pos(mut self, assumed_pos: Position) -> Self {
        self.assumed_pos = Some(assumed_pos);
        self
    }

    /// Writes at the given position with `pwrite`, leaving the
    /// descriptor's own offset untouched.
    pub fn with_independent_pos(mut self, independent_pos: Position) -> Self {
        self.independent_pos = Some(independent_pos);
        self
    }

    /// Opens in append mode: every write lands at the end of the file and
    /// random access is disabled.
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Whether [`FdWriter::open`] truncates an existing file. Defaults to
    /// `true`; ignored when appending.
    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_buffer_options(mut self, buffer_options: BufferOptions) -> Self {
        self.buffer_options = buffer_options;
        self
    }
}

impl Default for FdWriterOptions {
    fn default() -> Self {
        FdWriterOptions::new()
    }
}

/// A writer over a file descriptor, the mirror of
/// [`FdReader`](crate::fd_reader::FdReader).
#[derive(Debug)]
pub struct FdWriter {
    file: File,
    filename: String,
    has_independent_pos: bool,
    append: bool,
    random_access: Result<(), Status>,
    buf: WriteBuf,
    sizer: BufferSizer,
    state: StreamState,
}

impl FdWriter {
    /// Creates or opens `path` for writing.
    pub fn open(path: impl AsRef<Path>, options: FdWriterOptions) -> Result<Self, Status> {
        let path = path.as_ref();
        let mut open_options = OpenOptions::new();
        open_options.write(true).create(true);
        if options.append {
            open_options.append(true);
        } else if options.truncate {
            open_options.truncate(true);
        }
        let file = loop {
            match open_options.open(path) {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(operation_failed("open()", e)
                        .annotate(format!("opening {}", path.display())))
                }
            }
        };
        log::debug!("opened {} for writing", path.display());
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::with_filename(file, filename, options))
    }

    /// Adopts an already-open descriptor. The descriptor must be writable.
    pub fn new(file: impl Into<File>, options: FdWriterOptions) -> Self {
        let file = file.into();
        let filename = options.assumed_filename.clone().unwrap_or_else(|| {
            if cfg!(target_os = "linux") {
                format!("/proc/self/fd/{}", file.as_raw_fd())
            } else {
                format!("<fd {}>", file.as_raw_fd())
            }
        });
        Self::with_filename(file, filename, options)
    }

    fn with_filename(file: File, filename: String, options: FdWriterOptions) -> Self {
        let mut writer = FdWriter {
            file,
            filename,
            has_independent_pos: false,
            append: options.append,
            random_access: Ok(()),
            buf: WriteBuf::new(),
            sizer: BufferSizer::new(options.buffer_options),
            state: StreamState::new(),
        };
        writer.initialize_pos(options.assumed_pos, options.independent_pos);
        writer
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub(crate) fn has_independent_pos(&self) -> bool {
        self.has_independent_pos
    }

    /// Accounts for bytes that reached the descriptor without passing
    /// through this writer, e.g. a kernel-to-kernel copy. The buffer must
    /// have been flushed beforehand.
    pub(crate) fn note_bypassed_write(&mut self, length: usize) {
        self.buf.note_direct_write(length);
    }

    fn initialize_pos(
        &mut self,
        assumed_pos: Option<Position>,
        independent_pos: Option<Position>,
    ) {
        if let Some(assumed_pos) = assumed_pos {
            if independent_pos.is_some() {
                self.fail(Status::invalid_argument(
                    "assumed_pos and independent_pos must not be both set",
                ));
                return;
            }
            if assumed_pos > MAX_OFFSET {
                self.fail_overflow();
                return;
            }
            self.buf.set_start_pos(assumed_pos);
            self.random_access = Err(Status::unimplemented(
                "an assumed position excludes random access",
            ));
        } else if let Some(independent_pos) = independent_pos {
            if self.append {
                self.fail(Status::invalid_argument(
                    "independent_pos is incompatible with append mode",
                ));
                return;
            }
            if independent_pos > MAX_OFFSET {
                self.fail_overflow();
                return;
            }
            self.has_independent_pos = true;
            self.buf.set_start_pos(independent_pos);
        } else if self.append {
            match (&self.file).seek(SeekFrom::End(0)) {
                Ok(end_pos) => self.buf.set_start_pos(end_pos),
                Err(e) => {
                    self.fail(operation_failed("lseek()", e));
                    return;
                }
            }
            self.random_access = Err(Status::unimplemented(
                "append mode excludes random access",
            ));
        } else {
            self.probe_random_access();
        }
        self.sizer.begin_run(self.buf.start_pos());
        if let Err(reason) = &self.random_access {
            log::debug!("random access disabled for {}: {reason}", self.filename);
        }
    }

    fn probe_random_access(&mut self) {
        let file_pos = match (&self.file).seek(SeekFrom::Current(0)) {
            Ok(file_pos) => file_pos,
            Err(e) => {
                self.random_access = Err(operation_failed("lseek()", e));
                return;
            }
        };
        self.buf.set_start_pos(file_pos);
        match self.file.metadata() {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                if !file_type.is_file() && !file_type.is_block_device() {
                    self.random_access = Err(Status::unimplemented(
                        "file type does not support random access",
                    ));
                }
            }
            Err(e) => self.random_access = Err(operation_failed("fstat()", e)),
        }
    }

    /// Pushes the buffered bytes to the descriptor.
    fn drain_buffer(&mut self) -> bool {
        if self.buf.written().is_empty() {
            return self.state.ok();
        }
        if !self.state.ok() {
            return false;
        }
        let result = fd_drain(
            &self.file,
            self.has_independent_pos,
            self.buf.written(),
            self.buf.start_pos(),
        );
        match result {
            Ok(()) => {
                self.buf.mark_drained();
                true
            }
            Err(status) => self.fail(status),
        }
    }
}

/// Writes all of `data` at `start_pos`, restarting on `EINTR`.
fn fd_drain(
    file: &File,
    has_independent_pos: bool,
    data: &[u8],
    start_pos: Position,
) -> Result<(), Status> {
    let mut written = 0;
    while written < data.len() {
        let offset = start_pos + written as Position;
        if offset >= MAX_OFFSET {
            return Err(Status::resource_exhausted("writer position overflow"));
        }
        let length_to_write = (data.len() - written)
            .min((MAX_OFFSET - offset) as usize)
            .min(MAX_WRITE_LENGTH);
        let result = if has_independent_pos {
            file.write_at(&data[written..written + length_to_write], offset)
        } else {
            (&*file).write(&data[written..written + length_to_write])
        };
        match result {
            Ok(0) => {
                return Err(Status::internal("write() returned 0"));
            }
            Ok(length_written) => written += length_written,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let operation = if has_independent_pos {
                    "pwrite()"
                } else {
                    "write()"
                };
                return Err(operation_failed(operation, e));
            }
        }
    }
    Ok(())
}

impl Writer for FdWriter {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        if self.state.is_open() {
            self.drain_buffer();
        }
        self.state.close();
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
        if !self.drain_buffer() {
            return false;
        }
        let target = self
            .sizer
            .buffer_length(self.buf.pos(), min_length, recommended_length);
        self.buf.grow(target.max(min_length));
        true
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        if !self.drain_buffer() {
            return false;
        }
        if flush_type == FlushType::FromMachine {
            if let Err(e) = self.file.sync_all() {
                return self.fail(operation_failed("fsync()", e));
            }
        }
        true
    }

    fn supports_random_access(&self) -> bool {
        self.random_access.is_ok()
    }

    fn supports_read_mode(&self) -> bool {
        self.random_access.is_ok()
    }

    fn supports_truncate(&self) -> bool {
        self.random_access.is_ok()
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state.is_open() {
            status.annotate(format!("writing {} at byte {}", self.filename, self.pos()))
        } else {
            status
        }
    }

    fn write(&mut self, src: &[u8]) -> bool {
        // Large writes go straight to the descriptor once the buffer is
        // drained.
        let target = self.sizer.buffer_length(self.buf.pos(), 1, 0);
        if src.len() >= target {
            if !self.drain_buffer() {
                return false;
            }
            if !self.state.is_open() {
                return false;
            }
            let result = fd_drain(
                &self.file,
                self.has_independent_pos,
                src,
                self.buf.start_pos(),
            );
            return match result {
                Ok(()) => {
                    self.buf.note_direct_write(src.len());
                    true
                }
                Err(status) => self.fail(status),
            };
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

    fn seek(&mut self, new_pos: Position) -> bool {
        if !self.state.ok() {
            return false;
        }
        if new_pos == self.pos() {
            return true;
        }
        if let Err(reason) = &self.random_access {
            let reason = reason.clone();
            return self.fail(reason);
        }
        if new_pos > MAX_OFFSET {
            return self.fail_overflow();
        }
        if !self.drain_buffer() {
            return false;
        }
        if !self.has_independent_pos {
            if let Err(e) = (&self.file).seek(SeekFrom::Start(new_pos)) {
                return self.fail(operation_failed("lseek()", e));
            }
        }
        self.buf.set_start_pos(new_pos);
        true
    }

    fn size(&mut self) -> Option<Position> {
        if !self.state.ok() {
            return None;
        }
        if let Err(reason) = &self.random_access {
            let reason = reason.clone();
            self.fail(reason);
            return None;
        }
        match self.file.metadata() {
            // Buffered bytes extend the size once flushed.
            Ok(metadata) => Some(metadata.len().max(self.pos())),
            Err(e) => {
                self.fail(operation_failed("fstat()", e));
                None
            }
        }
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        if !self.state.ok() {
            return false;
        }
        if let Err(reason) = &self.random_access {
            let reason = reason.clone();
            return self.fail(reason);
        }
        if !self.drain_buffer() {
            return false;
        }
        if let Err(e) = self.file.set_len(new_size) {
            return self.fail(operation_failed("ftruncate()", e));
        }
        if self.pos() > new_size {
            self.buf.set_start_pos(new_size);
            if !self.has_independent_pos {
                if let Err(e) = (&self.file).seek(SeekFrom::Start(new_size)) {
                    return self.fail(operation_failed("lseek()", e));
                }
            }
        }
        true
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if let Err(reason) = &self.random_access {
            if self.state.ok() {
                let reason = reason.clone();
                self.fail(reason);
            }
            return None;
        }
        if !self.drain_buffer() {
            return None;
        }
        let file = match self.file.try_clone() {
            Ok(file) => file,
            Err(e) => {
                self.fail(operation_failed("dup()", e));
                return None;
            }
        };
        Some(Box::new(FdReader::new(
            file,
            FdReaderOptions::new()
                .with_assumed_filename(self.filename.clone())
                .with_independent_pos(initial_pos)
                .with_buffer_options(*self.sizer.options()),
        )))
    }

    fn as_fd_writer(&mut self) -> Option<&mut FdWriter> {
        Some(self)
    }
}

impl Drop for FdWriter {
    fn drop(&mut self) {
        if self.state.is_open() {
            let _ = self.drain_buffer();
        }
    }
}
