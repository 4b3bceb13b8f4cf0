use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom};
use std::os::unix::fs::{FileExt as _, FileTypeExt as _};
use std::os::unix::io::AsRawFd as _;
use std::path::Path;

use crate::{
    buffer::{pull_with, BufferOptions, BufferSizer, ReadBuf},
    reader::{copy_by_pulling, seek_forward_by_reading, Reader},
    state::StreamState,
    status::{Position, Status},
    writer::Writer,
};
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
use crate::writer::FlushType;

/// Offsets handed to the kernel are `off_t`, which is signed.
const MAX_OFFSET: Position = i64::MAX as Position;

/// Cap on a single read syscall. Some kernels cannot read close to 2 GiB
/// at a time, and 1 GiB keeps reads aligned.
const MAX_READ_LENGTH: usize = 1 << 30;

/// Options for [`FdReader`].
#[derive(Debug, Clone, Default)]
pub struct FdReaderOptions {
    assumed_filename: Option<String>,
    assumed_pos: Option<Position>,
    independent_pos: Option<Position>,
    growing_source: bool,
    buffer_options: BufferOptions,
}

impl FdReaderOptions {
    pub fn new() -> Self {
        FdReaderOptions {
            assumed_filename: None,
            assumed_pos: None,
            independent_pos: None,
            growing_source: false,
            buffer_options: BufferOptions::new(),
        }
    }

    /// Overrides the filename used in error annotations.
    pub fn with_assumed_filename(mut self, filename: impl Into<String>) -> Self {
        self.assumed_filename = Some(filename.into());
        self
    }

    /// Declares the current descriptor position instead of probing for it.
    /// No positioning syscalls are made and random access is disabled.
    /// Mutually exclusive with `with_independent_pos`.
    pub fn with_assumed_pos(mut self, assumed_pos: Position) -> Self {
        self.assumed_pos = Some(assumed_pos);
        self
    }

    /// Reads at the given position with `pread`, leaving the descriptor's
    /// own offset untouched. Requires a seekable descriptor; enables
    /// random access without probing.
    pub fn with_independent_pos(mut self, independent_pos: Position) -> Self {
        self.independent_pos = Some(independent_pos);
        self
    }

    /// Declares that the source may keep growing, so end-of-file is not
    /// final and the size is never cached.
    pub fn with_growing_source(mut self, growing_source: bool) -> Self {
        self.growing_source = growing_source;
        self
    }

    pub fn with_buffer_options(mut self, buffer_options: BufferOptions) -> Self {
        self.buffer_options = buffer_options;
        self
    }
}

/// A reader over a file descriptor.
///
/// In the default mode the descriptor's own offset is used and the reader
/// must be its sole user; with
/// [`with_independent_pos`](FdReaderOptions::with_independent_pos) every
/// read names its offset (`pread`) and the kernel offset is never touched.
/// Random access is probed at construction and exposed through the
/// capability methods rather than the type.
#[derive(Debug)]
pub struct FdReader {
    file: File,
    filename: String,
    has_independent_pos: bool,
    growing_source: bool,
    /// `Err` holds the reason recorded when the probe ruled random access
    /// out; reported if a seek back is attempted anyway.
    random_access: Result<(), Status>,
    exact_size: Option<Position>,
    read_all_hint: bool,
    buf: ReadBuf,
    sizer: BufferSizer,
    state: StreamState,
}

impl FdReader {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>, options: FdReaderOptions) -> Result<Self, Status> {
        let path = path.as_ref();
        let file = loop {
            match File::open(path) {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(operation_failed("open()", e)
                        .annotate(format!("opening {}", path.display())))
                }
            }
        };
        log::debug!("opened {} for reading", path.display());
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::with_filename(file, filename, options))
    }

    /// Adopts an already-open descriptor. The descriptor must be readable;
    /// in the default shared-position mode this reader must be its sole
    /// user.
    pub fn new(file: impl Into<File>, options: FdReaderOptions) -> Self {
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

    fn with_filename(file: File, filename: String, options: FdReaderOptions) -> Self {
        let mut reader = FdReader {
            file,
            filename,
            has_independent_pos: false,
            growing_source: options.growing_source,
            random_access: Ok(()),
            exact_size: None,
            read_all_hint: false,
            buf: ReadBuf::new(),
            sizer: BufferSizer::new(options.buffer_options),
            state: StreamState::new(),
        };
        reader.initialize_pos(options.assumed_pos, options.independent_pos);
        reader
    }

    pub fn filename(&self) -> &str {
        &self.filename
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
            self.buf.set_limit_pos(assumed_pos);
            self.random_access = Err(Status::unimplemented(
                "an assumed position excludes random access",
            ));
        } else if let Some(independent_pos) = independent_pos {
            if independent_pos > MAX_OFFSET {
                self.fail_overflow();
                return;
            }
            self.has_independent_pos = true;
            self.buf.set_limit_pos(independent_pos);
        } else {
            self.probe_random_access();
        }
        self.sizer.begin_run(self.buf.limit_pos());
        if let Err(reason) = &self.random_access {
            log::debug!("random access disabled for {}: {reason}", self.filename);
        }
    }

    /// Learns whether the descriptor is seekable, and the file size along
    /// the way. Leaves `random_access` as `Err` with the reason when not.
    fn probe_random_access(&mut self) {
        let file_pos = match (&self.file).seek(SeekFrom::Current(0)) {
            Ok(file_pos) => file_pos,
            Err(e) => {
                // Not seekable at all; reading continues from position 0.
                self.random_access = Err(operation_failed("lseek()", e));
                return;
            }
        };
        self.buf.set_limit_pos(file_pos);
        if self.filename.starts_with("/sys/") {
            // "/sys" files claim to be seekable and then misbehave on
            // read. Some "/proc" files do too, but those fail the
            // seek-to-end probe below.
            self.random_access = Err(Status::unimplemented(
                "/sys files do not support random access",
            ));
            return;
        }
        match self.file.metadata() {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                // Character devices such as /dev/null accept lseek but
                // have no addressable contents.
                if !file_type.is_file() && !file_type.is_block_device() {
                    self.random_access = Err(Status::unimplemented(
                        "file type does not support random access",
                    ));
                    return;
                }
            }
            Err(e) => {
                self.random_access = Err(operation_failed("fstat()", e));
                return;
            }
        }
        let file_size = match (&self.file).seek(SeekFrom::End(0)) {
            Ok(file_size) => file_size,
            Err(e) => {
                self.random_access = Err(operation_failed("lseek()", e));
                return;
            }
        };
        if let Err(e) = (&self.file).seek(SeekFrom::Start(file_pos)) {
            self.fail(operation_failed("lseek()", e));
            return;
        }
        if !self.growing_source {
            self.exact_size = Some(file_size);
            self.sizer.set_size_hint(Some(file_size));
        }
    }

    fn file_size(&mut self) -> Option<Position> {
        if let Some(size) = self.exact_size {
            return Some(size);
        }
        match self.file.metadata() {
            Ok(metadata) => {
                let size = metadata.len();
                if !self.growing_source {
                    self.exact_size = Some(size);
                }
                Some(size)
            }
            Err(e) => {
                self.fail(operation_failed("fstat()", e));
                None
            }
        }
    }

    fn seek_internal(&mut self, new_pos: Position) -> bool {
        debug_assert_eq!(self.buf.available(), 0, "seeking with a non-empty buffer");
        if !self.has_independent_pos {
            if let Err(e) = (&self.file).seek(SeekFrom::Start(new_pos)) {
                return self.fail(operation_failed("lseek()", e));
            }
        }
        self.buf.set_limit_pos(new_pos);
        true
    }
}

/// One refill from the descriptor: reads at least `min_length` bytes into
/// `dest` unless the source ends first. Returns the number of bytes read;
/// zero means end-of-file (recorded in `exact_size` for a non-growing
/// source).
fn fd_fill(
    file: &File,
    has_independent_pos: bool,
    growing_source: bool,
    exact_size: &mut Option<Position>,
    min_length: usize,
    dest: &mut [u8],
    start_offset: Position,
) -> Result<usize, Status> {
    let mut total = 0;
    while total < min_length {
        let offset = start_offset + total as Position;
        if offset >= MAX_OFFSET {
            return Err(Status::resource_exhausted("reader position overflow"));
        }
        let length_to_read = (dest.len() - total)
            .min((MAX_OFFSET - offset) as usize)
            .min(MAX_READ_LENGTH);
        let result = if has_independent_pos {
            file.read_at(&mut dest[total..total + length_to_read], offset)
        } else {
            (&*file).read(&mut dest[total..total + length_to_read])
        };
        match result {
            Ok(0) => {
                if !growing_source {
                    *exact_size = Some(offset);
                }
                break;
            }
            Ok(length_read) => total += length_read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let operation = if has_independent_pos { "pread()" } else { "read()" };
                return Err(operation_failed(operation, e));
            }
        }
    }
    Ok(total)
}

pub(crate) fn operation_failed(operation: &str, error: std::io::Error) -> Status {
    Status::new(error.kind().into(), format!("{operation} failed: {error}"))
}

impl Reader for FdReader {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        self.buf.drop_buffered();
        self.state.close();
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
        let target =
            self.sizer
                .buffer_length(self.buf.pos(), min_length, recommended_length);
        let Self {
            file,
            has_independent_pos,
            growing_source,
            exact_size,
            buf,
            ..
        } = self;
        let pulled = pull_with(buf, min_length, target, |min_needed, spare, limit_pos| {
            fd_fill(
                file,
                *has_independent_pos,
                *growing_source,
                exact_size,
                min_needed,
                spare,
                limit_pos,
            )
        });
        match pulled {
            Ok(enough) => enough,
            Err(status) => self.fail(status),
        }
    }

    fn supports_random_access(&self) -> bool {
        self.random_access.is_ok()
    }

    fn supports_new_reader(&self) -> bool {
        self.random_access.is_ok()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.read_all_hint || self.random_access.is_ok()
    }

    fn set_read_all_hint(&mut self, read_all_hint: bool) {
        self.read_all_hint = read_all_hint;
        if !self.state.ok() || !self.state.is_open() {
            return;
        }
        #[cfg(any(target_os = "linux", target_os = "freebsd"))]
        {
            let advice = if read_all_hint {
                libc::POSIX_FADV_SEQUENTIAL
            } else {
                libc::POSIX_FADV_NORMAL
            };
            // Purely advisory; errors are not interesting.
            unsafe { libc::posix_fadvise(self.file.as_raw_fd(), 0, 0, advice) };
        }
    }

    fn annotate_status(&self, status: Status) -> Status {
        if self.state.is_open() {
            status.annotate(format!("reading {} at byte {}", self.filename, self.pos()))
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
            if !self.state.ok() || !self.state.is_open() {
                break;
            }
            let remaining = dest.len() - copied;
            let target = self.sizer.buffer_length(self.buf.pos(), 1, remaining);
            if remaining >= target {
                // Read past the buffer straight into the caller's slice.
                let Self {
                    file,
                    has_independent_pos,
                    growing_source,
                    exact_size,
                    buf,
                    ..
                } = self;
                match fd_fill(
                    file,
                    *has_independent_pos,
                    *growing_source,
                    exact_size,
                    remaining,
                    &mut dest[copied..],
                    buf.limit_pos(),
                ) {
                    Ok(0) => break,
                    Ok(length_read) => {
                        buf.note_direct_read(length_read);
                        copied += length_read;
                    }
                    Err(status) => {
                        self.fail(status);
                        break;
                    }
                }
            } else if !self.pull(1, remaining) {
                break;
            }
        }
        copied
    }

    fn copy_to(&mut self, mut length: Position, dest: &mut dyn Writer) -> bool {
        #[cfg(any(target_os = "linux", target_os = "freebsd"))]
        if dest.as_fd_writer().is_some() {
            // Serve what is already buffered, then hand the rest to the
            // kernel.
            let buffered = (self.buf.available() as Position).min(length) as usize;
            if buffered > 0 {
                if !dest.write(&self.buf.chunk()[..buffered]) {
                    return false;
                }
                self.buf.consume(buffered);
                length -= buffered as Position;
            }
            let mut kernel_copy_works = true;
            while length > 0 && kernel_copy_works {
                if !self.state.ok() || !self.state.is_open() {
                    return false;
                }
                let fd_writer = dest.as_fd_writer().expect("destination changed type");
                if !fd_writer.flush(FlushType::FromObject) {
                    return false;
                }
                let src_pos = self.buf.limit_pos();
                if src_pos >= MAX_OFFSET {
                    return self.fail_overflow();
                }
                let dest_pos = fd_writer.start_pos();
                let length_to_copy = length
                    .min(MAX_OFFSET - src_pos)
                    .min(isize::MAX as Position) as usize;
                if length_to_copy as Position > MAX_OFFSET - dest_pos {
                    return fd_writer.fail_overflow();
                }
                let mut src_offset = src_pos as i64;
                let mut dest_offset = dest_pos as i64;
                let src_offset_ptr = if self.has_independent_pos {
                    &mut src_offset as *mut i64
                } else {
                    std::ptr::null_mut()
                };
                let dest_offset_ptr = if fd_writer.has_independent_pos() {
                    &mut dest_offset as *mut i64
                } else {
                    std::ptr::null_mut()
                };
                let length_copied = loop {
                    let result = unsafe {
                        libc::copy_file_range(
                            self.file.as_raw_fd(),
                            src_offset_ptr,
                            fd_writer.raw_fd(),
                            dest_offset_ptr,
                            length_to_copy,
                            0,
                        )
                    };
                    if result < 0 {
                        let e = std::io::Error::last_os_error();
                        if e.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }
                        // Append mode, non-regular files, or a cross
                        // filesystem copy; use the buffered path instead.
                        log::trace!("copy_file_range unavailable, falling back: {e}");
                        kernel_copy_works = false;
                        break 0;
                    }
                    break result as usize;
                };
                if !kernel_copy_works {
                    break;
                }
                if length_copied == 0 {
                    if !self.growing_source {
                        self.exact_size = Some(src_pos);
                    }
                    return false;
                }
                self.buf.note_direct_read(length_copied);
                fd_writer.note_bypassed_write(length_copied);
                length -= length_copied as Position;
            }
            if length == 0 {
                return true;
            }
        }
        copy_by_pulling(self, length, dest)
    }

    fn seek_in_buffer(&mut self, new_pos: Position) -> bool {
        self.buf.seek_in_buffer(new_pos)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if let Err(reason) = &self.random_access {
            if new_pos < self.buf.start_pos() {
                if self.state.ok() {
                    let reason = reason.clone();
                    self.fail(reason);
                }
                return false;
            }
            return seek_forward_by_reading(self, new_pos);
        }
        if !self.state.ok() {
            return false;
        }
        self.buf.drop_buffered();
        if new_pos > self.buf.limit_pos() {
            // Seeking forwards; park at the end if the file is shorter.
            let Some(file_size) = self.file_size() else {
                return false;
            };
            if new_pos > file_size {
                self.seek_internal(file_size);
                return false;
            }
        }
        self.seek_internal(new_pos)
    }

    fn size(&mut self) -> Option<Position> {
        if !self.state.ok() {
            return None;
        }
        if let Some(size) = self.exact_size {
            return Some(size);
        }
        if let Err(reason) = &self.random_access {
            let reason = reason.clone();
            self.fail(reason);
            return None;
        }
        self.file_size()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if let Err(reason) = &self.random_access {
            if self.state.ok() {
                let reason = reason.clone();
                self.fail(reason);
            }
            return None;
        }
        if !self.state.ok() {
            return None;
        }
        // Safe to call concurrently from here: the duplicate uses pread
        // only, so neither reader moves the other's position.
        let file = match self.file.try_clone() {
            Ok(file) => file,
            Err(e) => {
                self.fail(operation_failed("dup()", e));
                return None;
            }
        };
        let mut reader = FdReader::with_filename(
            file,
            self.filename.clone(),
            FdReaderOptions::new()
                .with_independent_pos(initial_pos)
                .with_growing_source(self.growing_source)
                .with_buffer_options(*self.sizer.options()),
        );
        reader.exact_size = self.exact_size;
        reader.sizer = self.sizer.share();
        Some(Box::new(reader))
    }
}
