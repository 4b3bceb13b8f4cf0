pub mod buffer;
pub mod bytes_reader;
pub mod chain;
pub mod digesting;
pub mod digests;
#[cfg(unix)]
pub mod fd_reader;
#[cfg(unix)]
pub mod fd_writer;
pub mod null_writer;
pub mod position_shifting;
pub mod reader;
pub mod recycling_pool;
pub mod state;
pub mod status;
pub mod vec_writer;
pub mod writer;
pub mod zstd_reader;
pub mod zstd_writer;

pub use buffer::BufferOptions;
pub use bytes_reader::BytesReader;
pub use chain::Chain;
pub use digesting::{DigestingReader, DigestingWriter};
pub use digests::{Adler32Digester, Crc32Digester, Crc32cDigester, Digester};
#[cfg(unix)]
pub use fd_reader::{FdReader, FdReaderOptions};
#[cfg(unix)]
pub use fd_writer::{FdWriter, FdWriterOptions};
pub use null_writer::NullWriter;
pub use position_shifting::{PositionShiftingReader, PositionShiftingWriter};
pub use reader::Reader;
pub use recycling_pool::{Recycled, RecyclingPool};
pub use state::StreamState;
pub use status::{Position, Status, StatusKind};
pub use vec_writer::VecWriter;
pub use writer::{FlushType, Writer};
pub use zstd_reader::{zstd_uncompressed_size, ZstdDictionary, ZstdReader, ZstdReaderOptions};
pub use zstd_writer::{ZstdWriter, ZstdWriterOptions};
