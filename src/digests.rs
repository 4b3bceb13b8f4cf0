/// An incremental accumulator over byte updates, fed by
/// [`DigestingReader`](crate::digesting::DigestingReader) and
/// [`DigestingWriter`](crate::digesting::DigestingWriter).
///
/// Updates are associative over concatenation: feeding `a` then `b`
/// produces the same digest as feeding `ab` in one call, so layered
/// wrappers match a single batch computation. Digesters are cheap to copy
/// and cannot fail.
pub trait Digester {
    type Digest;

    fn update(&mut self, data: &[u8]);

    /// The digest of everything fed so far. Does not reset the state.
    fn digest(&self) -> Self::Digest;
}

/// CRC32C (the SSE4.2 polynomial), hardware-accelerated where available.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32cDigester {
    crc: u32,
}

impl Crc32cDigester {
    pub fn new() -> Self {
        Crc32cDigester::default()
    }
}

impl Digester for Crc32cDigester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.crc = crc32c::crc32c_append(self.crc, data);
    }

    fn digest(&self) -> u32 {
        self.crc
    }
}

/// CRC32 with the zlib polynomial.
#[derive(Debug, Clone, Default)]
pub struct Crc32Digester {
    hasher: crc32fast::Hasher,
}

impl Crc32Digester {
    pub fn new() -> Self {
        Crc32Digester::default()
    }
}

impl Digester for Crc32Digester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn digest(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// Adler-32, as used by zlib.
#[derive(Clone)]
pub struct Adler32Digester {
    adler: adler32::RollingAdler32,
}

impl std::fmt::Debug for Adler32Digester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adler32Digester")
            .field("adler", &self.adler.hash())
            .finish()
    }
}

impl Adler32Digester {
    pub fn new() -> Self {
        Adler32Digester {
            adler: adler32::RollingAdler32::new(),
        }
    }
}

impl Default for Adler32Digester {
    fn default() -> Self {
        Adler32Digester::new()
    }
}

impl Digester for Adler32Digester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.adler.update_buffer(data);
    }

    fn digest(&self) -> u32 {
        self.adler.hash()
    }
}
