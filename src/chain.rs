use std::collections::VecDeque;

use bytes::Bytes;

/// A sequence of bytes stored as shared blocks.
///
/// Streams append to a `Chain` without copying when their source already
/// holds the data in shareable form, and writers consume one block at a
/// time. Block boundaries are an artifact of how the data was produced and
/// carry no meaning.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    blocks: VecDeque<Bytes>,
    len: u64,
}

impl Chain {
    pub fn new() -> Self {
        Chain::default()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a shared block. Empty blocks are dropped.
    pub fn push(&mut self, block: Bytes) {
        if !block.is_empty() {
            self.len += block.len() as u64;
            self.blocks.push_back(block);
        }
    }

    /// Appends a copy of `data` as a single block.
    pub fn push_copy(&mut self, data: &[u8]) {
        self.push(Bytes::copy_from_slice(data));
    }

    /// Moves all blocks of `other` to the end of `self`.
    pub fn append(&mut self, other: Chain) {
        self.len += other.len;
        self.blocks.extend(other.blocks);
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Bytes> {
        self.blocks.iter()
    }

    /// Flattens the chain into one contiguous block. Free when the chain
    /// already consists of at most one block.
    pub fn to_bytes(&self) -> Bytes {
        match self.blocks.len() {
            0 => Bytes::new(),
            1 => self.blocks[0].clone(),
            _ => {
                let mut flat = Vec::with_capacity(self.len as usize);
                for block in &self.blocks {
                    flat.extend_from_slice(block);
                }
                Bytes::from(flat)
            }
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }
}

impl From<Bytes> for Chain {
    fn from(block: Bytes) -> Self {
        let mut chain = Chain::new();
        chain.push(block);
        chain
    }
}

impl From<&[u8]> for Chain {
    fn from(data: &[u8]) -> Self {
        Chain::from(Bytes::copy_from_slice(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_flatten() {
        let mut chain = Chain::new();
        chain.push(Bytes::from_static(b"hello "));
        chain.push(Bytes::new());
        chain.push(Bytes::from_static(b"world"));

        assert_eq!(chain.len(), 11);
        assert_eq!(chain.blocks().count(), 2);
        assert_eq!(chain.to_bytes(), Bytes::from_static(b"hello world"));

        let mut other = Chain::new();
        other.push_copy(b"!");
        chain.append(other);
        assert_eq!(chain.to_bytes(), Bytes::from_static(b"hello world!"));
    }
}
