#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use byteflow::{BufferOptions, Chain, Position, Reader, Status, StreamState};
use bytes::Bytes;
use proptest::prelude::*;

/// Reads everything the reader still has, through the pull/chunk/consume
/// fast path.
pub fn read_all<R: Reader + ?Sized>(reader: &mut R) -> Vec<u8> {
    let mut out = Vec::new();
    while reader.pull(1, 4096) {
        out.extend_from_slice(reader.chunk());
        let buffered = reader.available();
        reader.consume(buffered);
    }
    out
}

/// A byte source whose contents can grow while readers are attached, with
/// refills capped at a configurable chunk size. Doubles as the
/// "one byte at a time" source and the growing source in tests.
#[derive(Clone)]
pub struct SharedSource {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedSource {
    pub fn new(initial: impl Into<Vec<u8>>) -> Self {
        SharedSource {
            data: Arc::new(Mutex::new(initial.into())),
        }
    }

    pub fn append(&self, bytes: &[u8]) {
        self.data.lock().unwrap().extend_from_slice(bytes);
    }

    pub fn reader(&self, chunk_limit: usize) -> SharedReader {
        assert!(chunk_limit > 0, "chunk limit must be greater than 0");
        SharedReader {
            data: Arc::clone(&self.data),
            window: Vec::new(),
            cursor: 0,
            start_pos: 0,
            chunk_limit,
            state: StreamState::new(),
        }
    }
}

pub struct SharedReader {
    data: Arc<Mutex<Vec<u8>>>,
    window: Vec<u8>,
    cursor: usize,
    start_pos: Position,
    chunk_limit: usize,
    state: StreamState,
}

impl Reader for SharedReader {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    fn close(&mut self) -> Result<(), Status> {
        self.state.close();
        self.state.close_result()
    }

    fn chunk(&self) -> &[u8] {
        &self.window[self.cursor..]
    }

    fn consume(&mut self, length: usize) {
        assert!(length <= self.window.len() - self.cursor);
        self.cursor += length;
    }

    fn pos(&self) -> Position {
        self.start_pos + self.cursor as Position
    }

    fn start_pos(&self) -> Position {
        self.start_pos
    }

    fn limit_pos(&self) -> Position {
        self.start_pos + self.window.len() as Position
    }

    fn pull(&mut self, min_length: usize, _recommended_length: usize) -> bool {
        if self.window.len() - self.cursor >= min_length {
            return true;
        }
        if !self.state.ok() || !self.state.is_open() {
            return false;
        }
        self.window.drain(..self.cursor);
        self.start_pos += self.cursor as Position;
        self.cursor = 0;
        loop {
            let source = self.data.lock().unwrap();
            let limit = self.start_pos as usize + self.window.len();
            if limit >= source.len() {
                return self.window.len() >= min_length;
            }
            let take = (source.len() - limit).min(self.chunk_limit);
            self.window.extend_from_slice(&source[limit..limit + take]);
            if self.window.len() >= min_length {
                return true;
            }
        }
    }
}

// Proptest strategies for stream contents and stream configuration.

pub type Payload = easy_hex::Hex<Vec<u8>>;

/// Payloads are built from runs of a repeated byte interleaved with random
/// stretches, so compressed streams exercise both matches and literals,
/// and they span a few default refills without making shrinking slow.
pub fn arb_payload() -> impl Strategy<Value = Payload> {
    prop::collection::vec(
        prop_oneof![
            (any::<u8>(), 1usize..=32).prop_map(|(byte, run)| vec![byte; run]),
            prop::collection::vec(any::<u8>(), 1..=32),
        ],
        0..=48,
    )
    .prop_map(|pieces| easy_hex::Hex(pieces.concat()))
}

/// A payload together with a position inside it, for splits and seeks.
pub fn arb_payload_with_pos() -> impl Strategy<Value = (Payload, usize)> {
    arb_payload().prop_flat_map(|payload| {
        let len = payload.len();
        (Just(payload), 0..=len)
    })
}

/// A payload together with two independent positions inside it.
pub fn arb_payload_with_positions() -> impl Strategy<Value = (Payload, [usize; 2])> {
    arb_payload().prop_flat_map(|payload| {
        let len = payload.len();
        (Just(payload), [0..=len, 0..=len])
    })
}

/// The fast negative levels through the middle of the range; the top
/// levels only cost time without changing stream semantics.
pub fn arb_compression_level() -> impl Strategy<Value = i32> {
    -3..=15i32
}

/// Buffer sizing policies small enough to force refills and flushes in the
/// middle of a payload.
pub fn arb_buffer_options() -> impl Strategy<Value = BufferOptions> {
    (1usize..=64, 0usize..=192).prop_map(|(min_buffer_size, headroom)| {
        BufferOptions::new()
            .with_min_buffer_size(min_buffer_size)
            .with_max_buffer_size(min_buffer_size + headroom)
    })
}

/// A payload pre-split into shared chain blocks at arbitrary boundaries,
/// paired with its flat form.
pub fn arb_chain() -> impl Strategy<Value = (Payload, Chain)> {
    (arb_payload(), prop::collection::vec(1usize..=24, 0..=16)).prop_map(
        |(payload, block_lengths)| {
            let mut chain = Chain::new();
            let mut rest = Bytes::from(payload.to_vec());
            for block_length in block_lengths {
                if rest.is_empty() {
                    break;
                }
                chain.push(rest.split_to(block_length.min(rest.len())));
            }
            chain.push(rest);
            (payload, chain)
        },
    )
}
