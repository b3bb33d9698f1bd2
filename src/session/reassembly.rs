//! Reassembly of binary reply streams.
//!
//! `BUFFER_RESPONSE` chunks accumulate per id until the zero-length
//! terminator; the terminator removes the entry as the concatenated bytes
//! are handed to dispatch. A per-stream size cap guards against a peer
//! that never terminates.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::protocol::DEFAULT_MAX_STREAM_SIZE;

/// Outcome of appending a chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum Append {
    /// Chunk buffered.
    Buffered,
    /// The stream grew past the cap and has been discarded.
    Overflow,
}

/// Partial binary buffers keyed by stream id.
#[derive(Debug)]
pub struct StreamAssembler {
    streams: HashMap<u32, BytesMut>,
    max_stream_size: usize,
}

impl StreamAssembler {
    /// Create an assembler with the default per-stream cap.
    pub fn new() -> Self {
        Self::with_max_stream_size(DEFAULT_MAX_STREAM_SIZE)
    }

    /// Create an assembler with a custom per-stream cap.
    pub fn with_max_stream_size(max_stream_size: usize) -> Self {
        Self {
            streams: HashMap::new(),
            max_stream_size,
        }
    }

    /// Append a chunk to the stream at `id`, creating it on first arrival.
    pub fn append(&mut self, id: u32, chunk: &[u8]) -> Append {
        let buffer = self.streams.entry(id).or_default();

        if buffer.len() + chunk.len() > self.max_stream_size {
            self.streams.remove(&id);
            return Append::Overflow;
        }

        buffer.extend_from_slice(chunk);
        Append::Buffered
    }

    /// Remove and return the completed stream for `id`, if one exists.
    pub fn take(&mut self, id: u32) -> Option<Bytes> {
        self.streams.remove(&id).map(BytesMut::freeze)
    }

    /// Number of streams currently being reassembled.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check whether no streams are in progress.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut assembler = StreamAssembler::new();

        assert_eq!(assembler.append(9, &[0xDE, 0xAD]), Append::Buffered);
        assert_eq!(assembler.append(9, &[0xBE, 0xEF]), Append::Buffered);

        let bytes = assembler.take(9).unwrap();
        assert_eq!(&bytes[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_take_unknown_stream() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.take(7).is_none());
    }

    #[test]
    fn test_take_removes_entry() {
        let mut assembler = StreamAssembler::new();
        assembler.append(1, b"data");

        assert!(assembler.take(1).is_some());
        assert!(assembler.take(1).is_none());
    }

    #[test]
    fn test_streams_are_independent() {
        let mut assembler = StreamAssembler::new();
        assembler.append(1, b"one");
        assembler.append(2, b"two");
        assert_eq!(assembler.len(), 2);

        assert_eq!(&assembler.take(1).unwrap()[..], b"one");
        assert_eq!(&assembler.take(2).unwrap()[..], b"two");
    }

    #[test]
    fn test_overflow_discards_stream() {
        let mut assembler = StreamAssembler::with_max_stream_size(8);

        assert_eq!(assembler.append(3, &[0u8; 6]), Append::Buffered);
        assert_eq!(assembler.append(3, &[0u8; 6]), Append::Overflow);

        // The stream is gone; a later terminator finds nothing.
        assert!(assembler.take(3).is_none());
    }

    #[test]
    fn test_empty_chunk_still_creates_stream() {
        let mut assembler = StreamAssembler::new();
        assembler.append(5, b"");

        let bytes = assembler.take(5).unwrap();
        assert!(bytes.is_empty());
    }
}
