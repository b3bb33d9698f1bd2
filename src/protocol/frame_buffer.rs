//! Stream parser for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a state
//! machine for handling fragmented frames:
//! - `WaitingForHeader`: need the magic byte plus 9 more header bytes
//! - `WaitingForPayload`: header parsed, need N more payload bytes
//!
//! A byte that is not the magic where a frame boundary is expected is
//! consumed on its own and reported as a protocol failure; parsing then
//! continues as if the next byte begins a new frame. The parser does not
//! scan forward for the next magic byte.
//!
//! # Example
//!
//! ```ignore
//! use blizzard::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! let events = buffer.push(&chunk)?;
//! for event in events {
//!     // Handshake, Json, BufferChunk, BufferEnd, ProtocolFail
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::{codes, kind, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC};
use crate::error::{BlizzardError, Result};

/// A typed event yielded by the stream parser.
///
/// Each event is independent; the parser never needs a whole message in
/// memory beyond the single frame being decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Zero-length handshake frame arrived; the session is ready.
    Handshake,
    /// A JSON frame with its undecoded payload bytes.
    Json {
        /// Correlation id (0 = notification or unsolicited error).
        id: u32,
        /// UTF-8 JSON payload.
        payload: Bytes,
    },
    /// A binary reply chunk to accumulate.
    BufferChunk {
        /// Stream id.
        id: u32,
        /// Chunk bytes.
        payload: Bytes,
    },
    /// Zero-length buffer frame: the stream at `id` is complete.
    BufferEnd {
        /// Stream id.
        id: u32,
    },
    /// A framing violation to route through the failure funnel.
    ProtocolFail {
        /// Id the failure is addressed to (0 = unaddressable).
        id: u32,
        /// Error code, JSON-RPC aligned.
        code: i64,
        /// Human-readable description.
        message: String,
    },
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 10 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: Header, remaining: u32 },
}

/// Buffer accumulating incoming bytes and extracting typed frame events.
///
/// All data is stored in a single `BytesMut` buffer to minimize
/// allocations; payloads are split off as zero-copy `Bytes`.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 1GB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frame events.
    ///
    /// This is the main API for processing incoming data from the socket.
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns an error if a declared payload length exceeds the
    /// configured maximum; the stream is unrecoverable at that point.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<FrameEvent>> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        while let Some(event) = self.try_extract_one()? {
            events.push(event);
        }

        Ok(events)
    }

    /// Try to extract a single event from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(event))` if a complete frame (or a magic violation) was
    ///   consumed
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the declared payload exceeds the maximum
    fn try_extract_one(&mut self) -> Result<Option<FrameEvent>> {
        match &self.state {
            State::WaitingForHeader => {
                let Some(&first) = self.buffer.first() else {
                    return Ok(None);
                };

                if first != MAGIC {
                    // Consume exactly the offending byte; the next byte is
                    // treated as a fresh frame boundary.
                    let _ = self.buffer.split_to(1);
                    return Ok(Some(FrameEvent::ProtocolFail {
                        id: 0,
                        code: codes::INVALID,
                        message: "Unexpected magic".to_string(),
                    }));
                }

                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = Header::decode(&self.buffer[..HEADER_SIZE])
                    .expect("buffer holds a full header starting with magic");

                if header.length > self.max_payload_size {
                    return Err(BlizzardError::Protocol(format!(
                        "Payload size {} exceeds maximum {}",
                        header.length, self.max_payload_size
                    )));
                }

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.length == 0 {
                    return Ok(Some(classify(Frame::new(header, Bytes::new()))));
                }

                self.state = State::WaitingForPayload {
                    header,
                    remaining: header.length,
                };

                // Try to get the payload immediately
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                // Extract payload (zero-copy freeze)
                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;

                self.state = State::WaitingForHeader;

                Ok(Some(classify(Frame::new(header, payload))))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a complete frame into its parser event.
fn classify(frame: Frame) -> FrameEvent {
    if frame.payload.is_empty() {
        // Zero-length frames are sentinels.
        match frame.kind() {
            kind::BUFFER_RESPONSE => FrameEvent::BufferEnd { id: frame.id() },
            kind::HANDSHAKE => FrameEvent::Handshake,
            _ => FrameEvent::ProtocolFail {
                id: frame.id(),
                code: codes::INVALID,
                message: "Unexpected 0-length header".to_string(),
            },
        }
    } else {
        match frame.kind() {
            kind::JSON => FrameEvent::Json {
                id: frame.id(),
                payload: frame.payload,
            },
            kind::BUFFER_RESPONSE => FrameEvent::BufferChunk {
                id: frame.id(),
                payload: frame.payload,
            },
            _ => FrameEvent::ProtocolFail {
                id: frame.id(),
                code: codes::INVALID,
                message: "Unknown packet type".to_string(),
            },
        }
    }
}
