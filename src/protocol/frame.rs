//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use blizzard::protocol::{Frame, Header, kind};
//! use bytes::Bytes;
//!
//! let header = Header::new(kind::JSON, 42, 5);
//! let payload = Bytes::from_static(b"hello");
//! let frame = Frame::new(header, payload);
//!
//! assert_eq!(frame.id(), 42);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{kind, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame from header and raw bytes (copies data).
    pub fn from_parts(header: Header, payload: &[u8]) -> Self {
        Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the frame kind byte.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    /// Get the correlation id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// Check if this is a handshake frame.
    #[inline]
    pub fn is_handshake(&self) -> bool {
        self.header.kind == kind::HANDSHAKE
    }

    /// Check if this is a JSON frame.
    #[inline]
    pub fn is_json(&self) -> bool {
        self.header.kind == kind::JSON
    }

    /// Check if this is a binary reply frame.
    #[inline]
    pub fn is_buffer_response(&self) -> bool {
        self.header.kind == kind::BUFFER_RESPONSE
    }

    /// Check if this is a binary stream terminator (zero-length buffer frame).
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.is_buffer_response() && self.payload.is_empty()
    }

    /// Check if this frame expects no reply (id == 0).
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.header.id == 0
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
///
/// # Example
///
/// ```
/// use blizzard::protocol::{build_frame, Header, kind};
///
/// let header = Header::new(kind::JSON, 42, 5);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), 10 + 5); // header + payload
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
