//! Protocol module - wire format, framing, and message decoding.
//!
//! This module implements the binary protocol for the session layer:
//! - 10-byte header encoding/decoding
//! - Stream parser turning socket bytes into typed frame events
//! - One-time JSON payload validation into the [`Incoming`] sum type

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::{FrameBuffer, FrameEvent};
pub use message::{Incoming, RpcError, WireFault};
pub use wire_format::{
    codes, kind, Header, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_STREAM_SIZE, HEADER_SIZE, MAGIC,
    MAX_ID,
};
