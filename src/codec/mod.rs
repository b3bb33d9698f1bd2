//! Codec module - serialization/deserialization for payloads.
//!
//! The session protocol carries UTF-8 JSON in its structured frames;
//! [`JsonCodec`] wraps `serde_json` behind the crate's error type. Binary
//! reply frames carry raw bytes and bypass the codec entirely.

mod json;

pub use json::JsonCodec;
