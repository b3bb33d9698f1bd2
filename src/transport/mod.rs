//! Transport module - byte streams for sessions to ride on.
//!
//! The session owns its stream exclusively; everything else about the
//! transport (acceptance policy, TLS, keepalives) is the host's concern.

pub mod tcp;
