//! # blizzard
//!
//! Bidirectional, framed JSON-RPC-over-TCP session protocol.
//!
//! A session multiplexes two message kinds over one socket: structured
//! JSON calls/replies and opaque binary payload replies. Each side can
//! act as a caller (issuing requests that expect a correlated reply) and
//! as a callee (exposing named methods).
//!
//! ## Architecture
//!
//! - **Stream parser**: incremental decoder turning socket bytes into
//!   typed frame events, resyncing on magic-byte violations
//! - **Dispatcher**: routes decoded messages to exposed methods, pending
//!   callers, or the failure funnel
//! - **Writer task**: single outbound funnel with batched vectored
//!   writes, preserving wire order
//!
//! ## Example
//!
//! ```ignore
//! use blizzard::{Session, transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = transport::tcp::connect("127.0.0.1:4100").await?;
//!     let (session, mut events) = Session::builder()
//!         .expose("add", |params: Vec<i64>, ctx| async move {
//!             ctx.resolve(&params.iter().sum::<i64>()).await
//!         })
//!         .instigate(stream)
//!         .await?;
//!
//!     events.wait_ready().await?;
//!     let sum = session.call("add", [1, 2]).await?;
//!     println!("{:?}", sum);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

pub use error::{BlizzardError, Result};
pub use handler::ReplyContext;
pub use session::{
    Payload, Phase, Role, Session, SessionBuilder, SessionConfig, SessionEvent, SessionEvents,
};
