//! Handler module - method table and request handling.
//!
//! Provides:
//! - [`MethodRegistry`] - maps exposed method names to handlers
//! - [`ReplyContext`] - the one-shot completion a handler answers with
//!
//! # Example
//!
//! ```ignore
//! use blizzard::handler::{MethodRegistry, ReplyContext};
//!
//! let registry = MethodRegistry::new();
//!
//! registry.register("add", |params: Vec<i64>, ctx| async move {
//!     ctx.resolve(&params.iter().sum::<i64>()).await
//! });
//!
//! registry.register("blob", |_params: serde_json::Value, ctx| async move {
//!     ctx.resolve_binary(load_blob().await?).await
//! });
//! ```

mod context;
mod registry;

pub use context::ReplyContext;
pub use registry::{BoxFuture, Handler, HandlerResult, MethodRegistry, TypedHandler};
