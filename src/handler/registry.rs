//! Method table: exposed method names mapped to handlers.
//!
//! Handlers are registered by name and invoked with the request's
//! `params` plus a one-shot [`ReplyContext`]. [`TypedHandler`] adapts a
//! typed async closure by deserializing `params` with serde before the
//! call; a mismatch is reported to the caller as a handler-level error.
//!
//! # Example
//!
//! ```ignore
//! use blizzard::handler::{MethodRegistry, ReplyContext};
//!
//! let registry = MethodRegistry::new();
//! registry.register("add", |params: Vec<i64>, ctx| async move {
//!     ctx.resolve(&params.iter().sum::<i64>()).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ReplyContext;
use crate::error::Result;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for method handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its decoded `params`.
    fn call(&self, params: Value, ctx: ReplyContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes `params` before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, params: Value, ctx: ReplyContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(e) => {
                // The method exists but cannot digest these params; that
                // is a handler-level failure, not a protocol one.
                return Box::pin(async move { ctx.reject(format!("invalid params: {}", e)).await });
            }
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(fut)
    }
}

/// Registry mapping method names to handlers.
///
/// Read-mostly: `expose` is valid at build time and on a live session,
/// dispatch takes a read lock and clones the `Arc` out.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed method handler, replacing any previous handler
    /// under the same name.
    pub fn register<F, T, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let typed: Arc<dyn Handler> = Arc::new(TypedHandler::new(handler));
        self.methods
            .write()
            .expect("method table lock poisoned")
            .insert(name.to_string(), typed);
    }

    /// Look up a handler by method name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods
            .read()
            .expect("method table lock poisoned")
            .get(name)
            .cloned()
    }

    /// Check whether a method is exposed.
    pub fn contains(&self, name: &str) -> bool {
        self.methods
            .read()
            .expect("method table lock poisoned")
            .contains_key(name)
    }

    /// Number of exposed methods.
    pub fn len(&self) -> usize {
        self.methods
            .read()
            .expect("method table lock poisoned")
            .len()
    }

    /// Check whether no methods are exposed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
