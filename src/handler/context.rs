//! Reply context for method handlers.
//!
//! A [`ReplyContext`] is the one-shot completion a handler receives next
//! to its params. Every terminal method consumes the context, so a
//! handler can answer a request at most once, and the answer can be:
//! - `resolve` - a JSON `{result}` reply
//! - `resolve_binary` - a binary reply (payload frame + terminator)
//! - `reject` - an error reply with the vendor "user" code
//!
//! For notifications (id 0) there is nothing to answer: `resolve` and
//! `resolve_binary` discard their value, and `reject` is swallowed.
//!
//! # Example
//!
//! ```ignore
//! async fn add(params: Vec<i64>, ctx: ReplyContext) -> HandlerResult {
//!     ctx.resolve(&params.iter().sum::<i64>()).await
//! }
//! ```

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::codes;
use crate::writer::{OutboundFrame, WriterHandle};

/// One-shot completion handed to a method handler.
pub struct ReplyContext {
    /// Id of the request being answered (0 = notification).
    id: u32,
    /// Writer feeding the session's socket.
    writer: Option<WriterHandle>,
}

impl ReplyContext {
    /// Create a detached context (for testing without a writer).
    pub fn detached(id: u32) -> Self {
        Self { id, writer: None }
    }

    /// Create a context bound to a session writer.
    pub fn new(id: u32, writer: WriterHandle) -> Self {
        Self {
            id,
            writer: Some(writer),
        }
    }

    /// Get the request id (0 = notification).
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check whether the caller expects a reply.
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.id != 0
    }

    /// Answer with a JSON `{result}` reply.
    ///
    /// Serializes the value with serde; for notifications the value is
    /// discarded without touching the wire.
    pub async fn resolve<T: serde::Serialize>(self, value: &T) -> Result<()> {
        if self.id == 0 {
            return Ok(());
        }
        let frame = OutboundFrame::result(self.id, &serde_json::to_value(value)?)?;
        self.send(frame).await
    }

    /// Answer with a binary reply: one `BUFFER_RESPONSE` payload frame
    /// followed immediately by its zero-length terminator.
    pub async fn resolve_binary(self, bytes: Bytes) -> Result<()> {
        if self.id == 0 {
            return Ok(());
        }
        let frame = OutboundFrame::binary_reply(self.id, bytes);
        self.send(frame).await
    }

    /// Signal handler failure.
    ///
    /// Emits a user-code error reply at the request id; for notifications
    /// the error is swallowed (the peer cannot be told).
    pub async fn reject(self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        if self.id == 0 {
            tracing::debug!(error = %message, "handler error for notification dropped");
            return Ok(());
        }
        let frame = OutboundFrame::error(self.id, codes::USER, &message)?;
        self.send(frame).await
    }

    async fn send(self, frame: OutboundFrame) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.send(frame).await,
            // No writer configured (testing mode)
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accessors() {
        let ctx = ReplyContext::detached(42);
        assert_eq!(ctx.id(), 42);
        assert!(ctx.expects_reply());

        let notification = ReplyContext::detached(0);
        assert!(!notification.expects_reply());
    }

    #[tokio::test]
    async fn test_resolve_without_writer() {
        let ctx = ReplyContext::detached(42);
        assert!(ctx.resolve(&"test").await.is_ok());
    }

    #[tokio::test]
    async fn test_all_terminals_without_writer() {
        assert!(ReplyContext::detached(1).resolve(&1i64).await.is_ok());
        assert!(ReplyContext::detached(1)
            .resolve_binary(Bytes::from_static(b"bin"))
            .await
            .is_ok());
        assert!(ReplyContext::detached(1).reject("boom").await.is_ok());
    }

    #[tokio::test]
    async fn test_notification_resolve_is_discarded() {
        use crate::protocol::HEADER_SIZE;
        use crate::writer::spawn_writer_task_default;
        use tokio::io::{duplex, AsyncReadExt};
        use tokio::time::{timeout, Duration};

        let (client, mut server) = duplex(4096);
        let (writer, _task) = spawn_writer_task_default(client);

        ReplyContext::new(0, writer).resolve(&"ignored").await.unwrap();

        // Nothing may reach the wire for id 0.
        let mut buf = [0u8; HEADER_SIZE];
        let read = timeout(Duration::from_millis(50), server.read(&mut buf)).await;
        assert!(read.is_err(), "no frame expected for a notification reply");
    }

    #[tokio::test]
    async fn test_reject_writes_user_error_frame() {
        use crate::protocol::{Header, HEADER_SIZE};
        use crate::writer::spawn_writer_task_default;
        use tokio::io::{duplex, AsyncReadExt};

        let (client, mut server) = duplex(4096);
        let (writer, _task) = spawn_writer_task_default(client);

        ReplyContext::new(7, writer).reject("boom").await.unwrap();

        let mut header = [0u8; HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        let header = Header::decode(&header).unwrap();
        assert_eq!(header.id, 7);

        let mut payload = vec![0u8; header.length as usize];
        server.read_exact(&mut payload).await.unwrap();
        assert_eq!(
            payload,
            br#"{"error":{"code":-32000,"message":"boom"}}"#
        );
    }
}
