//! Session facade, lifecycle, and dispatcher.
//!
//! A [`Session`] runs the framed JSON-RPC protocol over one exclusively
//! owned byte stream. Both sides can call and be called: outbound
//! requests get a parity-disciplined id and a pending completion;
//! inbound frames are decoded by the stream parser and routed here.
//!
//! All session state (`sequence`, `pending`, `streams`) is mutated from
//! the single read task that drains the parser; the mutex exists for the
//! host-facing API and is never held across a suspension point.
//!
//! # Example
//!
//! ```ignore
//! use blizzard::{Session, transport};
//!
//! let stream = transport::tcp::connect("127.0.0.1:4100").await?;
//! let (session, mut events) = Session::builder()
//!     .expose("add", |params: Vec<i64>, ctx| async move {
//!         ctx.resolve(&params.iter().sum::<i64>()).await
//!     })
//!     .instigate(stream)
//!     .await?;
//!
//! events.wait_ready().await?;
//! let sum = session.call("add", [1, 2]).await?;
//! ```

mod pending;
mod reassembly;
mod sequence;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{BlizzardError, Result};
use crate::handler::{HandlerResult, MethodRegistry, ReplyContext};
use crate::protocol::{codes, FrameBuffer, FrameEvent, Incoming, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

use pending::{CallOutcome, PendingCalls};
use reassembly::{Append, StreamAssembler};
use sequence::SequenceAllocator;

pub use sequence::Role;

/// Read buffer size for the session read loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of the host-facing event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A reply payload: structured JSON or opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A JSON value, delivered as a `{result}` frame.
    Json(Value),
    /// Raw bytes, delivered as a buffer frame plus terminator.
    Binary(Bytes),
}

impl Payload {
    /// Get the JSON value, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    /// Get the bytes, if this is a binary payload.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Json(_) => None,
            Payload::Binary(bytes) => Some(bytes),
        }
    }
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Socket connected, handshake not yet received.
    Opening,
    /// Normal dispatch.
    Ready,
    /// Local `end()` or remote close; no new requests accepted.
    Closing,
    /// Socket destroyed.
    Closed,
}

/// Host-visible session events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The peer's handshake arrived; dispatch is live.
    Ready,
    /// The session is over (local end or remote close).
    End,
    /// An unrecoverable failure the peer cannot be told about.
    Fatal {
        /// Error code, JSON-RPC aligned.
        code: i64,
        /// Description.
        message: String,
    },
}

/// Receiving side of the session event stream.
pub struct SessionEvents {
    rx: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    /// Receive the next event; `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Wait until the session is ready for dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the session ends or fails before the peer's
    /// handshake arrives.
    pub async fn wait_ready(&mut self) -> Result<()> {
        match self.rx.recv().await {
            Some(SessionEvent::Ready) => Ok(()),
            Some(SessionEvent::Fatal { message, .. }) => Err(BlizzardError::Protocol(message)),
            Some(SessionEvent::End) | None => Err(BlizzardError::ConnectionClosed),
        }
    }
}

/// Tuning knobs carried by the builder.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum payload length accepted from the wire.
    pub max_payload_size: u32,
    /// Maximum size of one reassembled binary stream.
    pub max_stream_size: usize,
    /// Writer task configuration.
    pub writer: WriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_stream_size: crate::protocol::DEFAULT_MAX_STREAM_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

/// Builder for configuring and starting a session.
pub struct SessionBuilder {
    registry: MethodRegistry,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a new session builder.
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            config: SessionConfig::default(),
        }
    }

    /// Expose a method under `name`.
    ///
    /// The handler receives the request's deserialized `params` and a
    /// one-shot [`ReplyContext`].
    pub fn expose<F, T, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    /// Set the maximum payload length accepted from the wire.
    pub fn max_payload_size(mut self, bytes: u32) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Set the maximum size of one reassembled binary stream.
    pub fn max_stream_size(mut self, bytes: usize) -> Self {
        self.config.max_stream_size = bytes;
        self
    }

    /// Replace the writer task configuration.
    pub fn writer_config(mut self, writer: WriterConfig) -> Self {
        self.config.writer = writer;
        self
    }

    /// Start the session as the side that opened the connection.
    ///
    /// Instigator sessions allocate even ids; the first bytes written
    /// are the zero-length handshake.
    pub async fn instigate<S>(self, stream: S) -> Result<(Session, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Session::start(self.registry, self.config, Role::Instigator, stream).await
    }

    /// Start the session as the side that accepted the connection.
    ///
    /// Acceptor sessions allocate odd ids.
    pub async fn accept<S>(self, stream: S) -> Result<(Session, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Session::start(self.registry, self.config, Role::Acceptor, stream).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable per-session state, owned by the dispatch task.
struct SessionState {
    sequence: SequenceAllocator,
    pending: PendingCalls,
    streams: StreamAssembler,
}

/// State shared between the session facade, the read task, and handlers.
struct SessionShared {
    state: Mutex<SessionState>,
    methods: MethodRegistry,
    writer: WriterHandle,
    events: mpsc::Sender<SessionEvent>,
    phase: watch::Sender<Phase>,
}

impl SessionShared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state lock poisoned")
    }

    /// Defensive id sync, invoked for every parsed frame id.
    fn observe(&self, id: u32) {
        self.lock_state().sequence.observe(id);
    }

    /// Deliver a reply to the pending caller for `id`.
    ///
    /// An unknown id with a success outcome means both sides are out of
    /// sync and is surfaced as an internal failure; an unknown id with an
    /// error outcome is dropped so the two sides cannot ping-pong error
    /// replies forever.
    async fn complete(&self, id: u32, outcome: CallOutcome) {
        let completion = self.lock_state().pending.take(id);
        match completion {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::trace!(id, "reply for abandoned call dropped");
                }
            }
            None => match outcome {
                Ok(_) => self.fail(id, codes::INTERNAL, "No callback for id").await,
                Err(error) => {
                    tracing::debug!(id, code = error.code, "error reply for unknown id dropped");
                }
            },
        }
    }

    /// Failure funnel for everything that goes wrong inside the session.
    async fn fail(&self, id: u32, code: i64, message: &str) {
        if id == 0 {
            if code == codes::INTERNAL {
                // The peer cannot be told; the local program must surface it.
                tracing::error!(code, %message, "fatal session error");
                let _ = self.events.try_send(SessionEvent::Fatal {
                    code,
                    message: message.to_string(),
                });
            } else {
                tracing::debug!(code, %message, "unaddressable protocol failure dropped");
            }
            return;
        }

        match OutboundFrame::error(id, code, message) {
            Ok(frame) => {
                if let Err(e) = self.writer.send(frame).await {
                    tracing::debug!(id, error = %e, "error reply could not be sent");
                }
            }
            Err(e) => tracing::error!(id, error = %e, "error reply could not be encoded"),
        }
    }

    /// Transport-level failure; the session is unusable afterwards.
    fn fatal_transport(&self, message: String) {
        tracing::error!(%message, "transport error");
        let _ = self.events.try_send(SessionEvent::Fatal {
            code: codes::INTERNAL,
            message,
        });
    }
}

/// One bidirectional connection running the framed JSON-RPC protocol.
///
/// Cheap to clone through `Arc` internally; the public handle is the
/// only way to issue calls, notifications, and low-level replies.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    async fn start<S>(
        registry: MethodRegistry,
        config: SessionConfig,
        role: Role,
        stream: S,
    ) -> Result<(Session, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let (phase_tx, phase_rx) = watch::channel(Phase::Opening);
        let (writer, _writer_task) =
            spawn_writer_task(write_half, config.writer.clone(), phase_rx.clone());
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState {
                sequence: SequenceAllocator::new(role),
                pending: PendingCalls::new(),
                streams: StreamAssembler::with_max_stream_size(config.max_stream_size),
            }),
            methods: registry,
            writer,
            events: event_tx,
            phase: phase_tx,
        });

        // Both sides announce themselves; each becomes ready on
        // receiving the peer's handshake.
        shared.writer.send(OutboundFrame::handshake()).await?;

        tokio::spawn(read_loop(
            read_half,
            shared.clone(),
            config.max_payload_size,
            phase_rx,
        ));

        Ok((Session { shared }, SessionEvents { rx: event_rx }))
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    /// Expose a method on the live session.
    pub fn expose<F, T, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.methods.register(name, handler);
    }

    /// Issue a request and await its correlated reply.
    ///
    /// Allocates an id, registers a completion, and sends
    /// `{method, params?}`. The completion fires at most once; dropping
    /// the returned future abandons it, in which case a late reply is
    /// silently discarded.
    ///
    /// # Errors
    ///
    /// - [`BlizzardError::Remote`] when the peer answers with an error
    /// - [`BlizzardError::SessionClosed`] after `end()`
    /// - transport-level errors from the writer
    pub async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Payload> {
        self.ensure_open()?;
        let params = prepare_params(params)?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.shared.lock_state();
            let id = state.sequence.next();
            state.pending.insert(id, tx);
            id
        };

        let frame = OutboundFrame::request(id, method, params.as_ref())?;
        if let Err(e) = self.shared.writer.send(frame).await {
            // The request never hit the wire; drop the completion.
            self.shared.lock_state().pending.take(id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(error)) => Err(BlizzardError::Remote {
                code: error.code,
                message: error.message,
            }),
            Err(_) => Err(BlizzardError::ConnectionClosed),
        }
    }

    /// Send a notification: a request at id 0 for which no reply is
    /// expected or permitted. No request-table entry is created.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        self.ensure_open()?;
        let params = prepare_params(params)?;
        self.shared
            .writer
            .send(OutboundFrame::request(0, method, params.as_ref())?)
            .await
    }

    /// Low-level reply emission; normally driven by the dispatcher.
    ///
    /// # Errors
    ///
    /// Replying at id 0 is a programmer error and is rejected without
    /// touching the wire.
    pub async fn reply(&self, id: u32, payload: Payload) -> Result<()> {
        if id == 0 {
            return Err(BlizzardError::Protocol(
                "replies require a non-zero id".to_string(),
            ));
        }
        let frame = match payload {
            Payload::Json(value) => OutboundFrame::result(id, &value)?,
            Payload::Binary(bytes) => OutboundFrame::binary_reply(id, bytes),
        };
        self.shared.writer.send(frame).await
    }

    /// Close the session.
    ///
    /// No new requests are accepted; pending completions are left
    /// untouched for the host to time out or abandon. The read loop and
    /// writer task drain and stop, landing the phase on `Closed`.
    pub fn end(&self) {
        self.shared.phase.send_if_modified(|phase| {
            if *phase < Phase::Closing {
                *phase = Phase::Closing;
                true
            } else {
                false
            }
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.shared.phase.borrow() >= Phase::Closing {
            return Err(BlizzardError::SessionClosed);
        }
        Ok(())
    }
}

/// Serialize caller params, mapping a null value to "omitted".
fn prepare_params<P: Serialize>(params: P) -> Result<Option<Value>> {
    let value = serde_json::to_value(params)?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// Main read loop: drain the socket through the stream parser and
/// dispatch every event in arrival order.
async fn read_loop<R>(
    mut reader: R,
    shared: Arc<SessionShared>,
    max_payload_size: u32,
    mut phase: watch::Receiver<Phase>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut phase_open = true;

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => break, // remote end
                    Ok(n) => match frame_buffer.push(&buf[..n]) {
                        Ok(events) => {
                            for event in events {
                                handle_event(&shared, event).await;
                            }
                        }
                        Err(e) => {
                            shared.fatal_transport(e.to_string());
                            break;
                        }
                    },
                    Err(e) => {
                        shared.fatal_transport(e.to_string());
                        break;
                    }
                }
            }

            changed = phase.changed(), if phase_open => {
                match changed {
                    Ok(()) => {
                        if *phase.borrow_and_update() >= Phase::Closing {
                            break;
                        }
                    }
                    Err(_) => phase_open = false,
                }
            }
        }
    }

    shared.phase.send_replace(Phase::Closed);
    let _ = shared.events.try_send(SessionEvent::End);
}

/// Route one parser event through the session state machine.
async fn handle_event(shared: &Arc<SessionShared>, event: FrameEvent) {
    match event {
        FrameEvent::Handshake => {
            let became_ready = shared.phase.send_if_modified(|phase| {
                if *phase == Phase::Opening {
                    *phase = Phase::Ready;
                    true
                } else {
                    false
                }
            });
            if became_ready {
                let _ = shared.events.try_send(SessionEvent::Ready);
            } else {
                tracing::debug!("redundant handshake ignored");
            }
        }

        FrameEvent::Json { id, payload } => {
            shared.observe(id);
            match Incoming::parse(id, &payload) {
                Ok(Incoming::Request { id, method, params }) => {
                    dispatch_call(shared, id, &method, params).await;
                }
                Ok(Incoming::Notification { method, params }) => {
                    dispatch_call(shared, 0, &method, params).await;
                }
                Ok(Incoming::Success { id, result }) => {
                    shared.complete(id, Ok(Payload::Json(result))).await;
                }
                Ok(Incoming::Failure { id, error }) => {
                    shared.complete(id, Err(error)).await;
                }
                Err(fault) => {
                    shared.fail(fault.id, fault.code, &fault.message).await;
                }
            }
        }

        FrameEvent::BufferChunk { id, payload } => {
            shared.observe(id);
            let appended = shared.lock_state().streams.append(id, &payload);
            if appended == Append::Overflow {
                shared
                    .fail(id, codes::INVALID, "Stream exceeds maximum size")
                    .await;
            }
        }

        FrameEvent::BufferEnd { id } => {
            shared.observe(id);
            let bytes = shared.lock_state().streams.take(id);
            match bytes {
                Some(bytes) => shared.complete(id, Ok(Payload::Binary(bytes))).await,
                None => {
                    shared
                        .fail(id, codes::INVALID, "Final packet for unknown stream")
                        .await;
                }
            }
        }

        FrameEvent::ProtocolFail { id, code, message } => {
            shared.observe(id);
            shared.fail(id, code, &message).await;
        }
    }
}

/// Invoke the handler for an inbound request or notification.
async fn dispatch_call(shared: &Arc<SessionShared>, id: u32, method: &str, params: Value) {
    let Some(handler) = shared.methods.get(method) else {
        shared
            .fail(id, codes::METHOD, &format!("Method {} not found.", method))
            .await;
        return;
    };

    let ctx = ReplyContext::new(id, shared.writer.clone());
    let method = method.to_string();

    tokio::spawn(async move {
        if let Err(e) = handler.call(params, ctx).await {
            tracing::error!(method = %method, error = %e, "handler error");
        }
    });
}
