//! Dedicated writer task for outbound frames.
//!
//! All outbound frames funnel through a single task fed by an mpsc
//! channel. This keeps wire order equal to submission order, eliminates
//! lock contention between handlers, and lets multiple frames share a
//! single vectored write.
//!
//! # Architecture
//!
//! ```text
//! Caller    ─┐
//! Handler 1 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! Handler N ─┘
//! ```
//!
//! A frame may carry a `trailer`: a second pre-encoded header written
//! immediately after the payload. Binary replies use it for their
//! zero-length terminator, which makes the pair adjacent on the wire no
//! matter how submissions interleave.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::error::{BlizzardError, Result};
use crate::protocol::{kind, Header, HEADER_SIZE};
use crate::session::Phase;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (10 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for handshakes and terminators).
    pub payload: Bytes,
    /// Optional second header written right after the payload.
    pub trailer: Option<[u8; HEADER_SIZE]>,
}

#[derive(serde::Serialize)]
struct RequestBody<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl OutboundFrame {
    /// Create an outbound frame from a header and payload.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
            trailer: None,
        }
    }

    /// Create an outbound frame with empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
            trailer: None,
        }
    }

    /// Zero-length handshake frame at id 0.
    pub fn handshake() -> Self {
        Self::empty(&Header::new(kind::HANDSHAKE, 0, 0))
    }

    /// JSON request/notification frame: `{method, params?}`.
    pub fn request(id: u32, method: &str, params: Option<&Value>) -> Result<Self> {
        let body = JsonCodec::encode(&RequestBody { method, params })?;
        Ok(Self::json(id, body))
    }

    /// JSON success reply frame: `{result}`.
    pub fn result(id: u32, result: &Value) -> Result<Self> {
        let body = JsonCodec::encode(&json!({ "result": result }))?;
        Ok(Self::json(id, body))
    }

    /// JSON error reply frame: `{error: {code, message}}`.
    pub fn error(id: u32, code: i64, message: &str) -> Result<Self> {
        let body = JsonCodec::encode(&json!({ "error": { "code": code, "message": message } }))?;
        Ok(Self::json(id, body))
    }

    /// Binary reply: one payload frame with the zero-length terminator
    /// riding as its trailer, so the pair cannot be split on the wire.
    pub fn binary_reply(id: u32, bytes: Bytes) -> Self {
        let header = Header::new(kind::BUFFER_RESPONSE, id, bytes.len() as u32);
        Self {
            header: header.encode(),
            payload: bytes,
            trailer: Some(Header::new(kind::BUFFER_RESPONSE, id, 0).encode()),
        }
    }

    fn json(id: u32, body: Vec<u8>) -> Self {
        let header = Header::new(kind::JSON, id, body.len() as u32);
        Self::new(&header, Bytes::from(body))
    }

    /// Total size of this frame (header + payload + trailer).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE
            + self.payload.len()
            + self.trailer.map_or(0, |_| HEADER_SIZE)
    }

    /// The non-empty byte segments of this frame, in wire order.
    fn segments(&self) -> impl Iterator<Item = &[u8]> {
        [
            Some(&self.header[..]),
            (!self.payload.is_empty()).then_some(&self.payload[..]),
            self.trailer.as_ref().map(|t| &t[..]),
        ]
        .into_iter()
        .flatten()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; shared by the session facade and every handler.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits if backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            BlizzardError::ConnectionClosed
        })
    }

    /// Wait for backpressure to clear with timeout.
    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(BlizzardError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task drains its queue until the channel closes, or until `phase`
/// reaches `Closing`, at which point it flushes whatever is ready and
/// shuts the write half down.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    phase: watch::Receiver<Phase>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending, phase));

    (handle, task)
}

/// Spawn the writer task with default configuration and no lifecycle
/// coupling (the task runs until its channel closes).
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (phase_tx, phase_rx) = watch::channel(Phase::Ready);
    drop(phase_tx);
    spawn_writer_task(writer, WriterConfig::default(), phase_rx)
}

/// Main writer loop: receives frames and writes them to the socket.
///
/// Uses batching and scatter/gather I/O (writev) for efficiency.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    mut phase: watch::Receiver<Phase>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut phase_open = true;

    loop {
        tokio::select! {
            first = rx.recv() => {
                let Some(first) = first else {
                    // Channel closed, clean shutdown
                    let _ = writer.shutdown().await;
                    return Ok(());
                };

                // Collect additional ready frames (non-blocking)
                let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
                batch.push(first);

                while batch.len() < MAX_BATCH_SIZE {
                    match rx.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }

                let batch_size = batch.len();
                write_batch(&mut writer, &batch).await?;
                pending.fetch_sub(batch_size, Ordering::Release);
            }

            changed = phase.changed(), if phase_open => {
                match changed {
                    Ok(()) => {
                        if *phase.borrow_and_update() >= Phase::Closing {
                            // Drain whatever is already queued, then stop.
                            let mut batch = Vec::new();
                            while let Ok(frame) = rx.try_recv() {
                                batch.push(frame);
                            }
                            if !batch.is_empty() {
                                let batch_size = batch.len();
                                write_batch(&mut writer, &batch).await?;
                                pending.fetch_sub(batch_size, Ordering::Release);
                            }
                            let _ = writer.shutdown().await;
                            return Ok(());
                        }
                    }
                    Err(_) => phase_open = false,
                }
            }
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// A single frame with payload goes from 2-3 syscalls (header write,
/// payload write, flush) down to 1-2 (vectored write, flush).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = collect_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BlizzardError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for the batch, skipping the first `skip`
/// already-written bytes.
fn collect_slices(batch: &[OutboundFrame], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for segment in frame.segments() {
            let end = offset + segment.len();
            if skip < end {
                let start = skip.saturating_sub(offset);
                slices.push(IoSlice::new(&segment[start..]));
            }
            offset = end;
        }
    }

    slices
}
