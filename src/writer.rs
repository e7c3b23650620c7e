//! Per-connection writer task for stream transports.
//!
//! Senders never touch the socket. Packets go through an mpsc channel to a
//! dedicated task that batches whatever is queued into one vectored write.
//!
//! ```text
//! Fan-out task 1 ─┐
//! Fan-out task 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TcpStream
//! Handler N      ─┘
//! ```
//!
//! A shared pending counter provides backpressure: [`WriterHandle::send`]
//! waits (up to a timeout) for the queue to drain, [`WriterHandle::try_send`]
//! fails immediately instead.

use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{HubwireError, Result};
use crate::protocol::{encode_frame_header, FRAME_HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Poll interval while waiting for the queue to drain.
const BACKPRESSURE_POLL: Duration = Duration::from_micros(100);

/// A length-prefixed packet ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded length prefix.
    pub header: [u8; FRAME_HEADER_SIZE],
    /// Packet bytes, shared with other targets of the same fan-out.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Frame a packet.
    ///
    /// # Errors
    ///
    /// Returns error if the packet does not fit the u32 length prefix.
    #[inline]
    pub fn new(payload: Bytes) -> Result<Self> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            HubwireError::Protocol(format!("Packet of {} bytes is too large", payload.len()))
        })?;
        Ok(Self {
            header: encode_frame_header(len),
            payload,
        })
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
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

/// Cheaply cloneable handle for queueing frames on one connection.
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

    /// Queue a frame, waiting while backpressure is active.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the queue does not drain in time,
    /// `ConnectionClosed` if the writer task is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            tokio::time::timeout(self.timeout, self.drained())
                .await
                .map_err(|_| HubwireError::BackpressureTimeout)?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            HubwireError::ConnectionClosed
        })
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(HubwireError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => HubwireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => HubwireError::ConnectionClosed,
            }
        })
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

    async fn drained(&self) {
        while self.is_backpressure_active() {
            tokio::time::sleep(BACKPRESSURE_POLL).await;
        }
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The task ends cleanly once every handle is dropped, or with an error
/// when the stream fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
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
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    // recv_many returns 0 only once the channel is closed and empty
    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch.len(), Ordering::Release);
        batch.clear();
    }

    writer.shutdown().await.or_else(ignore_not_connected)?;
    Ok(())
}

fn ignore_not_connected(err: io::Error) -> io::Result<()> {
    match err.kind() {
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Ok(()),
        _ => Err(err),
    }
}

/// Write a batch with scatter/gather I/O, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = build_remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write_vectored returned 0").into());
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices for everything in `batch` after the first `skip` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip < end {
                slices.push(IoSlice::new(&part[skip.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::duplex;

    fn frame(payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_outbound_frame_prefix() {
        let frame = frame(b"hello");

        assert_eq!(frame.header, [0, 0, 0, 5]);
        assert_eq!(frame.size(), FRAME_HEADER_SIZE + 5);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        handle.send(frame(b"hello")).await.unwrap();

        let mut buf = vec![0u8; FRAME_HEADER_SIZE + 5];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[tokio::test]
    async fn test_writer_batching() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        for _ in 0..10 {
            handle.send(frame(b"abcd")).await.unwrap();
        }

        let mut buf = vec![0u8; 10 * (FRAME_HEADER_SIZE + 4)];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();

        assert!(buf.chunks(8).all(|c| c == [0, 0, 0, 4, b'a', b'b', b'c', b'd']));
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100));

        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        let result = handle.try_send(frame(b""));
        assert!(matches!(result, Err(HubwireError::BackpressureTimeout)));
        assert!(handle.is_backpressure_active());
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), FRAME_HEADER_SIZE - 2);
        assert_eq!(slices[1].len(), 5);

        let slices = build_remaining_slices(&batch, FRAME_HEADER_SIZE + 1);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 4);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (FRAME_HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        assert!(task.await.unwrap().is_ok());
    }
}
