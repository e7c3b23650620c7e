//! TCP transport.
//!
//! Every connection gets one reader task (stream → [`FrameBuffer`] →
//! receive callback) and one writer task ([`spawn_writer_task`]). Packets are
//! length-prefixed, see [`crate::protocol::FrameBuffer`].
//!
//! Delivery modes map onto the single ordered stream as follows:
//!
//! | Mode                                       | Under backpressure      |
//! |--------------------------------------------|-------------------------|
//! | `Unreliable`, `UnreliableSequenced`        | dropped, send succeeds  |
//! | `ReliableUnordered`, `ReliableSequenced`, `ReliableOrdered` | waits for the queue |
//!
//! There is no approval handshake; the approval payload passed to
//! [`Transport::connect`] is not transmitted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use super::{
    ConnectionHandle, ConnectionStatus, DeliveryMode, ReceiveCallback, Transport, TransportEvent,
};
use crate::error::{HubwireError, Result};
use crate::handler::BoxFuture;
use crate::protocol::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Listen address. `None` for connect-only (client) transports.
    pub bind: Option<SocketAddr>,
    /// Largest packet accepted from a remote.
    pub max_frame_size: u32,
    /// Disable Nagle's algorithm on every stream.
    pub nodelay: bool,
    /// Per-connection writer settings.
    pub writer: WriterConfig,
}

impl TcpConfig {
    /// Configuration for a transport listening on `bind`.
    pub fn server(bind: SocketAddr) -> Self {
        Self {
            bind: Some(bind),
            ..Self::default()
        }
    }

    /// Configuration for a connect-only transport.
    pub fn client() -> Self {
        Self::default()
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
            writer: WriterConfig::default(),
        }
    }
}

struct TcpConnection {
    handle: ConnectionHandle,
    writer: WriterHandle,
    reader: AbortHandle,
}

struct TcpInner {
    config: TcpConfig,
    callback: RwLock<Option<ReceiveCallback>>,
    accepting: AtomicBool,
    running: AtomicBool,
    connections: Mutex<HashMap<u64, TcpConnection>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpInner {
    fn emit(&self, event: TransportEvent) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    fn register(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) -> ConnectionHandle {
        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            tracing::debug!(%remote, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (writer, _writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        let handle = ConnectionHandle::new(remote);

        // The reader is gated so Data can never overtake Connected.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let reader = tokio::spawn(read_loop(
            self.clone(),
            handle.clone(),
            read_half,
            ready_rx,
        ));

        lock(&self.connections).insert(
            handle.id(),
            TcpConnection {
                handle: handle.clone(),
                writer,
                reader: reader.abort_handle(),
            },
        );

        tracing::debug!(%remote, id = handle.id(), "TCP connection established");
        self.emit(TransportEvent::Connected(handle.clone()));
        let _ = ready_tx.send(());

        handle
    }

    /// Forget a connection and report it closed. Idempotent.
    fn close(&self, id: u64) {
        let Some(connection) = lock(&self.connections).remove(&id) else {
            return;
        };
        connection.handle.set_status(ConnectionStatus::Disconnected);
        connection.reader.abort();
        tracing::debug!(remote = %connection.handle.remote_address(), id, "TCP connection closed");
        self.emit(TransportEvent::Disconnected(connection.handle));
    }

    fn writer_for(&self, connection: &ConnectionHandle) -> Result<WriterHandle> {
        lock(&self.connections)
            .get(&connection.id())
            .map(|c| c.writer.clone())
            .ok_or(HubwireError::TargetNotConnected(connection.remote_address()))
    }
}

async fn read_loop(
    inner: Arc<TcpInner>,
    handle: ConnectionHandle,
    mut reader: OwnedReadHalf,
    ready: oneshot::Receiver<()>,
) {
    if ready.await.is_err() {
        return;
    }

    let mut frames = FrameBuffer::with_max_frame_size(inner.config.max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(remote = %handle.remote_address(), error = %e, "TCP read failed");
                break;
            }
        };

        match frames.push(&buf[..n]) {
            Ok(packets) => {
                for packet in packets {
                    inner.emit(TransportEvent::Data(handle.clone(), packet));
                }
            }
            Err(e) => {
                tracing::warn!(remote = %handle.remote_address(), error = %e, "Dropping connection");
                break;
            }
        }
    }

    inner.close(handle.id());
}

async fn accept_loop(inner: Arc<TcpInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                if !inner.accepting.load(Ordering::Acquire) {
                    tracing::debug!(%remote, "Refusing incoming connection");
                    continue;
                }
                inner.register(stream, remote);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Transport over tokio TCP streams.
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    /// Create a transport. Nothing is bound until [`Transport::start`].
    pub fn new(config: TcpConfig) -> Self {
        Self {
            inner: Arc::new(TcpInner {
                config,
                callback: RwLock::new(None),
                accepting: AtomicBool::new(true),
                running: AtomicBool::new(false),
                connections: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }
}

impl Transport for TcpTransport {
    fn register_receive_callback(&self, callback: ReceiveCallback) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.inner.running.load(Ordering::Acquire) {
                return Ok(());
            }

            if let Some(bind) = self.inner.config.bind {
                let listener = TcpListener::bind(bind).await?;
                let local = listener.local_addr()?;
                *lock(&self.inner.local_addr) = Some(local);
                tracing::info!(%local, "TCP transport listening");

                let task = tokio::spawn(accept_loop(self.inner.clone(), listener));
                *lock(&self.inner.listener) = Some(task);
            }

            self.inner.running.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn stop(&self, reason: &str) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(reason, "TCP transport stopping");

        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.abort();
        }

        let ids: Vec<u64> = lock(&self.inner.connections).keys().copied().collect();
        for id in ids {
            if let Some(connection) = lock(&self.inner.connections).get(&id) {
                connection.handle.set_status(ConnectionStatus::Disconnecting);
            }
            self.inner.close(id);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    fn connect(&self, addr: SocketAddr, approval: Bytes) -> BoxFuture<'_, Result<ConnectionHandle>> {
        Box::pin(async move {
            if !self.inner.running.load(Ordering::Acquire) {
                return Err(HubwireError::NotStarted);
            }
            if !approval.is_empty() {
                tracing::debug!(%addr, len = approval.len(), "Approval payload is not transmitted over TCP");
            }

            let stream = TcpStream::connect(addr).await?;
            Ok(self.inner.register(stream, addr))
        })
    }

    fn accept_incoming(&self, accept: bool) {
        self.inner.accepting.store(accept, Ordering::Release);
    }

    fn active_connections(&self) -> Vec<ConnectionHandle> {
        lock(&self.inner.connections)
            .values()
            .map(|c| c.handle.clone())
            .filter(ConnectionHandle::is_connected)
            .collect()
    }

    fn connection(&self, addr: SocketAddr) -> Option<ConnectionHandle> {
        lock(&self.inner.connections)
            .values()
            .map(|c| c.handle.clone())
            .find(|h| h.remote_address() == addr && h.is_connected())
    }

    fn send(
        &self,
        connection: &ConnectionHandle,
        packet: Bytes,
        mode: DeliveryMode,
        _channel: u8,
    ) -> BoxFuture<'_, Result<()>> {
        let connection = connection.clone();
        Box::pin(async move {
            let writer = self.inner.writer_for(&connection)?;
            let frame = OutboundFrame::new(packet)?;

            match mode {
                DeliveryMode::Unreliable | DeliveryMode::UnreliableSequenced => {
                    match writer.try_send(frame) {
                        Err(HubwireError::BackpressureTimeout) => {
                            tracing::trace!(remote = %connection.remote_address(), "Dropped unreliable packet");
                            Ok(())
                        }
                        other => other,
                    }
                }
                DeliveryMode::ReliableUnordered
                | DeliveryMode::ReliableSequenced
                | DeliveryMode::ReliableOrdered => writer.send(frame).await,
            }
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop("transport dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel_callback(transport: &TcpTransport) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.register_receive_callback(Arc::new(move |event| {
            let _ = tx.send(event);
        }));
        rx
    }

    #[tokio::test]
    async fn test_loopback_packet() {
        let server = TcpTransport::new(TcpConfig::server("127.0.0.1:0".parse().unwrap()));
        let client = TcpTransport::new(TcpConfig::client());
        let mut server_events = channel_callback(&server);
        let _client_events = channel_callback(&client);
        server.start().await.unwrap();
        client.start().await.unwrap();

        let addr = server.local_addr().unwrap();
        let conn = client.connect(addr, Bytes::new()).await.unwrap();
        client
            .send(&conn, Bytes::from_static(b"packet"), DeliveryMode::ReliableOrdered, 0)
            .await
            .unwrap();

        match server_events.recv().await.unwrap() {
            TransportEvent::Connected(_) => {}
            other => panic!("expected Connected, got {:?}", other),
        }
        match server_events.recv().await.unwrap() {
            TransportEvent::Data(_, bytes) => assert_eq!(&bytes[..], b"packet"),
            other => panic!("expected Data, got {:?}", other),
        }
        assert_eq!(server.active_connections().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_start() {
        let client = TcpTransport::new(TcpConfig::client());
        let result = client
            .connect("127.0.0.1:9".parse().unwrap(), Bytes::new())
            .await;
        assert!(matches!(result, Err(HubwireError::NotStarted)));
    }

    #[tokio::test]
    async fn test_stop_reports_disconnect() {
        let server = TcpTransport::new(TcpConfig::server("127.0.0.1:0".parse().unwrap()));
        let client = TcpTransport::new(TcpConfig::client());
        let _server_events = channel_callback(&server);
        let mut client_events = channel_callback(&client);
        server.start().await.unwrap();
        client.start().await.unwrap();

        let conn = client
            .connect(server.local_addr().unwrap(), Bytes::new())
            .await
            .unwrap();
        client.stop("test over");

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            client_events.recv().await,
            Some(TransportEvent::Connected(_))
        ));
        assert!(matches!(
            client_events.recv().await,
            Some(TransportEvent::Disconnected(_))
        ));

        let result = client
            .send(&conn, Bytes::from_static(b"late"), DeliveryMode::default(), 0)
            .await;
        assert!(matches!(result, Err(HubwireError::TargetNotConnected(_))));
    }
}
