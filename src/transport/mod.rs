//! Transport module - the point-to-point link a peer runs on.
//!
//! The routing core only needs a small capability set from a transport:
//! register a receive callback, start/stop, open connections, enumerate
//! them, and send bytes with a [`DeliveryMode`]. Two implementations ship
//! with the crate:
//!
//! - [`MemoryTransport`] - in-process peers on a shared [`MemoryNetwork`]
//! - [`TcpTransport`] - tokio TCP streams with length-prefixed packets

mod memory;
mod tcp;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::handler::BoxFuture;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpConfig, TcpTransport};

/// Reliability and ordering requested for a single send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// No guarantees, except for preventing duplicates.
    Unreliable,
    /// Late messages are dropped if newer ones were already received.
    UnreliableSequenced,
    /// All messages arrive, in any order.
    ReliableUnordered,
    /// All messages arrive eventually; late ones may be dropped.
    ReliableSequenced,
    /// All messages arrive, in send order.
    #[default]
    ReliableOrdered,
}

impl DeliveryMode {
    /// Whether the transport must retry until delivery.
    pub fn is_reliable(&self) -> bool {
        match self {
            DeliveryMode::Unreliable | DeliveryMode::UnreliableSequenced => false,
            DeliveryMode::ReliableUnordered
            | DeliveryMode::ReliableSequenced
            | DeliveryMode::ReliableOrdered => true,
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting = 0,
    /// Ready for traffic.
    Connected = 1,
    /// Shutdown requested.
    Disconnecting = 2,
    /// Closed.
    Disconnected = 3,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionStatus::Connecting,
            1 => ConnectionStatus::Connected,
            2 => ConnectionStatus::Disconnecting,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

struct ConnectionInner {
    id: u64,
    remote: SocketAddr,
    status: AtomicU8,
}

/// Shared handle to one live (or recently closed) connection.
///
/// Cloning is cheap. Two handles are equal when they refer to the same
/// connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Create a handle for a freshly established connection.
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                remote,
                status: AtomicU8::new(ConnectionStatus::Connected as u8),
            }),
        }
    }

    /// Process-unique connection id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Address of the remote end.
    #[inline]
    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote
    }

    /// Current status.
    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Whether the connection accepts traffic.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Update the status. Called by transports.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.inner.status.store(status as u8, Ordering::Release);
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("status", &self.status())
            .finish()
    }
}

/// Event reported by a transport to its receive callback.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection became ready.
    Connected(ConnectionHandle),
    /// A connection closed.
    Disconnected(ConnectionHandle),
    /// A data packet (one encoded envelope) arrived.
    Data(ConnectionHandle, Bytes),
}

/// Callback invoked by a transport on its own task/thread.
///
/// Implementations must return quickly.
pub type ReceiveCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Point-to-point transport capability consumed by a peer.
pub trait Transport: Send + Sync + 'static {
    /// Install the callback that receives every transport event.
    fn register_receive_callback(&self, callback: ReceiveCallback);

    /// Start the transport (bind listeners, spawn I/O tasks).
    fn start(&self) -> BoxFuture<'_, Result<()>>;

    /// Shut down all connections and stop accepting new ones.
    fn stop(&self, reason: &str);

    /// Address this transport is reachable at, once known.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Open a connection to `addr`.
    ///
    /// `approval` is opaque data for transports that run an approval step.
    fn connect(&self, addr: SocketAddr, approval: Bytes) -> BoxFuture<'_, Result<ConnectionHandle>>;

    /// Toggle acceptance of incoming connections.
    fn accept_incoming(&self, accept: bool);

    /// Snapshot of all connected connections.
    fn active_connections(&self) -> Vec<ConnectionHandle>;

    /// Look up a connected connection by remote address.
    fn connection(&self, addr: SocketAddr) -> Option<ConnectionHandle>;

    /// Send one packet on a connection.
    fn send(
        &self,
        connection: &ConnectionHandle,
        packet: Bytes,
        mode: DeliveryMode,
        channel: u8,
    ) -> BoxFuture<'_, Result<()>>;
}
