//! In-process transport.
//!
//! Endpoints created from the same [`MemoryNetwork`] can connect to each
//! other by address. Packets are handed straight to the remote endpoint's
//! receive callback, so every [`DeliveryMode`] is delivered reliably and in
//! order. Dropping an endpoint stops it and disconnects its remotes.
//!
//! # Example
//!
//! ```ignore
//! let network = MemoryNetwork::new();
//! let server = network.bind("127.0.0.1:7000".parse()?);
//! let client = network.endpoint();
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use bytes::Bytes;

use super::{
    ConnectionHandle, ConnectionStatus, DeliveryMode, ReceiveCallback, Transport, TransportEvent,
};
use crate::error::{HubwireError, Result};
use crate::handler::BoxFuture;

/// First port handed out by [`MemoryNetwork::endpoint`].
const FIRST_EPHEMERAL_PORT: u16 = 49152;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared address space for [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: Mutex<HashMap<SocketAddr, Weak<Endpoint>>>,
    next_port: AtomicU16,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint that will listen on `addr` once started.
    pub fn bind(&self, addr: SocketAddr) -> MemoryTransport {
        MemoryTransport {
            endpoint: Arc::new(Endpoint::new(addr)),
            network: self.clone(),
        }
    }

    /// Create an endpoint on a fresh loopback address.
    pub fn endpoint(&self) -> MemoryTransport {
        let offset = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let port = FIRST_EPHEMERAL_PORT.wrapping_add(offset);
        self.bind(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn lookup(&self, addr: SocketAddr) -> Option<Arc<Endpoint>> {
        lock(&self.inner.endpoints)
            .get(&addr)
            .and_then(Weak::upgrade)
    }
}

struct Link {
    local: ConnectionHandle,
    peer: Weak<Endpoint>,
}

struct Endpoint {
    addr: SocketAddr,
    callback: RwLock<Option<ReceiveCallback>>,
    accepting: AtomicBool,
    running: AtomicBool,
    links: Mutex<HashMap<SocketAddr, Link>>,
}

impl Endpoint {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            callback: RwLock::new(None),
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(false),
            links: Mutex::new(HashMap::new()),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(event),
            None => tracing::debug!(addr = %self.addr, "No receive callback, dropping event"),
        }
    }

    /// Remove the link to `remote` and report it closed.
    fn drop_link(&self, remote: SocketAddr) -> Option<Link> {
        let link = lock(&self.links).remove(&remote)?;
        link.local.set_status(ConnectionStatus::Disconnected);
        self.emit(TransportEvent::Disconnected(link.local.clone()));
        Some(link)
    }
}

/// Transport endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    endpoint: Arc<Endpoint>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Address this endpoint is reachable at.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.addr
    }

    /// Close the connection to `remote`, notifying both sides.
    pub fn disconnect(&self, remote: SocketAddr) -> bool {
        match self.endpoint.drop_link(remote) {
            Some(link) => {
                if let Some(peer) = link.peer.upgrade() {
                    peer.drop_link(self.endpoint.addr);
                }
                true
            }
            None => false,
        }
    }

    fn connect_now(&self, addr: SocketAddr) -> Result<ConnectionHandle> {
        if !self.endpoint.running.load(Ordering::Acquire) {
            return Err(HubwireError::NotStarted);
        }

        if let Some(link) = lock(&self.endpoint.links).get(&addr) {
            return Ok(link.local.clone());
        }

        let target = self
            .network
            .lookup(addr)
            .filter(|t| t.running.load(Ordering::Acquire) && t.accepting.load(Ordering::Acquire))
            .ok_or_else(|| {
                HubwireError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("nothing accepting at {}", addr),
                ))
            })?;

        let ours = ConnectionHandle::new(addr);
        let theirs = ConnectionHandle::new(self.endpoint.addr);

        lock(&target.links).insert(
            self.endpoint.addr,
            Link {
                local: theirs.clone(),
                peer: Arc::downgrade(&self.endpoint),
            },
        );
        lock(&self.endpoint.links).insert(
            addr,
            Link {
                local: ours.clone(),
                peer: Arc::downgrade(&target),
            },
        );

        target.emit(TransportEvent::Connected(theirs));
        self.endpoint.emit(TransportEvent::Connected(ours.clone()));

        Ok(ours)
    }

    fn send_now(&self, connection: &ConnectionHandle, packet: Bytes, mode: DeliveryMode) -> Result<()> {
        let remote = connection.remote_address();
        let peer = {
            let links = lock(&self.endpoint.links);
            let link = links
                .get(&remote)
                .filter(|link| link.local == *connection)
                .ok_or(HubwireError::TargetNotConnected(remote))?;
            link.peer.upgrade().ok_or(HubwireError::ConnectionClosed)?
        };

        let delivered_as = lock(&peer.links)
            .get(&self.endpoint.addr)
            .map(|link| link.local.clone())
            .ok_or(HubwireError::ConnectionClosed)?;

        tracing::trace!(%remote, ?mode, len = packet.len(), "Memory send");
        peer.emit(TransportEvent::Data(delivered_as, packet));
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn register_receive_callback(&self, callback: ReceiveCallback) {
        *self
            .endpoint
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut endpoints = lock(&self.network.inner.endpoints);
            if let Some(existing) = endpoints.get(&self.endpoint.addr).and_then(Weak::upgrade) {
                if !Arc::ptr_eq(&existing, &self.endpoint)
                    && existing.running.load(Ordering::Acquire)
                {
                    return Err(HubwireError::Io(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} is already bound", self.endpoint.addr),
                    )));
                }
            }
            endpoints.insert(self.endpoint.addr, Arc::downgrade(&self.endpoint));
            self.endpoint.running.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn stop(&self, reason: &str) {
        if !self.endpoint.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(addr = %self.endpoint.addr, reason, "Memory transport stopping");

        let remotes: Vec<SocketAddr> = lock(&self.endpoint.links).keys().copied().collect();
        for remote in remotes {
            self.disconnect(remote);
        }

        lock(&self.network.inner.endpoints).remove(&self.endpoint.addr);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.endpoint.addr)
    }

    fn connect(&self, addr: SocketAddr, _approval: Bytes) -> BoxFuture<'_, Result<ConnectionHandle>> {
        Box::pin(async move { self.connect_now(addr) })
    }

    fn accept_incoming(&self, accept: bool) {
        self.endpoint.accepting.store(accept, Ordering::Release);
    }

    fn active_connections(&self) -> Vec<ConnectionHandle> {
        lock(&self.endpoint.links)
            .values()
            .map(|link| link.local.clone())
            .filter(ConnectionHandle::is_connected)
            .collect()
    }

    fn connection(&self, addr: SocketAddr) -> Option<ConnectionHandle> {
        lock(&self.endpoint.links)
            .get(&addr)
            .map(|link| link.local.clone())
            .filter(ConnectionHandle::is_connected)
    }

    fn send(
        &self,
        connection: &ConnectionHandle,
        packet: Bytes,
        mode: DeliveryMode,
        _channel: u8,
    ) -> BoxFuture<'_, Result<()>> {
        let result = self.send_now(connection, packet, mode);
        Box::pin(async move { result })
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.stop("transport dropped");
    }
}
