//! Per-dispatch context handed to handlers.
//!
//! Provides the send path back into the transport:
//! - `send` - to the connection that produced the message
//! - `send_to` - to one connection by remote address
//! - `send_to_all` - to every active connection, this one included
//! - `send_to_others` - to every active connection except this one
//!
//! Each send encodes the payload once with the peer's [`Codec`] and wraps it
//! in an [`Envelope`](crate::protocol::Envelope).
//!
//! # Example
//!
//! ```ignore
//! async fn on_chat(ctx: Context, msg: ChatMessage) -> HandlerResult {
//!     let report = ctx.send_to_others("chat/message", &msg).await?;
//!     if !report.is_complete() {
//!         ctx.send("chat/partial", &report.failed.len()).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::codec::Codec;
use crate::error::{HubwireError, Result};
use crate::protocol::encode_envelope;
use crate::transport::{ConnectionHandle, DeliveryMode, Transport};

/// Context passed to handlers.
///
/// Created fresh for every dispatch. `Context` is `Clone` and can be moved
/// into spawned tasks.
#[derive(Clone)]
pub struct Context {
    connection: ConnectionHandle,
    transport: Arc<dyn Transport>,
    codec: Codec,
    delivery: DeliveryMode,
}

impl Context {
    /// Create a context for `connection` on `transport`.
    pub fn new(connection: ConnectionHandle, transport: Arc<dyn Transport>, codec: Codec) -> Self {
        Self {
            connection,
            transport,
            codec,
            delivery: DeliveryMode::default(),
        }
    }

    /// Use `mode` for every send made through this context.
    pub fn with_delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery = mode;
        self
    }

    /// Delivery mode used by the send methods.
    #[inline]
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery
    }

    /// The connection this message came from.
    #[inline]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Remote address of [`connection`](Self::connection).
    #[inline]
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Payload codec in effect for this peer.
    #[inline]
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// All active connections on the owning peer.
    pub fn all(&self) -> Vec<ConnectionHandle> {
        self.transport.active_connections()
    }

    /// All active connections except this one.
    pub fn others(&self) -> Vec<ConnectionHandle> {
        self.transport
            .active_connections()
            .into_iter()
            .filter(|c| *c != self.connection)
            .collect()
    }

    /// Send to the current connection.
    pub async fn send<T: Serialize + ?Sized>(&self, route: &str, payload: &T) -> Result<()> {
        let packet = self.envelope(route, payload)?;
        self.transport
            .send(&self.connection, packet, self.delivery, 0)
            .await
    }

    /// Send a message without payload to the current connection.
    pub async fn send_empty(&self, route: &str) -> Result<()> {
        let packet = encode_envelope(route, &[])?;
        self.transport
            .send(&self.connection, packet, self.delivery, 0)
            .await
    }

    /// Send to the connection whose remote address is `addr`.
    ///
    /// Fails with [`HubwireError::TargetNotConnected`] if there is none.
    pub async fn send_to<T: Serialize + ?Sized>(
        &self,
        addr: SocketAddr,
        route: &str,
        payload: &T,
    ) -> Result<()> {
        let target = self
            .transport
            .connection(addr)
            .ok_or(HubwireError::TargetNotConnected(addr))?;
        let packet = self.envelope(route, payload)?;
        self.transport.send(&target, packet, self.delivery, 0).await
    }

    /// Send to every active connection, this one included.
    pub async fn send_to_all<T: Serialize + ?Sized>(
        &self,
        route: &str,
        payload: &T,
    ) -> Result<FanOut> {
        let packet = self.envelope(route, payload)?;
        Ok(self.fan_out(route, self.all(), packet).await)
    }

    /// Send to every active connection except this one.
    pub async fn send_to_others<T: Serialize + ?Sized>(
        &self,
        route: &str,
        payload: &T,
    ) -> Result<FanOut> {
        let packet = self.envelope(route, payload)?;
        Ok(self.fan_out(route, self.others(), packet).await)
    }

    fn envelope<T: Serialize + ?Sized>(&self, route: &str, payload: &T) -> Result<Bytes> {
        let body = self.codec.encode(payload)?;
        encode_envelope(route, &body)
    }

    /// Send `packet` to each target on its own task. One failing target never
    /// stops delivery to the others.
    async fn fan_out(&self, route: &str, targets: Vec<ConnectionHandle>, packet: Bytes) -> FanOut {
        let mut tasks = JoinSet::new();
        for target in targets {
            let transport = self.transport.clone();
            let packet = packet.clone();
            let mode = self.delivery;
            tasks.spawn(async move {
                let result = transport.send(&target, packet, mode, 0).await;
                (target.remote_address(), result)
            });
        }

        let mut report = FanOut::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((addr, Ok(()))) => report.delivered.push(addr),
                Ok((addr, Err(e))) => {
                    tracing::warn!(route, remote = %addr, error = %e, "Fan-out send failed");
                    report.failed.push((addr, e));
                }
                Err(e) => tracing::error!(route, error = %e, "Fan-out send task aborted"),
            }
        }
        report
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("connection", &self.connection)
            .field("codec", &self.codec)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Outcome of a multi-target send.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Targets the transport accepted the packet for.
    pub delivered: Vec<SocketAddr>,
    /// Targets that failed, with the reason.
    pub failed: Vec<(SocketAddr, HubwireError)>,
}

impl FanOut {
    /// Whether every target was reached.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of targets attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use crate::transport::{MemoryNetwork, TransportEvent};
    use tokio::sync::mpsc;

    struct Harness {
        server: Arc<crate::transport::MemoryTransport>,
        clients: Vec<(crate::transport::MemoryTransport, mpsc::UnboundedReceiver<Envelope>)>,
    }

    async fn harness(clients: usize) -> Harness {
        let network = MemoryNetwork::new();
        let server = Arc::new(network.endpoint());
        server.start().await.unwrap();

        let mut connected = Vec::new();
        for _ in 0..clients {
            let client = network.endpoint();
            let (tx, rx) = mpsc::unbounded_channel();
            client.register_receive_callback(Arc::new(move |event| {
                if let TransportEvent::Data(_, bytes) = event {
                    let _ = tx.send(Envelope::decode(bytes).unwrap());
                }
            }));
            client.start().await.unwrap();
            client.connect(server.local_addr(), Bytes::new()).await.unwrap();
            connected.push((client, rx));
        }

        Harness {
            server,
            clients: connected,
        }
    }

    fn context_for(h: &Harness, index: usize) -> Context {
        let addr = h.clients[index].0.local_addr();
        let connection = h.server.connection(addr).unwrap();
        Context::new(connection, h.server.clone(), Codec::MsgPack)
    }

    #[tokio::test]
    async fn test_send_reaches_current_connection() {
        let mut h = harness(2).await;
        let ctx = context_for(&h, 0);

        ctx.send("greet", "hi").await.unwrap();

        let envelope = h.clients[0].1.recv().await.unwrap();
        assert_eq!(envelope.route, "greet");
        let text: String = Codec::MsgPack.decode(&envelope.payload.unwrap()).unwrap();
        assert_eq!(text, "hi");
        assert!(h.clients[1].1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_empty_has_no_payload() {
        let mut h = harness(1).await;
        let ctx = context_for(&h, 0);

        ctx.send_empty("ping").await.unwrap();

        let envelope = h.clients[0].1.recv().await.unwrap();
        assert_eq!(envelope.route, "ping");
        assert!(envelope.payload.is_none());
    }

    #[tokio::test]
    async fn test_send_to_unknown_address() {
        let h = harness(1).await;
        let ctx = context_for(&h, 0);

        let missing: SocketAddr = "10.0.0.1:1".parse().unwrap();
        let err = ctx.send_to(missing, "x", &1u8).await.unwrap_err();
        assert!(matches!(err, HubwireError::TargetNotConnected(addr) if addr == missing));
    }

    #[tokio::test]
    async fn test_send_to_others_skips_current() {
        let mut h = harness(3).await;
        let ctx = context_for(&h, 0);

        let report = ctx.send_to_others("news", &42u32).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.attempted(), 2);

        assert!(h.clients[1].1.recv().await.is_some());
        assert!(h.clients[2].1.recv().await.is_some());
        assert!(h.clients[0].1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_others_excludes_self() {
        let h = harness(3).await;
        let ctx = context_for(&h, 1);

        assert_eq!(ctx.all().len(), 3);
        let others = ctx.others();
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|c| c != ctx.connection()));
    }

    #[test]
    fn test_fan_out_report() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let report = FanOut {
            delivered: vec![addr],
            failed: vec![(addr, HubwireError::ConnectionClosed)],
        };
        assert!(!report.is_complete());
        assert_eq!(report.attempted(), 2);
    }

    #[test]
    fn test_with_delivery() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.endpoint());
        let conn = ConnectionHandle::new("127.0.0.1:9".parse().unwrap());

        let ctx = Context::new(conn, transport, Codec::Json).with_delivery(DeliveryMode::Unreliable);
        assert_eq!(ctx.delivery_mode(), DeliveryMode::Unreliable);
        assert_eq!(ctx.codec(), Codec::Json);
    }
}
