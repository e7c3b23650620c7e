//! Peer builder and runtime loop.
//!
//! The [`PeerBuilder`] collects the schema, the handler factory and the
//! settings. The [`Peer`] owns the transport and manages the lifecycle:
//! 1. Resolve every schema entry into a handler table
//! 2. Register the receive callback and start the transport
//! 3. Decode inbound envelopes and hand them to the dispatcher
//! 4. Fire the lifecycle routes on connect and disconnect
//!
//! # Example
//!
//! ```ignore
//! use hubwire::{Peer, SchemaBuilder, TcpConfig, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> hubwire::Result<()> {
//!     let schema = SchemaBuilder::new()
//!         .async_route_fn_with("echo", |ctx, text: String| async move {
//!             ctx.send("echo", &text).await
//!         })
//!         .build()?;
//!
//!     let transport = TcpTransport::new(TcpConfig::server("0.0.0.0:7777".parse().unwrap()));
//!     let peer = Peer::builder(schema).build(transport);
//!     peer.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     peer.stop("shutdown");
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::codec::Codec;
use crate::config::{DuplicateRoutePolicy, PeerConfig};
use crate::dispatch::Dispatcher;
use crate::error::{HubwireError, Result};
use crate::handler::{Context, HandlerFactory, HandlerInstances, HandlerTable};
use crate::protocol::Envelope;
use crate::routing::{is_reserved, Schema, CONNECT_ROUTE, DISCONNECT_ROUTE};
use crate::transport::{ConnectionHandle, DeliveryMode, Transport, TransportEvent};

/// Builder for configuring and creating a [`Peer`].
pub struct PeerBuilder {
    schema: Schema,
    factory: Arc<dyn HandlerFactory>,
    config: PeerConfig,
}

impl PeerBuilder {
    /// Create a builder for `schema` with default settings and no
    /// type-based handler instances.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            factory: Arc::new(HandlerInstances::new()),
            config: PeerConfig::default(),
        }
    }

    /// Source of instances for type-based handlers.
    pub fn handlers<F: HandlerFactory>(mut self, factory: F) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Like [`handlers`](Self::handlers), for a factory shared with other code.
    pub fn shared_handlers(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace all settings.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the payload codec.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Set the maximum number of concurrently running handlers.
    ///
    /// When reached, intake waits for a handler to finish.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set how many inbound messages may wait for a free handler.
    ///
    /// Messages arriving while the queue is full are dropped with a warning.
    /// Default: 1024
    pub fn max_queued_messages(mut self, limit: usize) -> Self {
        self.config.max_queued_messages = limit;
        self
    }

    /// Whether messages for unknown routes are reported as errors.
    ///
    /// Default: true
    pub fn fail_when_no_handlers(mut self, fail: bool) -> Self {
        self.config.fail_when_no_handlers = fail;
        self
    }

    /// Set the duplicate route policy.
    ///
    /// Default: [`DuplicateRoutePolicy::Reject`]
    pub fn duplicate_routes(mut self, policy: DuplicateRoutePolicy) -> Self {
        self.config.duplicate_routes = policy;
        self
    }

    /// Set the delivery mode of handler contexts.
    ///
    /// Default: [`DeliveryMode::ReliableOrdered`]
    pub fn default_delivery(mut self, mode: DeliveryMode) -> Self {
        self.config.default_delivery = mode;
        self
    }

    /// Create the peer on `transport`. Nothing runs until [`Peer::start`].
    pub fn build<T: Transport>(self, transport: T) -> Peer {
        Peer {
            schema: self.schema,
            factory: self.factory,
            config: self.config,
            transport: Arc::new(transport),
            ingest: Mutex::new(None),
        }
    }
}

/// A routing endpoint on top of a transport.
///
/// Dropping a running peer stops it.
pub struct Peer {
    schema: Schema,
    factory: Arc<dyn HandlerFactory>,
    config: PeerConfig,
    transport: Arc<dyn Transport>,
    ingest: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Create a new peer builder.
    pub fn builder(schema: Schema) -> PeerBuilder {
        PeerBuilder::new(schema)
    }

    fn ingest(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ingest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve handlers, start the transport and begin processing events.
    ///
    /// Resolution errors ([`HubwireError::HandlerNotProvided`],
    /// [`HubwireError::DuplicateRoute`]) and transport start errors are
    /// returned here.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(HubwireError::AlreadyStarted);
        }

        let table = HandlerTable::resolve(
            &self.schema,
            self.factory.clone(),
            self.config.duplicate_routes,
        )?;
        let routes = table.len();
        let dispatcher = Dispatcher::new(table, self.config.max_concurrent_handlers);

        // Connection events are bounded by the number of connections; data is not.
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(self.config.max_queued_messages.max(1));
        self.transport.register_receive_callback(Arc::new(move |event| match event {
            TransportEvent::Data(connection, packet) => {
                match data_tx.try_send((connection, packet)) {
                    Ok(()) => {}
                    Err(TrySendError::Full((connection, _))) => {
                        tracing::warn!(remote = %connection.remote_address(), "Intake queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::trace!("Peer not running, message dropped");
                    }
                }
            }
            event => {
                if lifecycle_tx.send(event).is_err() {
                    tracing::trace!("Peer not running, transport event dropped");
                }
            }
        }));
        self.transport.start().await?;

        let task = tokio::spawn(ingest_loop(
            lifecycle_rx,
            data_rx,
            dispatcher,
            self.transport.clone(),
            self.config.clone(),
        ));

        let mut ingest = self.ingest();
        if ingest.is_some() {
            task.abort();
            return Err(HubwireError::AlreadyStarted);
        }
        *ingest = Some(task);

        tracing::info!(routes, codec = self.config.codec.name(), "Peer started");
        Ok(())
    }

    /// Stop processing events and shut the transport down.
    ///
    /// Handlers already running are not cancelled or awaited.
    pub fn stop(&self, reason: &str) {
        let Some(task) = self.ingest().take() else {
            return;
        };
        task.abort();
        self.transport.stop(reason);
        tracing::info!(reason, "Peer stopped");
    }

    /// Whether [`start`](Self::start) succeeded and [`stop`](Self::stop) was not called.
    pub fn is_running(&self) -> bool {
        self.ingest().is_some()
    }

    /// Open a connection and return a context for sending to it.
    pub async fn connect(&self, addr: SocketAddr, approval: Bytes) -> Result<Context> {
        if !self.is_running() {
            return Err(HubwireError::NotStarted);
        }
        let connection = self.transport.connect(addr, approval).await?;
        tracing::debug!(remote = %addr, "Connected");
        Ok(self.context(connection))
    }

    /// Context for the live connection to `addr`.
    pub fn context_for(&self, addr: SocketAddr) -> Option<Context> {
        self.transport.connection(addr).map(|c| self.context(c))
    }

    /// Address the transport is reachable at.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// All active connections.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.transport.active_connections()
    }

    /// Toggle acceptance of incoming connections.
    pub fn accept_incoming(&self, accept: bool) {
        self.transport.accept_incoming(accept);
    }

    /// The compiled schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Effective settings.
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    fn context(&self, connection: ConnectionHandle) -> Context {
        Context::new(connection, self.transport.clone(), self.config.codec)
            .with_delivery(self.config.default_delivery)
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.stop("peer dropped");
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("routes", &self.schema.len())
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Turn transport events into dispatches, one at a time.
///
/// Lifecycle events are taken first, so a connection's `Connected` is always
/// dispatched before its data.
async fn ingest_loop(
    mut lifecycle: mpsc::UnboundedReceiver<TransportEvent>,
    mut data: mpsc::Receiver<(ConnectionHandle, Bytes)>,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    config: PeerConfig,
) {
    loop {
        let event = tokio::select! {
            biased;
            Some(event) = lifecycle.recv() => event,
            Some((connection, packet)) = data.recv() => TransportEvent::Data(connection, packet),
            else => break,
        };
        let (route, payload, connection, fail_when_missing) = match event {
            TransportEvent::Data(connection, packet) => {
                let envelope = match Envelope::decode(packet) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(remote = %connection.remote_address(), error = %e, "Dropping malformed envelope");
                        continue;
                    }
                };
                if is_reserved(&envelope.route) {
                    tracing::warn!(remote = %connection.remote_address(), route = %envelope.route, "Dropping message for lifecycle route");
                    continue;
                }
                (
                    envelope.route,
                    envelope.payload,
                    connection,
                    config.fail_when_no_handlers,
                )
            }
            TransportEvent::Connected(connection) => {
                tracing::debug!(remote = %connection.remote_address(), "Connection established");
                (CONNECT_ROUTE.to_string(), None, connection, false)
            }
            TransportEvent::Disconnected(connection) => {
                tracing::debug!(remote = %connection.remote_address(), "Connection closed");
                (DISCONNECT_ROUTE.to_string(), None, connection, false)
            }
        };

        let ctx = Context::new(connection, transport.clone(), config.codec)
            .with_delivery(config.default_delivery);
        if let Err(e) = dispatcher.submit(&route, payload, ctx, fail_when_missing).await {
            tracing::warn!(route = %route, error = %e, "Dispatch failed");
        }
    }
}
