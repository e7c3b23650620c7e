//! Dispatch engine.
//!
//! Looks a route up in the [`HandlerTable`] and runs its thunk, either inline
//! ([`Dispatcher::dispatch`]) or on a worker task ([`Dispatcher::submit`]).
//! Workers are bounded by a semaphore: when all permits are taken, `submit`
//! waits, which pushes back on whoever feeds it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{HubwireError, Result};
use crate::handler::{Context, HandlerResult, HandlerTable};

/// Routes inbound messages to handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<HandlerTable>,
    limiter: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_concurrent` handlers at once.
    pub fn new(table: HandlerTable, max_concurrent: usize) -> Self {
        Self {
            table: Arc::new(table),
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// The resolved routes.
    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    /// Worker permits currently free.
    pub fn available_workers(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Run the handler for `route` to completion on the current task.
    ///
    /// An unknown route is [`HubwireError::RouteNotFound`] when
    /// `fail_when_missing` is set and a silent no-op otherwise.
    pub async fn dispatch(
        &self,
        route: &str,
        payload: Option<Bytes>,
        ctx: Context,
        fail_when_missing: bool,
    ) -> HandlerResult {
        match self.table.get(route) {
            Some(thunk) => thunk(ctx, payload).await,
            None => missing(route, fail_when_missing),
        }
    }

    /// Run the handler for `route` on its own task.
    ///
    /// The lookup happens immediately; decoding and the handler body run on
    /// the spawned task. Returns `Ok(None)` for an ignored unknown route.
    /// Handler failures are logged by the task and also returned through the
    /// join handle.
    pub async fn submit(
        &self,
        route: &str,
        payload: Option<Bytes>,
        ctx: Context,
        fail_when_missing: bool,
    ) -> Result<Option<JoinHandle<HandlerResult>>> {
        let thunk = match self.table.get(route) {
            Some(thunk) => thunk.clone(),
            None => return missing(route, fail_when_missing).map(|()| None),
        };

        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HubwireError::NotStarted)?;

        let route = route.to_string();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let remote = ctx.remote_address();
            let result = thunk(ctx, payload).await;
            if let Err(e) = &result {
                tracing::error!(route = %route, %remote, error = %e, "Handler failed");
            }
            result
        });

        Ok(Some(task))
    }
}

fn missing(route: &str, fail_when_missing: bool) -> Result<()> {
    if fail_when_missing {
        Err(HubwireError::RouteNotFound(route.to_string()))
    } else {
        tracing::trace!(route, "No handler, message ignored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::config::DuplicateRoutePolicy;
    use crate::handler::{HandlerFactory, HandlerInstances};
    use crate::routing::SchemaBuilder;
    use crate::transport::{ConnectionHandle, MemoryNetwork, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context() -> Context {
        let transport: Arc<dyn Transport> = Arc::new(MemoryNetwork::new().endpoint());
        let conn = ConnectionHandle::new("127.0.0.1:4000".parse().unwrap());
        Context::new(conn, transport, Codec::MsgPack)
    }

    fn dispatcher(builder: SchemaBuilder, max_concurrent: usize) -> Dispatcher {
        let schema = builder.build().unwrap();
        let factory: Arc<dyn HandlerFactory> = Arc::new(HandlerInstances::new());
        let table = HandlerTable::resolve(&schema, factory, DuplicateRoutePolicy::Reject).unwrap();
        Dispatcher::new(table, max_concurrent)
    }

    #[tokio::test]
    async fn test_missing_route_policy() {
        let d = dispatcher(SchemaBuilder::new(), 4);

        let err = d.dispatch("nope", None, context(), true).await.unwrap_err();
        assert!(matches!(err, HubwireError::RouteNotFound(r) if r == "nope"));
        assert!(d.dispatch("nope", None, context(), false).await.is_ok());

        assert!(d.submit("nope", None, context(), true).await.is_err());
        assert!(d.submit("nope", None, context(), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_typed_payload_inline() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let d = dispatcher(
            SchemaBuilder::new().route_fn_with("add", move |_ctx, n: usize| {
                sink.fetch_add(n, Ordering::SeqCst);
                Ok(())
            }),
            4,
        );

        let payload = Bytes::from(Codec::MsgPack.encode(&5usize).unwrap());
        d.dispatch("add", Some(payload), context(), true).await.unwrap();
        d.dispatch("add", None, context(), true).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_submit_returns_handler_result() {
        let d = dispatcher(
            SchemaBuilder::new().async_route_fn("fail", |_ctx| async {
                Err(HubwireError::handler("boom"))
            }),
            4,
        );

        let task = d.submit("fail", None, context(), true).await.unwrap().unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HubwireError::Handler(m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_submit_bounded_by_permits() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let d = dispatcher(
            SchemaBuilder::new().async_route_fn("slow", move |_ctx| {
                let mut release = release_rx.clone();
                async move {
                    let _ = release.wait_for(|go| *go).await;
                    Ok(())
                }
            }),
            1,
        );

        let first = d.submit("slow", None, context(), true).await.unwrap().unwrap();
        assert_eq!(d.available_workers(), 0);

        // The second submit waits for the first handler's permit.
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            d.submit("slow", None, context(), true),
        )
        .await;
        assert!(second.is_err());

        release_tx.send(true).unwrap();
        first.await.unwrap().unwrap();

        let third = d.submit("slow", None, context(), true).await.unwrap().unwrap();
        third.await.unwrap().unwrap();
    }
}
