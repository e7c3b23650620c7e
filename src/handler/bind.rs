//! Uniform call shape for every handler kind.
//!
//! Registration turns each handler into a [`Binding`]. Sync handlers complete
//! immediately (`std::future::ready`), so the dispatcher only ever awaits a
//! [`BoxFuture`] and never branches on the handler's shape.

use std::future::{ready, Future};
use std::sync::Arc;

use bytes::Bytes;

use super::traits::{AsyncHandler, AsyncPayloadHandler, Handler, Payload, PayloadHandler};
use super::{BoxFuture, Context, HandlerInstance, HandlerResult};
use crate::codec::Codec;
use crate::error::{HubwireError, Result};
use crate::routing::{DelegateId, TypeTag};

/// Resolved, directly callable handler.
pub(crate) type Thunk =
    Arc<dyn Fn(Context, Option<Bytes>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Type-based handler call, given an instance from the factory.
pub(crate) type ClassThunk = Arc<
    dyn Fn(HandlerInstance, Context, Option<Bytes>) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;

/// How a schema entry is invoked.
#[derive(Clone)]
pub(crate) enum Binding {
    /// Needs an instance of `handler` from the factory.
    Class { handler: TypeTag, call: ClassThunk },
    /// Inline function, already callable.
    Delegate { id: DelegateId, call: Thunk },
}

/// Decode a payload, mapping "no data" to `P::default()`.
pub(crate) fn decode_payload<P: Payload>(codec: Codec, payload: Option<Bytes>) -> Result<P> {
    match payload {
        Some(bytes) if !bytes.is_empty() => codec.decode(&bytes),
        _ => Ok(P::default()),
    }
}

fn downcast<H: Send + Sync + 'static>(instance: HandlerInstance) -> Result<Arc<H>> {
    instance
        .downcast::<H>()
        .map_err(|_| HubwireError::HandlerTypeMismatch(std::any::type_name::<H>()))
}

impl Binding {
    pub(crate) fn sync_class<H: Handler>() -> Self {
        let call = |instance: HandlerInstance,
                    ctx: Context,
                    _payload: Option<Bytes>|
         -> BoxFuture<'static, HandlerResult> {
            let result = downcast::<H>(instance).and_then(|h| Handler::handle(&*h, ctx));
            Box::pin(ready(result))
        };
        Binding::Class {
            handler: TypeTag::of::<H>(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn sync_class_with<P: Payload, H: PayloadHandler<P>>() -> Self {
        let call = |instance: HandlerInstance,
                    ctx: Context,
                    payload: Option<Bytes>|
         -> BoxFuture<'static, HandlerResult> {
            let result = downcast::<H>(instance).and_then(|h| {
                let payload = decode_payload::<P>(ctx.codec(), payload)?;
                PayloadHandler::handle(&*h, ctx, payload)
            });
            Box::pin(ready(result))
        };
        Binding::Class {
            handler: TypeTag::of::<H>(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn async_class<H: AsyncHandler>() -> Self {
        let call = |instance: HandlerInstance,
                    ctx: Context,
                    _payload: Option<Bytes>|
         -> BoxFuture<'static, HandlerResult> {
            Box::pin(async move {
                let handler = downcast::<H>(instance)?;
                AsyncHandler::handle(&*handler, ctx).await
            })
        };
        Binding::Class {
            handler: TypeTag::of::<H>(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn async_class_with<P: Payload, H: AsyncPayloadHandler<P>>() -> Self {
        let call = |instance: HandlerInstance,
                    ctx: Context,
                    payload: Option<Bytes>|
         -> BoxFuture<'static, HandlerResult> {
            Box::pin(async move {
                let handler = downcast::<H>(instance)?;
                let payload = decode_payload::<P>(ctx.codec(), payload)?;
                AsyncPayloadHandler::handle(&*handler, ctx, payload).await
            })
        };
        Binding::Class {
            handler: TypeTag::of::<H>(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn sync_fn<F>(f: F) -> Self
    where
        F: Fn(Context) -> HandlerResult + Send + Sync + 'static,
    {
        let call = move |ctx: Context, _payload: Option<Bytes>| -> BoxFuture<'static, HandlerResult> {
            Box::pin(ready(f(ctx)))
        };
        Binding::Delegate {
            id: DelegateId::next(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn sync_fn_with<P, F>(f: F) -> Self
    where
        P: Payload,
        F: Fn(Context, P) -> HandlerResult + Send + Sync + 'static,
    {
        let call = move |ctx: Context, payload: Option<Bytes>| -> BoxFuture<'static, HandlerResult> {
            let result = decode_payload::<P>(ctx.codec(), payload).and_then(|p| f(ctx, p));
            Box::pin(ready(result))
        };
        Binding::Delegate {
            id: DelegateId::next(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let call = move |ctx: Context, _payload: Option<Bytes>| -> BoxFuture<'static, HandlerResult> {
            Box::pin(f(ctx))
        };
        Binding::Delegate {
            id: DelegateId::next(),
            call: Arc::new(call),
        }
    }

    pub(crate) fn async_fn_with<P, F, Fut>(f: F) -> Self
    where
        P: Payload,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let call = move |ctx: Context, payload: Option<Bytes>| -> BoxFuture<'static, HandlerResult> {
            match decode_payload::<P>(ctx.codec(), payload) {
                Ok(payload) => Box::pin(f(ctx, payload)),
                Err(e) => Box::pin(ready(Err(e))),
            }
        };
        Binding::Delegate {
            id: DelegateId::next(),
            call: Arc::new(call),
        }
    }
}
