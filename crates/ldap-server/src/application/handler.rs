//! The request handler seam.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::request::RequestContext;
use crate::application::response::ResponseSink;

/// Serves one LDAP request.
///
/// The server calls `serve` once per request, each call on its own task, so
/// a handler may run concurrently with other requests of the same session.
/// Responses go through `sink`; sending nothing leaves the client without a
/// reply for that message identifier.
///
/// Cancellation is cooperative.  Long-running handlers should watch
/// [`RequestContext::cancelled`] and stop producing output once it fires;
/// session teardown waits for every handler to return regardless.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, sink: ResponseSink, request: Arc<RequestContext>);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn serve(&self, sink: ResponseSink, request: Arc<RequestContext>) {
        (**self).serve(sink, request).await;
    }
}

/// A [`Handler`] backed by an async closure.  Built with [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ResponseSink, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(ResponseSink, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn serve(&self, sink: ResponseSink, request: Arc<RequestContext>) {
        (self.f)(sink, request).await;
    }
}
