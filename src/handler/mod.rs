pub(crate) mod entry;

use std::{net::SocketAddr, sync::Arc};
#[cfg(test)]
use std::future::Future;

use bytes::Bytes;
use futures::future::BoxFuture;
#[cfg(test)]
use futures::future::FutureExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};

pub(crate) use entry::EntryHandler;

/// Body type used on both sides of the proxy.
pub(crate) type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// A request handler. Middleware wraps one; the load balancer terminates the chain.
pub(crate) trait Handler: Send + Sync {
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>>;
}

pub(crate) type SharedHandler = Arc<dyn Handler>;

#[cfg(test)]
struct FnHandler<F>(F);

#[cfg(test)]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request<ProxyBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<ProxyBody>> + Send + 'static,
{
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>> {
        (self.0)(req).boxed()
    }
}

#[cfg(test)]
pub(crate) fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Request<ProxyBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<ProxyBody>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Connection facts the listener attaches to every request it accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientInfo {
    pub(crate) addr: SocketAddr,
    pub(crate) tls: bool,
}

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty() -> ProxyBody {
    full(Bytes::new())
}

pub(crate) fn text_response(status: StatusCode, message: impl Into<String>) -> Response<ProxyBody> {
    let mut response = Response::new(full(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub(crate) fn json_response(status: StatusCode, body: Vec<u8>) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
