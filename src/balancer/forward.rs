use futures::future::{BoxFuture, FutureExt};
use http::{
    header::{self, HeaderName},
    uri::{PathAndQuery, Scheme},
    HeaderMap, HeaderValue, Request, Response, Uri,
};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

use crate::handler::{ClientInfo, ProxyBody};

#[derive(Debug, Error)]
pub(crate) enum ForwardError {
    #[error("unsupported backend scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid backend uri: {0}")]
    InvalidUri(#[from] http::Error),
    #[error("backend request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
}

/// Sends a request to a concrete backend.
pub(crate) trait Forward: Send + Sync {
    fn forward(
        &self,
        target: &Url,
        req: Request<ProxyBody>,
    ) -> BoxFuture<'static, Result<Response<ProxyBody>, ForwardError>>;
}

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// HTTP/1.1 forwarder backed by a pooling client.
#[derive(Clone)]
pub(crate) struct HttpForwarder {
    client: Client<HttpConnector, ProxyBody>,
}

impl HttpForwarder {
    pub(crate) fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Forward for HttpForwarder {
    fn forward(
        &self,
        target: &Url,
        req: Request<ProxyBody>,
    ) -> BoxFuture<'static, Result<Response<ProxyBody>, ForwardError>> {
        let outgoing = rewrite_request(target, req);
        let client = self.client.clone();

        async move {
            let response = client.request(outgoing?).await?;
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);

            Ok(Response::from_parts(parts, body.boxed()))
        }
        .boxed()
    }
}

/// Points `req` at `target` and applies proxy header rules.
pub(crate) fn rewrite_request(
    target: &Url,
    req: Request<ProxyBody>,
) -> Result<Request<ProxyBody>, ForwardError> {
    if target.scheme() != "http" {
        return Err(ForwardError::UnsupportedScheme(target.scheme().to_string()));
    }

    let (mut parts, body) = req.into_parts();

    let original_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        });
    let client = parts.extensions.get::<ClientInfo>().copied();

    let authority = match target.port() {
        Some(port) => format!("{}:{}", target.host_str().unwrap_or_default(), port),
        None => target.host_str().unwrap_or_default().to_string(),
    };

    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority.as_str())
        .path_and_query(join_path(target, &parts.uri))
        .build()?;

    strip_hop_by_hop(&mut parts.headers);

    if let Ok(host) = HeaderValue::from_str(&authority) {
        parts.headers.insert(header::HOST, host);
    }
    if let Some(host) = original_host {
        parts.headers.insert(X_FORWARDED_HOST, host);
    }
    if let Some(client) = client {
        append_forwarded_for(&mut parts.headers, &client);
        let proto = if client.tls { "https" } else { "http" };
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
    }

    Ok(Request::from_parts(parts, body))
}

fn join_path(target: &Url, uri: &Uri) -> PathAndQuery {
    let base = target.path().trim_end_matches('/');
    let path = uri.path();

    let joined = match uri.query() {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    };

    PathAndQuery::try_from(joined).unwrap_or_else(|_| PathAndQuery::from_static("/"))
}

fn append_forwarded_for(headers: &mut HeaderMap, client: &ClientInfo) {
    let ip = client.addr.ip().to_string();

    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
