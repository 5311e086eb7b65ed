use std::{str::FromStr, sync::Arc};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    balancer::{parse_endpoint_url, LbRule, PoolListing, PoolManager},
    config::{CertConfig, HostConfig},
    handler::{empty, json_response, text_response, Handler, ProxyBody},
    middleware::{MiddlewareBinding, MiddlewareManager, MwRule},
    routing::expr::Expr,
    source::{ConfigStore, StoreError},
};

const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound | ApiError::Store(StoreError::EntityNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) | ApiError::Store(StoreError::Wire(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Store(StoreError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// What the proxy is currently applying, as opposed to what the store holds.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LiveState {
    lbrules: Vec<LbRule>,
    mwrules: Vec<MwRule>,
    pools: Vec<PoolListing>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LbRuleBody {
    route: String,
    target: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MwRuleBody {
    route: String,
    #[serde(default)]
    middlewares: Vec<MiddlewareBinding>,
}

#[derive(Deserialize)]
struct HostBody {
    #[serde(rename = "URL")]
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertBody {
    cert_pem: String,
    key_pem: String,
    password: String,
}

/// JSON management API over the configuration store.
#[derive(Clone)]
pub(crate) struct ControlApi {
    store: Arc<ConfigStore>,
    pools: PoolManager,
    middleware: MiddlewareManager,
}

impl ControlApi {
    pub(crate) fn new(
        store: Arc<ConfigStore>,
        pools: PoolManager,
        middleware: MiddlewareManager,
    ) -> Self {
        Self {
            store,
            pools,
            middleware,
        }
    }

    async fn route(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ApiError> {
        let method = req.method().clone();
        let path = req.uri().path().trim_matches('/').to_string();
        let segments: Vec<&str> = path.split('/').collect();

        match (method, segments.as_slice()) {
            (Method::GET, ["state"]) => ok_json(&LiveState {
                lbrules: self.pools.rules().await,
                mwrules: self.middleware.rules().await,
                pools: self.pools.pools().await,
            }),

            (Method::GET, ["lbrules"]) => ok_json(&self.store.lb_rules().await),
            (Method::PUT, ["lbrules", id]) => {
                let body: LbRuleBody = read_json(req).await?;
                validate_route(&body.route)?;
                let rule = LbRule {
                    id: id.to_string(),
                    route: body.route,
                    target: body.target,
                };
                self.store.put_lb_rule(&rule).await?;
                info!(id = %rule.id, "Stored loadbalancer rule");
                Ok(no_content())
            }
            (Method::DELETE, ["lbrules", id]) => {
                self.store.delete_lb_rule(id).await?;
                Ok(no_content())
            }

            (Method::GET, ["mwrules"]) => ok_json(&self.store.mw_rules().await),
            (Method::PUT, ["mwrules", id]) => {
                let body: MwRuleBody = read_json(req).await?;
                validate_route(&body.route)?;
                let rule = MwRule {
                    id: id.to_string(),
                    route: body.route,
                    middlewares: body.middlewares,
                };
                self.store.put_mw_rule(&rule).await?;
                info!(id = %rule.id, "Stored middleware rule");
                Ok(no_content())
            }
            (Method::DELETE, ["mwrules", id]) => {
                self.store.delete_mw_rule(id).await?;
                Ok(no_content())
            }

            (Method::GET, ["hosts"]) => ok_json(&self.store.hosts().await),
            (Method::PUT, ["loadbalancer", pool, "hosts", id]) => {
                let body: HostBody = read_json(req).await?;
                parse_endpoint_url(&body.url)
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                let host = HostConfig {
                    id: id.to_string(),
                    loadbalancer: pool.to_string(),
                    url: body.url,
                };
                self.store.put_host(&host).await?;
                info!(id = %host.id, pool = %host.loadbalancer, "Stored host");
                Ok(no_content())
            }
            (Method::DELETE, ["loadbalancer", pool, "hosts", id]) => {
                self.store.delete_host(pool, id).await?;
                Ok(no_content())
            }

            (Method::GET, ["certs"]) => ok_json(&self.store.cert_ids().await),
            (Method::PUT, ["certs", id]) => {
                let body: CertBody = read_json(req).await?;
                let cert = CertConfig {
                    id: id.to_string(),
                    cert_pem: body.cert_pem,
                    key_pem: body.key_pem,
                };
                self.store.put_cert(&cert.seal(&body.password)).await?;
                info!(id = %cert.id, "Stored certificate");
                Ok(no_content())
            }
            (Method::DELETE, ["certs", id]) => {
                self.store.delete_cert(id).await?;
                Ok(no_content())
            }

            (_, ["state" | "lbrules" | "mwrules" | "hosts" | "certs"])
            | (_, ["lbrules" | "mwrules" | "certs", _])
            | (_, ["loadbalancer", _, "hosts", _]) => Err(ApiError::MethodNotAllowed),
            _ => Err(ApiError::NotFound),
        }
    }
}

impl Handler for ControlApi {
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>> {
        let api = self.clone();

        async move {
            let method = req.method().clone();
            let uri = req.uri().clone();

            match api.route(req).await {
                Ok(response) => response,
                Err(err) => {
                    debug!(%method, %uri, %err, "Control request failed");
                    text_response(err.status(), err.to_string())
                }
            }
        }
        .boxed()
    }
}

fn validate_route(route: &str) -> Result<(), ApiError> {
    Expr::from_str(route)
        .map(|_| ())
        .map_err(|err| ApiError::BadRequest(format!("invalid route: {err}")))
}

async fn read_json<T: DeserializeOwned>(req: Request<ProxyBody>) -> Result<T, ApiError> {
    let bytes: Bytes = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|err| ApiError::BadRequest(format!("unreadable body: {err}")))?
        .to_bytes();

    serde_json::from_slice(&bytes).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn ok_json<T: Serialize>(value: &T) -> Result<Response<ProxyBody>, ApiError> {
    let body = serde_json::to_vec(value).map_err(StoreError::Encode)?;
    Ok(json_response(StatusCode::OK, body))
}

fn no_content() -> Response<ProxyBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}
