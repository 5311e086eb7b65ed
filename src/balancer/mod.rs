//! Backend pools, the rules that select them, and request dispatch.

pub(crate) mod forward;
pub(crate) mod pool;
pub(crate) mod rule;

use std::{collections::HashMap, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::HostConfig,
    handler::{text_response, Handler, ProxyBody},
    routing::RuleError,
};

pub(crate) use forward::{Forward, ForwardError, HttpForwarder};
pub(crate) use rule::LbRule;

use pool::Pool;
use rule::LbRuleSet;

#[derive(Debug, Error)]
pub(crate) enum BalancerError {
    #[error("no matching loadbalancer rule")]
    NoMatchingRule,
    #[error(transparent)]
    Rule(RuleError),
    #[error("loadbalancer does not exist")]
    PoolNotFound(String),
    #[error("no available backend")]
    NoAvailableBackend(String),
    #[error("invalid endpoint url `{url}`: {reason}")]
    InvalidEndpointUrl { url: String, reason: String },
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl From<RuleError> for BalancerError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NoMatch => BalancerError::NoMatchingRule,
            other => BalancerError::Rule(other),
        }
    }
}

impl BalancerError {
    fn status(&self) -> StatusCode {
        match self {
            BalancerError::NoMatchingRule => StatusCode::NOT_FOUND,
            BalancerError::Rule(_) | BalancerError::InvalidEndpointUrl { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BalancerError::PoolNotFound(_)
            | BalancerError::NoAvailableBackend(_)
            | BalancerError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Default)]
struct Pools {
    pools: HashMap<String, Pool>,
    /// Endpoint ID to the pool currently holding it.
    hosts: HashMap<String, String>,
}

/// Pool membership as reported to the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PoolListing {
    pub(crate) name: String,
    pub(crate) hosts: Vec<HostConfig>,
}

/// Owns the load-balancer rules and pools and terminates every middleware chain.
#[derive(Clone)]
pub(crate) struct PoolManager {
    rules: Arc<RwLock<LbRuleSet>>,
    pools: Arc<RwLock<Pools>>,
    forwarder: Arc<dyn Forward>,
}

impl PoolManager {
    pub(crate) fn new(forwarder: Arc<dyn Forward>) -> Self {
        Self {
            rules: Arc::default(),
            pools: Arc::default(),
            forwarder,
        }
    }

    pub(crate) async fn upsert_rule(&self, rule: LbRule) -> Result<(), BalancerError> {
        Ok(self.rules.write().await.upsert(rule)?)
    }

    pub(crate) async fn remove_rule(&self, id: &str) -> Result<LbRule, BalancerError> {
        Ok(self.rules.write().await.remove(id)?)
    }

    pub(crate) async fn rules(&self) -> Vec<LbRule> {
        self.rules.read().await.rules()
    }

    pub(crate) async fn upsert_endpoint(&self, host: &HostConfig) -> Result<(), BalancerError> {
        let url = parse_endpoint_url(&host.url)?;

        let mut guard = self.pools.write().await;
        let Pools { pools, hosts } = &mut *guard;

        if let Some(previous) = hosts.get(&host.id) {
            if *previous != host.loadbalancer {
                debug!(id = %host.id, from = %previous, to = %host.loadbalancer, "Moving endpoint");
                if let Some(pool) = pools.get_mut(previous) {
                    pool.remove(&host.id);
                }
            }
        }

        pools
            .entry(host.loadbalancer.clone())
            .or_default()
            .upsert(&host.id, url);
        hosts.insert(host.id.clone(), host.loadbalancer.clone());

        Ok(())
    }

    /// Removes the endpoint `id`. Returns `false` when there was nothing to remove.
    ///
    /// A non-empty `loadbalancer` that differs from the pool currently holding `id` marks
    /// a stale delete, which is ignored.
    pub(crate) async fn remove_endpoint(&self, id: &str, loadbalancer: &str) -> bool {
        let mut guard = self.pools.write().await;
        let Pools { pools, hosts } = &mut *guard;

        let Some(current) = hosts.get(id) else {
            return false;
        };

        if !loadbalancer.is_empty() && current != loadbalancer {
            warn!(%id, pool = %loadbalancer, current = %current, "Ignoring stale endpoint delete");
            return false;
        }

        if let Some(pool) = pools.get_mut(current) {
            pool.remove(id);
        }
        hosts.remove(id);

        true
    }

    /// Current membership, pools and hosts ordered by name.
    pub(crate) async fn pools(&self) -> Vec<PoolListing> {
        let guard = self.pools.read().await;

        guard
            .pools
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, pool)| PoolListing {
                name: name.clone(),
                hosts: pool
                    .endpoints()
                    .iter()
                    .map(|endpoint| HostConfig {
                        id: endpoint.id.clone(),
                        loadbalancer: name.clone(),
                        url: endpoint.url.to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Resolves the pool for `req` and picks its next endpoint.
    pub(crate) async fn select<B>(&self, req: &Request<B>) -> Result<Url, BalancerError> {
        let pool_name = self.rules.read().await.resolve(req)?;

        let guard = self.pools.read().await;
        let pool = guard
            .pools
            .get(&pool_name)
            .ok_or_else(|| BalancerError::PoolNotFound(pool_name.clone()))?;

        pool.next()
            .map(|endpoint| endpoint.url.clone())
            .ok_or(BalancerError::NoAvailableBackend(pool_name))
    }

    pub(crate) async fn dispatch(
        &self,
        req: Request<ProxyBody>,
    ) -> Result<Response<ProxyBody>, BalancerError> {
        let target = self.select(&req).await?;

        debug!(%target, uri = %req.uri(), "Forwarding request");

        Ok(self.forwarder.forward(&target, req).await?)
    }
}

impl Handler for PoolManager {
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>> {
        let manager = self.clone();

        async move {
            match manager.dispatch(req).await {
                Ok(response) => response,
                Err(err) => {
                    debug!(%err, "Dispatch failed");
                    text_response(err.status(), err.to_string())
                }
            }
        }
        .boxed()
    }
}

/// Parses a backend URL the forwarder can reach: an `http` URL with a host.
pub(crate) fn parse_endpoint_url(raw: &str) -> Result<Url, BalancerError> {
    let invalid = |reason: String| BalancerError::InvalidEndpointUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}
