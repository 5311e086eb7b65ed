use futures::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use tracing::error;

use super::{text_response, Handler, ProxyBody, SharedHandler};
use crate::middleware::MiddlewareManager;

/// Top-level request handler: builds the middleware chain for each request and runs it
/// down to the terminal handler.
#[derive(Clone)]
pub(crate) struct EntryHandler {
    middleware: MiddlewareManager,
    terminal: SharedHandler,
}

impl EntryHandler {
    pub(crate) fn new(middleware: MiddlewareManager, terminal: SharedHandler) -> Self {
        Self {
            middleware,
            terminal,
        }
    }
}

impl Handler for EntryHandler {
    fn handle(&self, req: Request<ProxyBody>) -> BoxFuture<'static, Response<ProxyBody>> {
        let middleware = self.middleware.clone();
        let terminal = self.terminal.clone();

        async move {
            match middleware.build_chain(&req, terminal).await {
                Ok(chain) => chain.handle(req).await,
                Err(err) => {
                    error!(%err, uri = %req.uri(), "Failed to build middleware chain");
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::{
        balancer::{
            tests::{body_text, request, RecordingForwarder},
            LbRule, PoolManager,
        },
        config::HostConfig,
        middleware::{builtin, MiddlewareBinding, MwRule, Registry},
    };

    async fn pool_manager() -> (PoolManager, Arc<RecordingForwarder>) {
        let forwarder = Arc::new(RecordingForwarder::default());
        let manager = PoolManager::new(forwarder.clone());
        manager
            .upsert_rule(LbRule {
                id: "r1".to_string(),
                route: r#"Host("a.test")"#.to_string(),
                target: "pool1".to_string(),
            })
            .await
            .unwrap();
        manager
            .upsert_endpoint(&HostConfig {
                id: "h1".to_string(),
                loadbalancer: "pool1".to_string(),
                url: "http://10.0.0.1:8080".to_string(),
            })
            .await
            .unwrap();
        (manager, forwarder)
    }

    fn trace_rule() -> MwRule {
        MwRule {
            id: "m1".to_string(),
            route: r#"Host("a.test")"#.to_string(),
            middlewares: vec![MiddlewareBinding {
                id: "trace".to_string(),
                opts: Value::Null,
            }],
        }
    }

    #[tokio::test]
    async fn unregistered_middleware_fails_request_only() {
        let (pools, forwarder) = pool_manager().await;
        let middleware = MiddlewareManager::new(Arc::new(Registry::default()));
        middleware.upsert_rule(trace_rule()).await.unwrap();
        let entry = EntryHandler::new(middleware, Arc::new(pools.clone()));

        let response = entry.handle(request("a.test")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "no middleware type 'trace'");
        assert!(forwarder.targets.lock().unwrap().is_empty());
        assert_eq!(pools.pools().await[0].hosts.len(), 1);
        assert_eq!(pools.rules().await.len(), 1);
    }

    #[tokio::test]
    async fn registered_chain_reaches_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (pools, forwarder) = pool_manager().await;
        let mut registry = Registry::default();
        builtin::register_all(&mut registry);
        let middleware = MiddlewareManager::new(Arc::new(registry));
        let mut rule = trace_rule();
        rule.middlewares[0].opts = serde_json::json!({ "Output": dir.path().join("trace.log") });
        middleware.upsert_rule(rule).await.unwrap();
        let entry = EntryHandler::new(middleware, Arc::new(pools));

        let response = entry.handle(request("a.test")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            forwarder.targets.lock().unwrap().as_slice(),
            ["http://10.0.0.1:8080/"]
        );
    }
}
