use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    balancer::{BalancerError, PoolManager},
    config::{Action, CryptoError},
    middleware::{MiddlewareError, MiddlewareManager},
    server::{HttpsState, Server, ServerError},
    source::ActionReceiver,
    tls::{CertError, CertificateStore},
};

#[derive(Debug, Error)]
pub(crate) enum ReconcileError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
    #[error(transparent)]
    Certificate(#[from] CertError),
    #[error("failed to open sealed certificate: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Applies configuration actions, one at a time, to the live components.
pub(crate) struct Reconciler {
    pools: PoolManager,
    middleware: MiddlewareManager,
    certificates: Arc<CertificateStore>,
    server: Arc<Server>,
    password: String,
}

impl Reconciler {
    pub(crate) fn new(
        pools: PoolManager,
        middleware: MiddlewareManager,
        certificates: Arc<CertificateStore>,
        server: Arc<Server>,
        password: String,
    ) -> Self {
        Self {
            pools,
            middleware,
            certificates,
            server,
            password,
        }
    }

    /// Consumes `actions` until every sender is gone. Failed actions are logged and
    /// skipped.
    pub(crate) async fn run(self, mut actions: ActionReceiver) {
        while let Some(action) = actions.recv().await {
            let kind = action.kind();
            let id = action.id().to_string();

            match self.apply(action).await {
                Ok(()) => debug!(kind, %id, "Applied action"),
                Err(err) => warn!(kind, %id, %err, "Failed to apply action"),
            }
        }

        info!("Action queue closed, reconciler stopped");
    }

    pub(crate) async fn apply(&self, action: Action) -> Result<(), ReconcileError> {
        match action {
            Action::UpsertLbRule(rule) => self.pools.upsert_rule(rule).await?,
            Action::DeleteLbRule { id } => {
                self.pools.remove_rule(&id).await?;
            }
            Action::UpsertMwRule(rule) => self.middleware.upsert_rule(rule).await?,
            Action::DeleteMwRule { id } => {
                self.middleware.remove_rule(&id).await?;
            }
            Action::UpsertHost(host) => self.pools.upsert_endpoint(&host).await?,
            Action::DeleteHost { id, loadbalancer } => {
                if !self.pools.remove_endpoint(&id, &loadbalancer).await {
                    debug!(%id, "No endpoint to remove");
                }
            }
            Action::UpsertCert(sealed) => {
                let cert = sealed.open(&self.password)?;
                self.certificates.put(&cert).await?;
                self.restart_https().await?;
            }
            Action::DeleteCert { id } => match self.certificates.delete(&id).await {
                Ok(()) => self.restart_https().await?,
                Err(CertError::CertificateNotFound(_)) => debug!(%id, "No certificate to remove"),
                Err(err) => return Err(err.into()),
            },
        }

        Ok(())
    }

    async fn restart_https(&self) -> Result<(), ServerError> {
        match self.server.restart_https().await? {
            HttpsState::Running { addr, certificates } => {
                info!(%addr, certificates, "HTTPS listener restarted")
            }
            HttpsState::Stopped => info!("HTTPS listener stopped: no certificate available"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::{
        balancer::{
            tests::{body_text, request, RecordingForwarder},
            LbRule,
        },
        config::HostConfig,
        handler::{EntryHandler, Handler, SharedHandler},
        middleware::{MiddlewareBinding, MwRule, Registry},
        source::channel,
        tls::store::tests::generate,
    };

    struct Fixture {
        pools: PoolManager,
        entry: EntryHandler,
        certificates: Arc<CertificateStore>,
        server: Arc<Server>,
        forwarder: Arc<RecordingForwarder>,
    }

    fn fixture() -> (Fixture, Reconciler) {
        let forwarder = Arc::new(RecordingForwarder::default());
        let pools = PoolManager::new(forwarder.clone());
        let middleware = MiddlewareManager::new(Arc::new(Registry::default()));
        let certificates = Arc::new(CertificateStore::default());
        let entry = EntryHandler::new(middleware.clone(), Arc::new(pools.clone()));
        let any = "127.0.0.1:0".parse().unwrap();
        let server = Arc::new(Server::new(
            any,
            any,
            Arc::new(entry.clone()) as SharedHandler,
            certificates.clone(),
        ));

        let reconciler = Reconciler::new(
            pools.clone(),
            middleware,
            certificates.clone(),
            server.clone(),
            "pw".to_string(),
        );

        let fixture = Fixture {
            pools,
            entry,
            certificates,
            server,
            forwarder,
        };
        (fixture, reconciler)
    }

    async fn run_all(reconciler: Reconciler, actions: Vec<Action>) {
        let (tx, rx) = channel(2);
        let task = tokio::spawn(reconciler.run(rx));
        for action in actions {
            tx.send(action).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();
    }

    fn lb_rule() -> Action {
        Action::UpsertLbRule(LbRule {
            id: "r1".to_string(),
            route: r#"Host("a.test")"#.to_string(),
            target: "pool1".to_string(),
        })
    }

    fn upsert_host() -> Action {
        Action::UpsertHost(HostConfig {
            id: "h1".to_string(),
            loadbalancer: "pool1".to_string(),
            url: "http://10.0.0.1:8080".to_string(),
        })
    }

    #[tokio::test]
    async fn routes_then_drains_endpoint() {
        let (fixture, reconciler) = fixture();

        run_all(
            reconciler,
            vec![
                lb_rule(),
                upsert_host(),
                Action::DeleteHost {
                    id: "h1".to_string(),
                    loadbalancer: "pool1".to_string(),
                },
                // Unknown IDs are no-ops.
                Action::DeleteHost {
                    id: "h9".to_string(),
                    loadbalancer: String::new(),
                },
                Action::DeleteCert {
                    id: "c9".to_string(),
                },
            ],
        )
        .await;

        let response = fixture.entry.handle(request("a.test")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "no available backend");
        assert!(fixture.forwarder.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_action_does_not_stop_the_stream() {
        let (fixture, reconciler) = fixture();

        run_all(
            reconciler,
            vec![
                Action::UpsertLbRule(LbRule {
                    id: "bad".to_string(),
                    route: "Host(".to_string(),
                    target: "pool1".to_string(),
                }),
                Action::DeleteLbRule {
                    id: "missing".to_string(),
                },
                lb_rule(),
                upsert_host(),
            ],
        )
        .await;

        let response = fixture.entry.handle(request("a.test")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fixture.pools.rules().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_middleware_leaves_pools_untouched() {
        let (fixture, reconciler) = fixture();

        run_all(
            reconciler,
            vec![
                lb_rule(),
                upsert_host(),
                Action::UpsertMwRule(MwRule {
                    id: "m1".to_string(),
                    route: r#"Host("a.test")"#.to_string(),
                    middlewares: vec![MiddlewareBinding {
                        id: "trace".to_string(),
                        opts: serde_json::Value::Null,
                    }],
                }),
            ],
        )
        .await;

        let response = fixture.entry.handle(request("a.test")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fixture.pools.pools().await[0].hosts.len(), 1);
    }

    #[tokio::test]
    async fn certificate_changes_restart_https() {
        let (fixture, reconciler) = fixture();
        let cert = generate("c1", &["a.test"]);

        reconciler
            .apply(Action::UpsertCert(cert.seal("pw")))
            .await
            .unwrap();
        assert_eq!(fixture.certificates.active_certificates().len(), 1);
        assert!(fixture.server.https_addr().await.is_some());

        reconciler
            .apply(Action::DeleteCert {
                id: "c1".to_string(),
            })
            .await
            .unwrap();
        assert!(fixture.certificates.active_certificates().is_empty());
        assert!(fixture.server.https_addr().await.is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_as_key_pair() {
        let (fixture, reconciler) = fixture();
        let cert = generate("c1", &["a.test"]);

        let err = reconciler
            .apply(Action::UpsertCert(cert.seal("other")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Certificate(CertError::InvalidKeyPair { .. })
        ));
        assert!(fixture.server.https_addr().await.is_none());
    }
}
