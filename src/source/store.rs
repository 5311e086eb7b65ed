use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    wire::{Entity, Layout, WireError},
    ActionSender,
};
use crate::{
    balancer::LbRule,
    config::{Action, CertConfig, HostConfig},
    middleware::MwRule,
};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    #[error("action queue is closed")]
    Closed,
}

/// In-memory key/value configuration store.
///
/// Every mutation is turned into the action a watcher of the same keys would see and
/// queued before the store lock is released, so the queue order is the mutation order.
pub(crate) struct ConfigStore {
    layout: Layout,
    entries: Mutex<BTreeMap<String, String>>,
    actions: ActionSender,
}

impl ConfigStore {
    pub(crate) fn new(layout: Layout, actions: ActionSender) -> Self {
        Self {
            layout,
            entries: Mutex::default(),
            actions,
        }
    }

    pub(crate) async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let action = self.layout.upsert_action(key, &value)?;

        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.emit(action).await
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let action = self.layout.delete_action(key)?;

        let mut entries = self.entries.lock().await;
        entries
            .remove(key)
            .ok_or_else(|| StoreError::EntityNotFound(key.to_string()))?;
        self.emit(action).await
    }

    #[cfg(test)]
    pub(crate) async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    pub(crate) async fn put_lb_rule(&self, rule: &LbRule) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::LbRule {
            id: rule.id.clone(),
        });
        self.put(&key, serde_json::to_string(rule)?).await
    }

    pub(crate) async fn delete_lb_rule(&self, id: &str) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::LbRule { id: id.to_string() });
        self.delete(&key).await
    }

    pub(crate) async fn put_mw_rule(&self, rule: &MwRule) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::MwRule {
            id: rule.id.clone(),
        });
        self.put(&key, serde_json::to_string(rule)?).await
    }

    pub(crate) async fn delete_mw_rule(&self, id: &str) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::MwRule { id: id.to_string() });
        self.delete(&key).await
    }

    /// Stores a host under its pool. Entries for the same host ID under other pools are
    /// removed after the upsert is queued.
    pub(crate) async fn put_host(&self, host: &HostConfig) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::Host {
            pool: host.loadbalancer.clone(),
            id: host.id.clone(),
        });
        let action = self.layout.upsert_action(&key, &host.url)?;

        let mut entries = self.entries.lock().await;
        entries.insert(key.clone(), host.url.clone());
        self.emit(action).await?;

        let stale: Vec<String> = entries
            .keys()
            .filter(|other| **other != key)
            .filter(|other| {
                matches!(
                    self.layout.parse_key(other),
                    Ok(Entity::Host { ref id, .. }) if *id == host.id
                )
            })
            .cloned()
            .collect();

        for other in stale {
            debug!(key = %other, "Dropping host entry superseded by another pool");
            entries.remove(&other);
            self.emit(self.layout.delete_action(&other)?).await?;
        }

        Ok(())
    }

    pub(crate) async fn delete_host(&self, pool: &str, id: &str) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::Host {
            pool: pool.to_string(),
            id: id.to_string(),
        });
        self.delete(&key).await
    }

    /// Stores a certificate whose PEM fields are already sealed.
    pub(crate) async fn put_cert(&self, cert: &CertConfig) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::Cert {
            id: cert.id.clone(),
        });
        self.put(&key, serde_json::to_string(cert)?).await
    }

    pub(crate) async fn delete_cert(&self, id: &str) -> Result<(), StoreError> {
        let key = self.layout.key(&Entity::Cert { id: id.to_string() });
        self.delete(&key).await
    }

    pub(crate) async fn lb_rules(&self) -> Vec<LbRule> {
        self.records(|action| match action {
            Action::UpsertLbRule(rule) => Some(rule),
            _ => None,
        })
        .await
    }

    pub(crate) async fn mw_rules(&self) -> Vec<MwRule> {
        self.records(|action| match action {
            Action::UpsertMwRule(rule) => Some(rule),
            _ => None,
        })
        .await
    }

    pub(crate) async fn hosts(&self) -> Vec<HostConfig> {
        self.records(|action| match action {
            Action::UpsertHost(host) => Some(host),
            _ => None,
        })
        .await
    }

    pub(crate) async fn cert_ids(&self) -> Vec<String> {
        self.records(|action| match action {
            Action::UpsertCert(cert) => Some(cert.id),
            _ => None,
        })
        .await
    }

    /// Decodes every entry and keeps those `select` accepts, in key order.
    async fn records<T>(&self, select: impl Fn(Action) -> Option<T>) -> Vec<T> {
        let entries = self.entries.lock().await;

        entries
            .iter()
            .filter_map(|(key, value)| match self.layout.upsert_action(key, value) {
                Ok(action) => select(action),
                Err(err) => {
                    warn!(%key, %err, "Skipping malformed entry");
                    None
                }
            })
            .collect()
    }

    async fn emit(&self, action: Action) -> Result<(), StoreError> {
        debug!(kind = action.kind(), id = action.id(), "Queueing action");
        self.actions
            .send(action)
            .await
            .map_err(|_| StoreError::Closed)
    }
}
