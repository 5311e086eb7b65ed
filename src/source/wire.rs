//! Key/value layout shared with external configuration stores.
//!
//! ```text
//! <prefix>/lbrules/<id>                   {"ID","Route","Target"}
//! <prefix>/mwrules/<id>                   {"ID","Route","Middlewares":[{"ID","Opts"}]}
//! <prefix>/loadbalancer/<pool>/hosts/<id> raw URL
//! <prefix>/certs/<id>                     {"ID","CertPem","KeyPem"}, sealed
//! ```
//!
//! The ID inside a value is ignored; the key is authoritative.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    balancer::LbRule,
    config::{Action, CertConfig, HostConfig},
    middleware::MwRule,
};

pub(crate) const DEFAULT_PREFIX: &str = "/gantry";

#[derive(Debug, Error)]
pub(crate) enum WireError {
    #[error("key `{0}` is outside the configuration layout")]
    UnknownKey(String),
    #[error("invalid value at `{key}`: {source}")]
    InvalidValue {
        key: String,
        source: serde_json::Error,
    },
}

/// What a key addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Entity {
    LbRule { id: String },
    MwRule { id: String },
    Host { pool: String, id: String },
    Cert { id: String },
}

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    prefix: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Layout {
    pub(crate) fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };

        Self { prefix }
    }

    pub(crate) fn key(&self, entity: &Entity) -> String {
        let prefix = &self.prefix;
        match entity {
            Entity::LbRule { id } => format!("{prefix}/lbrules/{id}"),
            Entity::MwRule { id } => format!("{prefix}/mwrules/{id}"),
            Entity::Host { pool, id } => format!("{prefix}/loadbalancer/{pool}/hosts/{id}"),
            Entity::Cert { id } => format!("{prefix}/certs/{id}"),
        }
    }

    pub(crate) fn parse_key(&self, key: &str) -> Result<Entity, WireError> {
        let unknown = || WireError::UnknownKey(key.to_string());

        let rest = key
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(unknown());
        }

        let entity = match segments.as_slice() {
            ["lbrules", id] => Entity::LbRule { id: id.to_string() },
            ["mwrules", id] => Entity::MwRule { id: id.to_string() },
            ["loadbalancer", pool, "hosts", id] => Entity::Host {
                pool: pool.to_string(),
                id: id.to_string(),
            },
            ["certs", id] => Entity::Cert { id: id.to_string() },
            _ => return Err(unknown()),
        };

        Ok(entity)
    }

    /// Decodes a put event.
    pub(crate) fn upsert_action(&self, key: &str, value: &str) -> Result<Action, WireError> {
        let action = match self.parse_key(key)? {
            Entity::LbRule { id } => Action::UpsertLbRule(LbRule {
                id,
                ..decode(key, value)?
            }),
            Entity::MwRule { id } => Action::UpsertMwRule(MwRule {
                id,
                ..decode(key, value)?
            }),
            Entity::Host { pool, id } => Action::UpsertHost(HostConfig {
                id,
                loadbalancer: pool,
                url: value.trim().to_string(),
            }),
            Entity::Cert { id } => Action::UpsertCert(CertConfig {
                id,
                ..decode(key, value)?
            }),
        };

        Ok(action)
    }

    /// Decodes a delete event, which carries only the key.
    pub(crate) fn delete_action(&self, key: &str) -> Result<Action, WireError> {
        let action = match self.parse_key(key)? {
            Entity::LbRule { id } => Action::DeleteLbRule { id },
            Entity::MwRule { id } => Action::DeleteMwRule { id },
            Entity::Host { pool, id } => Action::DeleteHost {
                id,
                loadbalancer: pool,
            },
            Entity::Cert { id } => Action::DeleteCert { id },
        };

        Ok(action)
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Result<T, WireError> {
    serde_json::from_str(value).map_err(|source| WireError::InvalidValue {
        key: key.to_string(),
        source,
    })
}
