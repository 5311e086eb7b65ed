//! Configuration records and the actions that carry them to the reconciler.

pub(crate) mod crypto;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{balancer::LbRule, middleware::MwRule};

pub(crate) use crypto::CryptoError;

/// A single configuration change. Sources emit these in order; the reconciler applies
/// them one at a time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    UpsertLbRule(LbRule),
    UpsertMwRule(MwRule),
    UpsertHost(HostConfig),
    UpsertCert(CertConfig),
    DeleteLbRule { id: String },
    DeleteMwRule { id: String },
    /// `loadbalancer` may be empty when the source does not know the pool.
    DeleteHost { id: String, loadbalancer: String },
    DeleteCert { id: String },
}

impl Action {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Action::UpsertLbRule(_) => "upsert-lbrule",
            Action::UpsertMwRule(_) => "upsert-mwrule",
            Action::UpsertHost(_) => "upsert-host",
            Action::UpsertCert(_) => "upsert-cert",
            Action::DeleteLbRule { .. } => "delete-lbrule",
            Action::DeleteMwRule { .. } => "delete-mwrule",
            Action::DeleteHost { .. } => "delete-host",
            Action::DeleteCert { .. } => "delete-cert",
        }
    }

    pub(crate) fn id(&self) -> &str {
        match self {
            Action::UpsertLbRule(rule) => &rule.id,
            Action::UpsertMwRule(rule) => &rule.id,
            Action::UpsertHost(host) => &host.id,
            Action::UpsertCert(cert) => &cert.id,
            Action::DeleteLbRule { id }
            | Action::DeleteMwRule { id }
            | Action::DeleteHost { id, .. }
            | Action::DeleteCert { id } => id,
        }
    }
}

/// Membership of one backend endpoint in one pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HostConfig {
    #[serde(rename = "ID", default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) loadbalancer: String,
    #[serde(rename = "URL")]
    pub(crate) url: String,
}

/// A certificate chain and its private key, both PEM encoded.
///
/// Whether the PEM fields hold plaintext or sealed text depends on where the value is:
/// sources and stores carry sealed material, the certificate store receives it opened.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CertConfig {
    #[serde(rename = "ID", default)]
    pub(crate) id: String,
    pub(crate) cert_pem: String,
    pub(crate) key_pem: String,
}

impl CertConfig {
    pub(crate) fn seal(&self, password: &str) -> CertConfig {
        CertConfig {
            id: self.id.clone(),
            cert_pem: crypto::encrypt(&self.cert_pem, password),
            key_pem: crypto::encrypt(&self.key_pem, password),
        }
    }

    pub(crate) fn open(&self, password: &str) -> Result<CertConfig, CryptoError> {
        Ok(CertConfig {
            id: self.id.clone(),
            cert_pem: crypto::decrypt(&self.cert_pem, password)?,
            key_pem: crypto::decrypt(&self.key_pem, password)?,
        })
    }
}

impl fmt::Debug for CertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertConfig")
            .field("id", &self.id)
            .field("cert_pem", &format_args!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
