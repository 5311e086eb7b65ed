//! Certificate storage and the rustls configuration built from it.

pub(crate) mod resolver;
pub(crate) mod store;

use thiserror::Error;

pub(crate) use resolver::server_config;
pub(crate) use store::CertificateStore;

#[derive(Debug, Error)]
pub(crate) enum CertError {
    #[error("invalid key pair for certificate '{id}': {reason}")]
    InvalidKeyPair { id: String, reason: String },
    #[error("certificate not found: {0}")]
    CertificateNotFound(String),
    #[error("tls configuration: {0}")]
    Config(#[from] rustls::Error),
}
