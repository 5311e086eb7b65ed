use std::{collections::HashMap, sync::Arc};

use rustls::{
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
    ServerConfig,
};
use tracing::debug;

use super::{store::Certificate, CertError};

/// Picks a certificate by SNI: exact name, then a `*.` wildcard for the parent domain,
/// then the first certificate of the snapshot.
#[derive(Debug)]
pub(crate) struct SniResolver {
    default: Option<Arc<CertifiedKey>>,
    exact: HashMap<String, Arc<CertifiedKey>>,
    /// Keyed by the domain under the wildcard label.
    wildcard: HashMap<String, Arc<CertifiedKey>>,
}

impl SniResolver {
    /// Later certificates win when two claim the same name.
    pub(crate) fn from_snapshot(certificates: &[Arc<Certificate>]) -> Self {
        let mut exact = HashMap::new();
        let mut wildcard = HashMap::new();

        for certificate in certificates {
            for name in &certificate.names {
                match name.strip_prefix("*.") {
                    Some(domain) => wildcard.insert(domain.to_string(), certificate.key.clone()),
                    None => exact.insert(name.clone(), certificate.key.clone()),
                };
            }
        }

        debug!(
            exact = exact.len(),
            wildcard = wildcard.len(),
            "Built SNI resolver"
        );

        Self {
            default: certificates.first().map(|certificate| certificate.key.clone()),
            exact,
            wildcard,
        }
    }

    fn select(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = server_name else {
            return self.default.clone();
        };
        let name = name.to_ascii_lowercase();

        if let Some(key) = self.exact.get(&name) {
            return Some(key.clone());
        }

        let parent = name.split_once('.').map(|(_, parent)| parent);
        if let Some(key) = parent.and_then(|parent| self.wildcard.get(parent)) {
            return Some(key.clone());
        }

        debug!(%name, "No certificate for server name, using default");
        self.default.clone()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.select(client_hello.server_name())
    }
}

/// TLS server configuration serving `certificates` over HTTP/1.1.
pub(crate) fn server_config(
    certificates: &[Arc<Certificate>],
) -> Result<Arc<ServerConfig>, CertError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::from_snapshot(certificates)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
