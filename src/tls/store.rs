use std::{collections::BTreeMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use rustls::{pki_types::CertificateDer, sign::CertifiedKey};
use tokio::sync::Mutex;
use tracing::{debug, info};
use x509_parser::{extensions::GeneralName, parse_x509_certificate};

use super::CertError;
use crate::config::CertConfig;

/// A loaded certificate: the signing material rustls needs plus the DNS names it covers.
pub(crate) struct Certificate {
    pub(crate) id: String,
    /// Lowercased subject common names and SAN DNS names, in certificate order.
    pub(crate) names: Vec<String>,
    pub(crate) key: Arc<CertifiedKey>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

pub(crate) type Snapshot = Arc<Vec<Arc<Certificate>>>;

/// Certificates by ID with an atomically published, ID-ordered snapshot.
///
/// Mutations serialize on the map lock and republish the snapshot before releasing it,
/// so readers never observe a partially applied change.
pub(crate) struct CertificateStore {
    entries: Mutex<BTreeMap<String, Arc<Certificate>>>,
    active: ArcSwap<Vec<Arc<Certificate>>>,
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self {
            entries: Mutex::default(),
            active: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl CertificateStore {
    /// Parses and stores a decrypted certificate, replacing any previous one with the
    /// same ID.
    pub(crate) async fn put(&self, cert: &CertConfig) -> Result<(), CertError> {
        let certificate = Arc::new(load_certificate(cert)?);
        info!(id = %certificate.id, names = ?certificate.names, "Storing certificate");

        let mut entries = self.entries.lock().await;
        entries.insert(certificate.id.clone(), certificate);
        self.publish(&entries);

        Ok(())
    }

    pub(crate) async fn delete(&self, id: &str) -> Result<(), CertError> {
        let mut entries = self.entries.lock().await;
        entries
            .remove(id)
            .ok_or_else(|| CertError::CertificateNotFound(id.to_string()))?;
        self.publish(&entries);

        info!(%id, "Deleted certificate");
        Ok(())
    }

    pub(crate) fn active_certificates(&self) -> Snapshot {
        self.active.load_full()
    }

    fn publish(&self, entries: &BTreeMap<String, Arc<Certificate>>) {
        self.active.store(Arc::new(entries.values().cloned().collect()));
    }
}

fn load_certificate(cert: &CertConfig) -> Result<Certificate, CertError> {
    let invalid = |reason: String| CertError::InvalidKeyPair {
        id: cert.id.clone(),
        reason,
    };

    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert.cert_pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|err| invalid(format!("certificate pem: {err}")))?;

    let Some(leaf) = chain.first() else {
        return Err(invalid("no certificate found".to_string()));
    };
    let names = dns_names(leaf).map_err(invalid)?;

    let key = rustls_pemfile::private_key(&mut cert.key_pem.as_bytes())
        .map_err(|err| invalid(format!("key pem: {err}")))?
        .ok_or_else(|| invalid("no private key found".to_string()))?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|err| invalid(format!("unsupported private key: {err}")))?;

    let key = CertifiedKey::new(chain, signing_key);
    key.keys_match()
        .map_err(|err| invalid(format!("key does not match certificate: {err}")))?;

    debug!(id = %cert.id, "Loaded key pair");

    Ok(Certificate {
        id: cert.id.clone(),
        names,
        key: Arc::new(key),
    })
}

fn dns_names(leaf: &CertificateDer<'_>) -> Result<Vec<String>, String> {
    let (_, parsed) =
        parse_x509_certificate(leaf.as_ref()).map_err(|err| format!("certificate der: {err}"))?;

    let common_names = parsed
        .subject()
        .iter_common_name()
        .filter_map(|attr| attr.as_str().ok())
        .map(str::to_string);

    let alt_names: Vec<String> = match parsed.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut names: Vec<String> = Vec::new();
    for name in common_names.chain(alt_names) {
        let name = name.to_ascii_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    Ok(names)
}
