//! Bootstrap configuration loaded from a YAML file at startup.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::{ConfigStore, StoreError};
use crate::{
    balancer::LbRule,
    config::{CertConfig, HostConfig},
    middleware::MwRule,
};

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse bootstrap file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entity lists in wire field names. Certificates are sealed.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Bootstrap {
    pub(crate) lbrules: Vec<LbRule>,
    pub(crate) mwrules: Vec<MwRule>,
    pub(crate) hosts: Vec<HostConfig>,
    pub(crate) certs: Vec<CertConfig>,
}

impl Bootstrap {
    pub(crate) fn from_yaml(contents: &str) -> Result<Self, BootstrapError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub(crate) async fn read(path: &Path) -> Result<Self, BootstrapError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| BootstrapError::Read {
                    path: path.display().to_string(),
                    source,
                })?;

        Self::from_yaml(&contents)
    }

    /// Writes every entity into `store`. Certificates go first so HTTPS comes up with the
    /// full set, rules last so they never point at pools still being filled.
    pub(crate) async fn apply(self, store: &ConfigStore) -> Result<usize, BootstrapError> {
        let count = self.certs.len() + self.hosts.len() + self.mwrules.len() + self.lbrules.len();

        for cert in &self.certs {
            store.put_cert(cert).await?;
        }
        for host in &self.hosts {
            store.put_host(host).await?;
        }
        for rule in &self.mwrules {
            store.put_mw_rule(rule).await?;
        }
        for rule in &self.lbrules {
            store.put_lb_rule(rule).await?;
        }

        info!(
            certs = self.certs.len(),
            hosts = self.hosts.len(),
            mwrules = self.mwrules.len(),
            lbrules = self.lbrules.len(),
            "Applied bootstrap configuration"
        );

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::source::{channel, Layout};

    const BOOTSTRAP: &str = r#"
lbrules:
  - ID: r1
    Route: Host(`a.test`)
    Target: pool1
mwrules:
  - ID: m1
    Route: PathPrefix(`/api`)
    Middlewares:
      - ID: trace
        Opts:
          Output: /tmp/gantry-trace.log
hosts:
  - ID: h1
    Loadbalancer: pool1
    URL: http://10.0.0.1:8080
"#;

    #[tokio::test]
    async fn applies_entities_through_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BOOTSTRAP.as_bytes()).unwrap();
        let (tx, mut rx) = channel(16);
        let store = ConfigStore::new(Layout::default(), tx);

        let bootstrap = Bootstrap::read(file.path()).await.unwrap();
        assert_eq!(bootstrap.apply(&store).await.unwrap(), 3);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|action| action.kind())
            .collect();
        assert_eq!(kinds, ["upsert-host", "upsert-mwrule", "upsert-lbrule"]);
        assert_eq!(store.mw_rules().await[0].middlewares[0].id, "trace");
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(matches!(
            Bootstrap::from_yaml("routes: []"),
            Err(BootstrapError::Parse(_))
        ));
    }

    #[test]
    fn empty_file_is_empty_bootstrap() {
        let bootstrap = Bootstrap::from_yaml("{}").unwrap();

        assert!(bootstrap.lbrules.is_empty() && bootstrap.certs.is_empty());
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let err = Bootstrap::read(Path::new("/nonexistent/bootstrap.yaml"))
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::Read { ref path, .. } if path.contains("bootstrap.yaml")));
    }
}
