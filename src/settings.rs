use std::{fmt, net::SocketAddr, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    cli::Args,
    source::{wire::DEFAULT_PREFIX, DEFAULT_QUEUE_CAPACITY},
};

#[derive(Debug, Error)]
pub(crate) enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no configuration source: set a bootstrap file or a control address")]
    NoSource,
    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,
}

/// Process settings: the YAML file if given, overridden by command-line flags.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub(crate) http: SocketAddr,
    pub(crate) https: SocketAddr,
    pub(crate) control: Option<SocketAddr>,
    pub(crate) password: String,
    pub(crate) bootstrap: Option<PathBuf>,
    pub(crate) prefix: String,
    pub(crate) queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: ([0, 0, 0, 0], 80).into(),
            https: ([0, 0, 0, 0], 443).into(),
            control: None,
            password: String::new(),
            bootstrap: None,
            prefix: DEFAULT_PREFIX.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("http", &self.http)
            .field("https", &self.https)
            .field("control", &self.control)
            .field("password", &"<redacted>")
            .field("bootstrap", &self.bootstrap)
            .field("prefix", &self.prefix)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Settings {
    pub(crate) fn from_yaml(contents: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub(crate) fn load(args: Args) -> Result<Self, SettingsError> {
        let settings = match &args.config {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                Self::from_yaml(&contents)?
            }
            None => Self::default(),
        };

        settings.merge(args).validated()
    }

    fn merge(mut self, args: Args) -> Self {
        if let Some(http) = args.http {
            self.http = http;
        }
        if let Some(https) = args.https {
            self.https = https;
        }
        if args.control.is_some() {
            self.control = args.control;
        }
        if let Some(password) = args.password {
            self.password = password;
        }
        if args.bootstrap.is_some() {
            self.bootstrap = args.bootstrap;
        }
        if let Some(prefix) = args.prefix {
            self.prefix = prefix;
        }
        if let Some(capacity) = args.queue_capacity {
            self.queue_capacity = capacity;
        }
        self
    }

    fn validated(self) -> Result<Self, SettingsError> {
        if self.bootstrap.is_none() && self.control.is_none() {
            return Err(SettingsError::NoSource);
        }
        if self.queue_capacity == 0 {
            return Err(SettingsError::InvalidQueueCapacity);
        }
        Ok(self)
    }
}
