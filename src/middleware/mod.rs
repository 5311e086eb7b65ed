//! Pluggable request middleware: the type registry, per-route rules and chain assembly.

pub(crate) mod builtin;
pub(crate) mod manager;
pub(crate) mod registry;
pub(crate) mod rule;

use thiserror::Error;

use crate::routing::RuleError;

pub(crate) use manager::MiddlewareManager;
pub(crate) use registry::Registry;
pub(crate) use rule::{MiddlewareBinding, MwRule};

#[derive(Debug, Error)]
pub(crate) enum MiddlewareError {
    #[error("no middleware type '{0}'")]
    UnknownMiddlewareType(String),
    #[error("invalid options for middleware '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },
    #[error("middleware i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rule(#[from] RuleError),
}
