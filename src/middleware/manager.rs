use std::sync::Arc;

use http::Request;
use tokio::sync::RwLock;

use super::{
    registry::Registry,
    rule::{MiddlewareBinding, MwRule, MwRuleSet},
    MiddlewareError,
};
use crate::{handler::SharedHandler, routing::RuleError};

/// Middleware rules plus the registry used to instantiate their chains.
#[derive(Clone)]
pub(crate) struct MiddlewareManager {
    rules: Arc<RwLock<MwRuleSet>>,
    registry: Arc<Registry>,
}

impl MiddlewareManager {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self {
            rules: Arc::default(),
            registry,
        }
    }

    pub(crate) async fn upsert_rule(&self, rule: MwRule) -> Result<(), MiddlewareError> {
        Ok(self.rules.write().await.upsert(rule)?)
    }

    pub(crate) async fn remove_rule(&self, id: &str) -> Result<MwRule, MiddlewareError> {
        Ok(self.rules.write().await.remove(id)?)
    }

    pub(crate) async fn rules(&self) -> Vec<MwRule> {
        self.rules.read().await.rules()
    }

    /// Chain for `req` ending in `terminal`, or `terminal` itself when no rule matches.
    pub(crate) async fn build_chain<B>(
        &self,
        req: &Request<B>,
        terminal: SharedHandler,
    ) -> Result<SharedHandler, MiddlewareError> {
        let resolved = self.rules.read().await.resolve(req);

        match resolved {
            Ok(bindings) => build(&self.registry, &bindings, terminal),
            Err(RuleError::NoMatch) => Ok(terminal),
            Err(err) => Err(err.into()),
        }
    }
}

/// Wraps `terminal` in `bindings`, innermost last. Fails as a whole if any
/// constructor fails.
pub(crate) fn build(
    registry: &Registry,
    bindings: &[MiddlewareBinding],
    terminal: SharedHandler,
) -> Result<SharedHandler, MiddlewareError> {
    bindings
        .iter()
        .rev()
        .try_fold(terminal, |next, binding| {
            registry.create(&binding.id, next, &binding.opts)
        })
}
