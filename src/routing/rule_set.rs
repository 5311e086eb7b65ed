use std::collections::HashMap;

use http::Request;
use itertools::Itertools;
use thiserror::Error;

use super::matcher::{MatcherError, RouteMatcher};

#[derive(Debug, Error)]
pub(crate) enum RuleError {
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("no matching rule")]
    NoMatch,
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

/// A routing rule: an identity, a match expression and the payload it routes to.
pub(crate) trait Rule: Clone {
    type Target: Clone;

    fn id(&self) -> &str;
    fn route(&self) -> &str;
    fn target(&self) -> Self::Target;
}

/// Rules keyed by ID, mirrored into a route matcher keyed by expression.
///
/// Every rule in `rules` has exactly one matcher entry under its current route. Rules
/// sharing an expression share the entry, which carries the most recently upserted payload.
/// Not synchronized; owners guard it with a lock so each call is atomic to readers.
#[derive(Debug)]
pub(crate) struct RuleSet<R, M> {
    rules: HashMap<String, R>,
    router: M,
}

impl<R, M> Default for RuleSet<R, M>
where
    M: Default,
{
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            router: M::default(),
        }
    }
}

impl<R, M> RuleSet<R, M>
where
    R: Rule,
    M: RouteMatcher<R::Target>,
{
    pub(crate) fn upsert(&mut self, rule: R) -> Result<(), RuleError> {
        // Install the new entry first so a malformed expression changes nothing.
        self.router.upsert_route(rule.route(), rule.target())?;

        let previous = self.rules.insert(rule.id().to_string(), rule.clone());

        if let Some(previous) = previous {
            if previous.route() != rule.route() {
                self.release_route(previous.route())?;
            }
        }

        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> Result<R, RuleError> {
        let rule = self
            .rules
            .remove(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        self.release_route(rule.route())?;

        Ok(rule)
    }

    pub(crate) fn resolve<B>(&self, req: &Request<B>) -> Result<R::Target, RuleError> {
        self.router.route(req).cloned().ok_or(RuleError::NoMatch)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &str) -> Option<&R> {
        self.rules.get(id)
    }

    /// Rules ordered by ID.
    pub(crate) fn rules(&self) -> Vec<R> {
        self.rules
            .values()
            .sorted_by(|a, b| a.id().cmp(b.id()))
            .cloned()
            .collect()
    }

    /// Drops the matcher entry for `route` unless another rule still uses it, in which
    /// case that rule's payload is reinstalled.
    fn release_route(&mut self, route: &str) -> Result<(), RuleError> {
        let survivor = self
            .rules
            .values()
            .filter(|rule| rule.route() == route)
            .min_by(|a, b| a.id().cmp(b.id()))
            .map(Rule::target);

        match survivor {
            Some(target) => self.router.upsert_route(route, target)?,
            None => {
                self.router.remove_route(route)?;
            }
        }

        Ok(())
    }
}
