//! Request matching: match expressions, the route matcher they feed, and the
//! generic rule set shared by the load balancer and middleware layers.

pub(crate) mod expr;
pub(crate) mod host;
pub(crate) mod matcher;
pub(crate) mod matchers;
pub(crate) mod rule_set;

pub(crate) use matcher::ExprMatcher;
pub(crate) use rule_set::{Rule, RuleError, RuleSet};
