use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::{ExprMatcher, Rule, RuleSet};

/// One middleware in a chain: the registry name and its constructor options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MiddlewareBinding {
    #[serde(rename = "ID")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) opts: Value,
}

/// Binds an ordered middleware chain to requests matching `route`. The first binding
/// is the outermost wrapper.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MwRule {
    #[serde(rename = "ID", default)]
    pub(crate) id: String,
    pub(crate) route: String,
    #[serde(default)]
    pub(crate) middlewares: Vec<MiddlewareBinding>,
}

impl Rule for MwRule {
    type Target = Arc<[MiddlewareBinding]>;

    fn id(&self) -> &str {
        &self.id
    }

    fn route(&self) -> &str {
        &self.route
    }

    fn target(&self) -> Self::Target {
        self.middlewares.as_slice().into()
    }
}

pub(crate) type MwRuleSet = RuleSet<MwRule, ExprMatcher<Arc<[MiddlewareBinding]>>>;
