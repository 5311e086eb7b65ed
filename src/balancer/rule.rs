use serde::{Deserialize, Serialize};

use crate::routing::{ExprMatcher, Rule, RuleSet};

/// Routes requests matching `route` to the pool named `target`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LbRule {
    #[serde(rename = "ID", default)]
    pub(crate) id: String,
    pub(crate) route: String,
    pub(crate) target: String,
}

impl Rule for LbRule {
    type Target = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn route(&self) -> &str {
        &self.route
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

pub(crate) type LbRuleSet = RuleSet<LbRule, ExprMatcher<String>>;
