use thiserror::Error;

/// Errors from managing governor and meta-kernel rule sets.
///
/// Rule evaluation itself never fails; these cover rule-set authoring.
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("cannot remove constitutional rule: {0}")]
    ConstitutionalRuleRemoval(String),

    #[error("rule {0} overrides the primitive but is not constitutional")]
    PrimitiveOverrideNotConstitutional(String),

    #[error("rule {rule_id} both forbids and requires {action}")]
    SelfContradictoryRule { rule_id: String, action: String },

    #[error("invalid rule set: {0}")]
    InvalidRuleSet(#[from] serde_json::Error),

    #[error("invalid handshake pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
