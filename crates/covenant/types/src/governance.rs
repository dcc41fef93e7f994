use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::protocol::{Atmosphere, ConstitutionalAction, Depth, Mode, Pacing, Primitive};

/// Rule precedence tier.
///
/// Only `Constitutional` rules may override the primitive, and once a
/// constitutional rule has set the atmosphere or mode, no rule evaluated
/// after it can change them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Precedence {
    Default,
    Domain,
    Safety,
    Constitutional,
}

/// The single effect produced by merging every applicable rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedEffect {
    pub atmosphere: Atmosphere,
    pub mode: Mode,
    /// Minimum of every applicable rule's ceiling
    pub depth_ceiling: Depth,
    /// Union
    pub forbidden: BTreeSet<ConstitutionalAction>,
    /// Union
    pub required: BTreeSet<ConstitutionalAction>,
    /// Most conservative
    pub pacing: Pacing,
    /// Set only by constitutional rules; last one wins
    pub primitive_override: Option<Primitive>,
    /// OR across rules
    pub escalate: bool,
    /// AND across rules that set it; `true` when none do
    pub l2_enabled: bool,
}

impl Default for MergedEffect {
    fn default() -> Self {
        Self {
            atmosphere: Atmosphere::HumanField,
            mode: Mode::Expand,
            depth_ceiling: Depth::Deep,
            forbidden: BTreeSet::new(),
            required: BTreeSet::new(),
            pacing: Pacing::Responsive,
            primitive_override: None,
            escalate: false,
            l2_enabled: true,
        }
    }
}

/// Output of the domain governor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GovernorResult {
    /// Rule ids in evaluation order
    pub rules_applied: Vec<String>,
    pub effect: MergedEffect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_effect_is_unrestricted() {
        let effect = MergedEffect::default();
        assert_eq!(effect.depth_ceiling, Depth::Deep);
        assert!(effect.forbidden.is_empty());
        assert!(effect.l2_enabled);
        assert!(!effect.escalate);
    }

    #[test]
    fn constitutional_outranks_everything() {
        assert!(Precedence::Constitutional > Precedence::Safety);
        assert!(Precedence::Safety > Precedence::Domain);
        assert!(Precedence::Domain > Precedence::Default);
    }
}
