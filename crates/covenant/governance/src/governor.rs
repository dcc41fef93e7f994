//! Domain governor.
//!
//! Folds every applicable rule, in declaration order, into one
//! [`MergedEffect`]:
//!
//! | field             | combination                                    |
//! |-------------------|------------------------------------------------|
//! | atmosphere, mode  | last writer, locked once a constitutional rule writes |
//! | depth ceiling     | minimum                                        |
//! | forbidden/required| union; constitutional entries cannot be undone |
//! | pacing            | most conservative                              |
//! | primitive         | last constitutional override                   |
//! | escalate          | OR                                             |
//! | l2_enabled        | AND across rules that set it                   |

use std::collections::BTreeSet;

use covenant_types::{
    Atmosphere, ConstitutionalAction, Depth, FieldState, GovernorResult, MergedEffect, SafetyFlag,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rules::{DomainRule, RuleSet};

/// A post-condition the merged effect failed to meet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant_id: String,
    pub message: String,
}

impl InvariantViolation {
    fn new(invariant_id: &str, message: impl Into<String>) -> Self {
        Self {
            invariant_id: invariant_id.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DomainGovernor {
    rules: RuleSet,
}

impl Default for DomainGovernor {
    fn default() -> Self {
        Self::new(RuleSet::constitutional_defaults())
    }
}

impl DomainGovernor {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every rule against the field and merge their effects.
    pub fn apply(&self, field: &FieldState) -> GovernorResult {
        let mut merge = Merge::default();
        let mut rules_applied = Vec::new();

        for rule in self.rules.rules() {
            if !rule.condition.matches(field) {
                continue;
            }
            debug!(rule_id = %rule.id, precedence = ?rule.precedence, "Governor rule matched");
            merge.apply(rule);
            rules_applied.push(rule.id.clone());
        }

        GovernorResult {
            rules_applied,
            effect: merge.finish(),
        }
    }

    /// Check the merged effect's post-conditions.
    ///
    /// Reports violations and logs them; never alters the result.
    pub fn check_invariants(
        &self,
        field: &FieldState,
        result: &GovernorResult,
    ) -> Vec<InvariantViolation> {
        let effect = &result.effect;
        let mut violations = Vec::new();

        if effect.escalate && effect.required.is_empty() {
            violations.push(InvariantViolation::new(
                "GOV-ESCALATE-REQUIRES-ACTION",
                "escalation set but no required action",
            ));
        }
        let overlap: Vec<&str> = effect
            .forbidden
            .intersection(&effect.required)
            .map(|a| a.as_str())
            .collect();
        if !overlap.is_empty() {
            violations.push(InvariantViolation::new(
                "GOV-FORBIDDEN-REQUIRED-DISJOINT",
                format!("actions both forbidden and required: {}", overlap.join(", ")),
            ));
        }
        if field.has(SafetyFlag::Emergency) && effect.atmosphere != Atmosphere::Emergency {
            violations.push(InvariantViolation::new(
                "GOV-EMERGENCY-ATMOSPHERE",
                format!("emergency field produced {} atmosphere", effect.atmosphere.as_str()),
            ));
        }
        if effect.atmosphere == Atmosphere::Emergency && effect.depth_ceiling > Depth::Surface {
            violations.push(InvariantViolation::new(
                "GOV-EMERGENCY-SURFACE",
                format!("emergency atmosphere with {} ceiling", effect.depth_ceiling.as_str()),
            ));
        }
        if field.has(SafetyFlag::AcuteRisk)
            && !effect.required.contains(&ConstitutionalAction::Presence)
        {
            violations.push(InvariantViolation::new(
                "GOV-ACUTE-RISK-PRESENCE",
                "acute risk without required presence",
            ));
        }
        if effect.primitive_override.is_some() {
            let constitutional_applied = result
                .rules_applied
                .iter()
                .filter_map(|id| self.rules.get(id))
                .any(DomainRule::is_constitutional);
            if !constitutional_applied {
                violations.push(InvariantViolation::new(
                    "GOV-PRIMITIVE-CONSTITUTIONAL",
                    "primitive override without a constitutional rule",
                ));
            }
        }

        for v in &violations {
            warn!(invariant = %v.invariant_id, message = %v.message, "Governor invariant violated");
        }
        violations
    }
}

/// Accumulator for the fold.
struct Merge {
    effect: MergedEffect,
    locked_atmosphere: bool,
    locked_mode: bool,
    constitutional_forbidden: BTreeSet<ConstitutionalAction>,
    constitutional_required: BTreeSet<ConstitutionalAction>,
    l2: Option<bool>,
}

impl Default for Merge {
    fn default() -> Self {
        Self {
            effect: MergedEffect::default(),
            locked_atmosphere: false,
            locked_mode: false,
            constitutional_forbidden: BTreeSet::new(),
            constitutional_required: BTreeSet::new(),
            l2: None,
        }
    }
}

impl Merge {
    fn apply(&mut self, rule: &DomainRule) {
        let constitutional = rule.is_constitutional();
        let e = &rule.effect;

        if let Some(atmosphere) = e.atmosphere {
            if constitutional || !self.locked_atmosphere {
                self.effect.atmosphere = atmosphere;
                self.locked_atmosphere |= constitutional;
            } else {
                debug!(rule_id = %rule.id, "Atmosphere locked by constitutional rule");
            }
        }
        if let Some(mode) = e.mode {
            if constitutional || !self.locked_mode {
                self.effect.mode = mode;
                self.locked_mode |= constitutional;
            }
        }

        self.effect.depth_ceiling = self
            .effect
            .depth_ceiling
            .min(e.depth_ceiling.unwrap_or(Depth::Deep));

        for action in &e.forbid {
            if constitutional {
                self.constitutional_forbidden.insert(*action);
                self.effect.required.remove(action);
                self.effect.forbidden.insert(*action);
            } else if !self.constitutional_required.contains(action) {
                self.effect.forbidden.insert(*action);
            }
        }
        for action in &e.require {
            if constitutional {
                self.constitutional_required.insert(*action);
                self.effect.forbidden.remove(action);
                self.effect.required.insert(*action);
            } else if !self.constitutional_forbidden.contains(action) {
                self.effect.required.insert(*action);
            }
        }

        if let Some(pacing) = e.pacing {
            self.effect.pacing = self.effect.pacing.most_conservative(pacing);
        }
        if constitutional {
            if let Some(primitive) = e.primitive {
                self.effect.primitive_override = Some(primitive);
            }
        }
        self.effect.escalate |= e.escalate;
        if let Some(l2) = e.l2_enabled {
            self.l2 = Some(self.l2.unwrap_or(true) && l2);
        }
    }

    fn finish(mut self) -> MergedEffect {
        // Between non-constitutional rules a prohibition beats a requirement.
        let forbidden = self.effect.forbidden.clone();
        self.effect.required.retain(|a| !forbidden.contains(a));
        self.effect.l2_enabled = self.l2.unwrap_or(true);
        self.effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleCondition, RuleEffect};
    use covenant_types::{Arousal, Goal, Mode, Pacing, Precedence, Primitive};

    fn field_with(flags: &[SafetyFlag]) -> FieldState {
        let mut field = FieldState::minimal(Some("en".into()));
        field.safety_flags = flags.iter().copied().collect();
        field.uncertainty = 0.3;
        field
    }

    #[test]
    fn emergency_field() {
        let mut field = field_with(&[SafetyFlag::Emergency]);
        field.arousal = Arousal::High;
        let gov = DomainGovernor::default();
        let result = gov.apply(&field);

        let e = &result.effect;
        assert_eq!(e.atmosphere, Atmosphere::Emergency);
        assert_eq!(e.mode, Mode::Regulate);
        assert_eq!(e.depth_ceiling, Depth::Surface);
        assert_eq!(e.pacing, Pacing::Slow);
        assert_eq!(e.primitive_override, Some(Primitive::Ground));
        assert!(e.required.contains(&ConstitutionalAction::Ground));
        assert!(e.required.contains(&ConstitutionalAction::Presence));
        assert!(e.forbidden.contains(&ConstitutionalAction::GiveAdvice));
        assert!(e.escalate);
        assert!(!e.l2_enabled);
        assert!(gov.check_invariants(&field, &result).is_empty());
        assert_eq!(result.rules_applied[0], "BASE-HUMAN-FIELD");
        assert_eq!(result.rules_applied[1], "CONST-EMERGENCY");
    }

    #[test]
    fn constitutional_atmosphere_is_locked() {
        // Emergency plus an identity question: DOMAIN-IDENTITY runs later but
        // cannot replace the emergency atmosphere.
        let field = field_with(&[SafetyFlag::Emergency, SafetyFlag::IdentityAssignment]);
        let result = DomainGovernor::default().apply(&field);
        assert!(result.rules_applied.contains(&"DOMAIN-IDENTITY".to_string()));
        assert_eq!(result.effect.atmosphere, Atmosphere::Emergency);
    }

    #[test]
    fn later_rule_cannot_require_constitutionally_forbidden_action() {
        let mut rules = RuleSet::new();
        rules
            .push(DomainRule {
                id: "C".into(),
                description: String::new(),
                precedence: Precedence::Constitutional,
                condition: RuleCondition::Always,
                effect: RuleEffect {
                    forbid: vec![ConstitutionalAction::ExploreDepth],
                    ..Default::default()
                },
            })
            .unwrap();
        rules
            .push(DomainRule {
                id: "D".into(),
                description: String::new(),
                precedence: Precedence::Domain,
                condition: RuleCondition::Always,
                effect: RuleEffect {
                    require: vec![ConstitutionalAction::ExploreDepth],
                    ..Default::default()
                },
            })
            .unwrap();
        let result = DomainGovernor::new(rules).apply(&field_with(&[]));
        assert!(result.effect.forbidden.contains(&ConstitutionalAction::ExploreDepth));
        assert!(result.effect.required.is_empty());
    }

    #[test]
    fn decision_request_contracts_and_returns_ownership() {
        let mut field = field_with(&[SafetyFlag::DecisionRequest]);
        field.goal = Goal::Decide;
        let result = DomainGovernor::default().apply(&field);
        assert_eq!(result.effect.atmosphere, Atmosphere::Decision);
        assert_eq!(result.effect.depth_ceiling, Depth::Medium);
        assert!(result.effect.forbidden.contains(&ConstitutionalAction::MakeDecision));
        assert!(result.effect.required.contains(&ConstitutionalAction::ReturnOwnership));
        assert_eq!(result.effect.primitive_override, None);
    }

    #[test]
    fn calm_field_is_open() {
        let field = field_with(&[]);
        let result = DomainGovernor::default().apply(&field);
        assert_eq!(result.effect.atmosphere, Atmosphere::HumanField);
        assert_eq!(result.effect.depth_ceiling, Depth::Deep);
        assert!(result.effect.l2_enabled);
        assert_eq!(
            result.rules_applied,
            vec!["BASE-HUMAN-FIELD".to_string(), "CONST-NO-DIAGNOSIS".to_string()]
        );
    }

    #[test]
    fn invariant_check_reports_without_mutating() {
        let field = field_with(&[SafetyFlag::Emergency]);
        let result = GovernorResult {
            rules_applied: vec![],
            effect: MergedEffect {
                escalate: true,
                primitive_override: Some(Primitive::Ground),
                ..MergedEffect::default()
            },
        };
        let before = result.clone();
        let violations = DomainGovernor::default().check_invariants(&field, &result);
        let ids: Vec<_> = violations.iter().map(|v| v.invariant_id.as_str()).collect();
        assert!(ids.contains(&"GOV-ESCALATE-REQUIRES-ACTION"));
        assert!(ids.contains(&"GOV-EMERGENCY-ATMOSPHERE"));
        assert!(ids.contains(&"GOV-PRIMITIVE-CONSTITUTIONAL"));
        assert_eq!(result, before);
    }
}
