//! Governor rules as data.
//!
//! A rule is an id, a precedence tag, a closed-form condition over
//! [`FieldState`] and a closed-form effect record. Rule sets serialise to
//! and from JSON, so they can be reviewed and versioned like any other
//! policy document.

use covenant_types::{
    Arousal, Atmosphere, ConstitutionalAction, Depth, FieldState, Goal, HorizontalDomain, Mode,
    Pacing, Precedence, Primitive, SafetyFlag,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GovernanceError;

/// A single governor rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub id: String,
    pub description: String,
    pub precedence: Precedence,
    pub condition: RuleCondition,
    pub effect: RuleEffect,
}

impl DomainRule {
    pub fn is_constitutional(&self) -> bool {
        self.precedence == Precedence::Constitutional
    }
}

/// Activation predicate over a field state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    Always,
    SafetyFlag(SafetyFlag),
    DomainAbove { domain: HorizontalDomain, min: f64 },
    ArousalAtLeast(Arousal),
    LoopCountAtLeast(u32),
    UncertaintyAbove(f64),
    GoalIs(Goal),
    All(Vec<RuleCondition>),
    Any(Vec<RuleCondition>),
    Not(Box<RuleCondition>),
}

impl RuleCondition {
    pub fn matches(&self, field: &FieldState) -> bool {
        match self {
            RuleCondition::Always => true,
            RuleCondition::SafetyFlag(flag) => field.has(*flag),
            RuleCondition::DomainAbove { domain, min } => field.salience(*domain) > *min,
            RuleCondition::ArousalAtLeast(level) => field.arousal >= *level,
            RuleCondition::LoopCountAtLeast(n) => field.loop_count >= *n,
            RuleCondition::UncertaintyAbove(u) => field.uncertainty > *u,
            RuleCondition::GoalIs(goal) => field.goal == *goal,
            RuleCondition::All(conds) => conds.iter().all(|c| c.matches(field)),
            RuleCondition::Any(conds) => conds.iter().any(|c| c.matches(field)),
            RuleCondition::Not(cond) => !cond.matches(field),
        }
    }

    fn negate(cond: RuleCondition) -> Self {
        RuleCondition::Not(Box::new(cond))
    }
}

/// Effect record. Unset fields leave the merged effect untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleEffect {
    pub atmosphere: Option<Atmosphere>,
    pub mode: Option<Mode>,
    pub depth_ceiling: Option<Depth>,
    pub forbid: Vec<ConstitutionalAction>,
    pub require: Vec<ConstitutionalAction>,
    pub pacing: Option<Pacing>,
    pub primitive: Option<Primitive>,
    pub escalate: bool,
    pub l2_enabled: Option<bool>,
}

/// An ordered rule set.
///
/// Evaluation order is declaration order. Constitutional rules cannot be
/// removed, and only they may carry a primitive override.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<DomainRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[DomainRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&DomainRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Append a rule at the end of the evaluation order.
    pub fn push(&mut self, rule: DomainRule) -> Result<(), GovernanceError> {
        validate(&rule)?;
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(GovernanceError::DuplicateRule(rule.id));
        }
        info!(rule_id = %rule.id, precedence = ?rule.precedence, "Governor rule added");
        self.rules.push(rule);
        Ok(())
    }

    /// Remove a non-constitutional rule.
    pub fn remove(&mut self, id: &str) -> Result<DomainRule, GovernanceError> {
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| GovernanceError::RuleNotFound(id.to_string()))?;
        if self.rules[idx].is_constitutional() {
            return Err(GovernanceError::ConstitutionalRuleRemoval(id.to_string()));
        }
        warn!(rule_id = %id, "Governor rule removed");
        Ok(self.rules.remove(idx))
    }

    pub fn from_json(json: &str) -> Result<Self, GovernanceError> {
        let parsed: RuleSet = serde_json::from_str(json)?;
        let mut set = RuleSet::new();
        for rule in parsed.rules {
            set.push(rule)?;
        }
        Ok(set)
    }

    pub fn to_json(&self) -> Result<String, GovernanceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The shipped rule set, in evaluation order.
    pub fn constitutional_defaults() -> Self {
        use ConstitutionalAction as A;

        let rules = vec![
            DomainRule {
                id: "BASE-HUMAN-FIELD".into(),
                description: "Baseline: open human field".into(),
                precedence: Precedence::Default,
                condition: RuleCondition::Always,
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::HumanField),
                    mode: Some(Mode::Expand),
                    pacing: Some(Pacing::Normal),
                    ..Default::default()
                },
            },
            DomainRule {
                id: "CONST-EMERGENCY".into(),
                description: "Acute distress: ground, stay present, no advice".into(),
                precedence: Precedence::Constitutional,
                condition: RuleCondition::SafetyFlag(SafetyFlag::Emergency),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Emergency),
                    mode: Some(Mode::Regulate),
                    depth_ceiling: Some(Depth::Surface),
                    forbid: vec![
                        A::GiveAdvice,
                        A::Recommend,
                        A::Diagnose,
                        A::ExploreDepth,
                        A::Interpret,
                        A::MakeDecision,
                    ],
                    require: vec![A::Ground, A::Presence],
                    pacing: Some(Pacing::Slow),
                    primitive: Some(Primitive::Ground),
                    escalate: true,
                    l2_enabled: Some(false),
                },
            },
            DomainRule {
                id: "CONST-ACUTE-RISK".into(),
                description: "Risk to life: presence and referral to support".into(),
                precedence: Precedence::Constitutional,
                condition: RuleCondition::SafetyFlag(SafetyFlag::AcuteRisk),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Emergency),
                    mode: Some(Mode::Regulate),
                    depth_ceiling: Some(Depth::Surface),
                    forbid: vec![
                        A::GiveAdvice,
                        A::Recommend,
                        A::Diagnose,
                        A::ExploreDepth,
                        A::Interpret,
                        A::MakeDecision,
                    ],
                    require: vec![A::Presence, A::ReferToSupport],
                    pacing: Some(Pacing::Slow),
                    primitive: Some(Primitive::Ground),
                    escalate: true,
                    l2_enabled: Some(false),
                },
            },
            DomainRule {
                id: "CONST-NO-DIAGNOSIS".into(),
                description: "Never diagnose, never assign identity".into(),
                precedence: Precedence::Constitutional,
                condition: RuleCondition::Always,
                effect: RuleEffect {
                    forbid: vec![A::Diagnose, A::AssignIdentity],
                    ..Default::default()
                },
            },
            DomainRule {
                id: "SAFETY-ELEVATED-PROTECTION".into(),
                description: "Deep existential load: slow down, return ownership".into(),
                precedence: Precedence::Safety,
                condition: RuleCondition::SafetyFlag(SafetyFlag::ElevatedProtection),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Existential),
                    depth_ceiling: Some(Depth::Medium),
                    forbid: vec![A::MakeDecision, A::Recommend, A::Interpret],
                    require: vec![A::ReturnOwnership],
                    pacing: Some(Pacing::Conservative),
                    ..Default::default()
                },
            },
            DomainRule {
                id: "SAFETY-DELEGATION".into(),
                description: "User hands over agency: hand it back".into(),
                precedence: Precedence::Safety,
                condition: RuleCondition::SafetyFlag(SafetyFlag::DelegationAttempt),
                effect: RuleEffect {
                    mode: Some(Mode::Contract),
                    depth_ceiling: Some(Depth::Medium),
                    forbid: vec![A::MakeDecision, A::Recommend],
                    require: vec![A::ReturnOwnership],
                    pacing: Some(Pacing::Conservative),
                    ..Default::default()
                },
            },
            DomainRule {
                id: "DOMAIN-DECISION".into(),
                description: "Normative decision request: map options, do not choose".into(),
                precedence: Precedence::Domain,
                condition: RuleCondition::SafetyFlag(SafetyFlag::DecisionRequest),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Decision),
                    mode: Some(Mode::Contract),
                    depth_ceiling: Some(Depth::Medium),
                    forbid: vec![A::MakeDecision, A::Recommend],
                    require: vec![A::ReturnOwnership],
                    ..Default::default()
                },
            },
            DomainRule {
                id: "DOMAIN-IDENTITY".into(),
                description: "Identity question: reflect, do not define".into(),
                precedence: Precedence::Domain,
                condition: RuleCondition::SafetyFlag(SafetyFlag::IdentityAssignment),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Existential),
                    depth_ceiling: Some(Depth::Medium),
                    forbid: vec![A::AssignIdentity, A::Interpret],
                    require: vec![A::Reflect, A::ReturnOwnership],
                    ..Default::default()
                },
            },
            DomainRule {
                id: "SAFETY-HIGH-AROUSAL".into(),
                description: "High arousal: regulate before anything else".into(),
                precedence: Precedence::Safety,
                condition: RuleCondition::ArousalAtLeast(Arousal::High),
                effect: RuleEffect {
                    mode: Some(Mode::Regulate),
                    depth_ceiling: Some(Depth::Surface),
                    forbid: vec![A::ExploreDepth],
                    require: vec![A::Ground],
                    pacing: Some(Pacing::Slow),
                    ..Default::default()
                },
            },
            DomainRule {
                id: "DOMAIN-LOOP".into(),
                description: "Circling the same topic: summarise and narrow".into(),
                precedence: Precedence::Domain,
                condition: RuleCondition::LoopCountAtLeast(3),
                effect: RuleEffect {
                    mode: Some(Mode::Contract),
                    depth_ceiling: Some(Depth::Medium),
                    forbid: vec![A::ExploreDepth],
                    require: vec![A::Summarize],
                    ..Default::default()
                },
            },
            DomainRule {
                id: "DEFAULT-UNCERTAIN".into(),
                description: "Weak signal: ask rather than assume".into(),
                precedence: Precedence::Default,
                condition: RuleCondition::All(vec![
                    RuleCondition::UncertaintyAbove(0.7),
                    RuleCondition::negate(RuleCondition::SafetyFlag(SafetyFlag::Emergency)),
                    RuleCondition::negate(RuleCondition::SafetyFlag(SafetyFlag::AcuteRisk)),
                ]),
                effect: RuleEffect {
                    depth_ceiling: Some(Depth::Medium),
                    require: vec![A::AskOpenQuestion],
                    ..Default::default()
                },
            },
            DomainRule {
                id: "DEFAULT-OPERATIONAL".into(),
                description: "Practical request: plain operational register".into(),
                precedence: Precedence::Default,
                condition: RuleCondition::All(vec![
                    RuleCondition::GoalIs(Goal::Inform),
                    RuleCondition::negate(RuleCondition::SafetyFlag(SafetyFlag::ElevatedProtection)),
                ]),
                effect: RuleEffect {
                    atmosphere: Some(Atmosphere::Operational),
                    pacing: Some(Pacing::Responsive),
                    ..Default::default()
                },
            },
        ];

        let mut set = RuleSet::new();
        for rule in rules {
            // The shipped rules are validated by `default_rules_are_valid`.
            if let Err(e) = set.push(rule) {
                warn!(error = %e, "Skipping invalid default rule");
            }
        }
        set
    }
}

fn validate(rule: &DomainRule) -> Result<(), GovernanceError> {
    if rule.effect.primitive.is_some() && !rule.is_constitutional() {
        return Err(GovernanceError::PrimitiveOverrideNotConstitutional(
            rule.id.clone(),
        ));
    }
    if let Some(action) = rule
        .effect
        .forbid
        .iter()
        .find(|a| rule.effect.require.contains(a))
    {
        return Err(GovernanceError::SelfContradictoryRule {
            rule_id: rule.id.clone(),
            action: action.as_str().to_string(),
        });
    }
    Ok(())
}
