//! FieldState assembly.
//!
//! Joins the classifier and detector outputs into the single
//! [`FieldState`] consumed by the governor, meta-kernel and selector.

use std::collections::BTreeSet;

use covenant_types::{
    Arousal, CoherenceLevel, DomainActivation, FieldState, GateSignal, Goal, HorizontalDomain,
    SafetyFlag, Valence, VerticalBand,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{Classification, CounterSignal, ReasonCode};
use crate::detector::Detection;
use crate::error::PerceptionError;
use crate::lexicon::{self, PatternGroup};

/// Horizontal scores above this become domain activations.
pub const ACTIVATION_FLOOR: f64 = 0.1;

/// What the assembler needs to remember from the previous turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopHistory {
    pub previous_primary: Vec<HorizontalDomain>,
    pub loop_count: u32,
}

/// Builds [`FieldState`]s.
#[derive(Clone, Debug)]
pub struct FieldAssembler {
    positive: PatternGroup,
    negative: PatternGroup,
    decision_markers: PatternGroup,
}

impl FieldAssembler {
    pub fn new() -> Result<Self, PerceptionError> {
        Ok(Self {
            positive: PatternGroup::compile(lexicon::POSITIVE_VALENCE)?,
            negative: PatternGroup::compile(lexicon::NEGATIVE_VALENCE)?,
            decision_markers: PatternGroup::compile(lexicon::DECISION_MARKERS)?,
        })
    }

    /// Count of distinct first-person decision markers in the text.
    pub fn decision_markers(&self, text: &str) -> u32 {
        self.decision_markers
            .score(&lexicon::normalize(text))
            .matched
            .len() as u32
    }

    pub fn assemble(
        &self,
        text: &str,
        classification: &Classification,
        detection: &Detection,
        history: &LoopHistory,
        language: Option<String>,
    ) -> FieldState {
        if classification.reason_code == ReasonCode::Unclassifiable {
            return FieldState::minimal(language);
        }
        let dims = &detection.state;
        let normalized = lexicon::normalize(text);

        let domains: Vec<DomainActivation> = dims
            .horizontal
            .iter()
            .filter(|(_, score)| **score > ACTIVATION_FLOOR)
            .map(|(domain, score)| {
                let evidence = detection.evidence.get(domain).cloned().unwrap_or_default();
                DomainActivation {
                    domain: *domain,
                    salience: *score,
                    confidence: Some((evidence.len() as f64 / 3.0).min(1.0)),
                    evidence,
                }
            })
            .collect();

        let mut safety_flags = BTreeSet::new();
        match classification.signal {
            GateSignal::D1 => {
                safety_flags.insert(SafetyFlag::AcuteRisk);
            }
            GateSignal::D2 => {
                safety_flags.insert(SafetyFlag::DelegationAttempt);
            }
            GateSignal::D3 => {
                safety_flags.insert(SafetyFlag::DecisionRequest);
            }
            GateSignal::D4 => {
                safety_flags.insert(SafetyFlag::IdentityAssignment);
            }
            GateSignal::Null => {}
        }
        if dims.emergency_detected {
            safety_flags.insert(SafetyFlag::Emergency);
        }
        if dims.elevated_protection {
            safety_flags.insert(SafetyFlag::ElevatedProtection);
        }
        if classification.has_counter(CounterSignal::AdversarialPhrasing) {
            safety_flags.insert(SafetyFlag::AdversarialPhrasing);
        }

        let mut flags = BTreeSet::new();
        if classification.has_counter(CounterSignal::AdversarialPhrasing) {
            flags.insert("minimizing_phrasing".to_string());
        }
        if classification.has_counter(CounterSignal::NormativeFraming) {
            flags.insert("normative_framing".to_string());
        }
        if classification.reason_code == ReasonCode::Suppressed {
            flags.insert("signal_suppressed".to_string());
        }
        if dims.integration.tension > 0.5 {
            flags.insert("high_tension".to_string());
        }

        let top_vertical = dims.vertical.values().copied().fold(0.0_f64, f64::max);
        let arousal = if dims.emergency_detected
            || classification.signal == GateSignal::D1
            || dims.vertical_score(VerticalBand::Somatic) > 0.6
        {
            Arousal::High
        } else if top_vertical > 0.3 {
            Arousal::Medium
        } else {
            Arousal::Low
        };

        let valence = match (
            self.positive.score(&normalized).fired(),
            self.negative.score(&normalized).fired(),
        ) {
            (true, true) => Valence::Mixed,
            (true, false) => Valence::Positive,
            (false, true) => Valence::Negative,
            (false, false) => Valence::Neutral,
        };

        let coherence = if dims.integration.coherence >= 0.75 {
            CoherenceLevel::High
        } else if dims.integration.coherence >= 0.4 {
            CoherenceLevel::Medium
        } else {
            CoherenceLevel::Low
        };

        let goal = infer_goal(classification, detection, arousal, &normalized);

        let max_salience = domains.iter().map(|d| d.salience).fold(0.0_f64, f64::max);
        let uncertainty = (1.0 - max_salience).clamp(0.0, 1.0);

        let loop_count = if !dims.primary_horizontal.is_empty()
            && dims.primary_horizontal == history.previous_primary
        {
            history.loop_count.saturating_add(1)
        } else {
            0
        };

        debug!(
            signal = ?classification.signal,
            ?goal,
            ?arousal,
            loop_count,
            uncertainty,
            "Field state assembled"
        );

        FieldState {
            domains,
            arousal,
            valence,
            coherence,
            goal,
            loop_count,
            flags,
            safety_flags,
            uncertainty,
            language,
        }
    }
}

fn infer_goal(
    classification: &Classification,
    detection: &Detection,
    arousal: Arousal,
    normalized: &str,
) -> Goal {
    let dims = &detection.state;
    match classification.signal {
        GateSignal::D3 => return Goal::Decide,
        GateSignal::D2 => return Goal::Delegate,
        _ => {}
    }
    if dims.emergency_detected || arousal == Arousal::High {
        return Goal::Regulate;
    }
    let top = dims.top_vertical_score();
    if top > 0.0 && dims.primary_vertical.is_elevated() {
        return Goal::Explore;
    }
    if top > 0.0 && dims.primary_vertical == VerticalBand::Relational {
        let lonely = dims.horizontal_score(HorizontalDomain::Belonging) > 0.3
            || dims.horizontal_score(HorizontalDomain::Attachment) > 0.3;
        if lonely {
            return Goal::Connect;
        }
    }
    let is_question = normalized.contains('?')
        || normalized.starts_with("how ")
        || normalized.starts_with("what ")
        || normalized.starts_with("can ");
    if top > 0.0 && dims.primary_vertical == VerticalBand::Functional && is_question {
        return Goal::Inform;
    }
    if dims.horizontal_score(HorizontalDomain::Emotion) > 0.3 {
        return Goal::Process;
    }
    if is_question {
        return Goal::Inform;
    }
    Goal::Unclear
}
