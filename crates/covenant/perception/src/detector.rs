//! Dimensional detector.
//!
//! Scores five vertical bands and twelve horizontal domains, computes the
//! integration metric, and sets the emergency and elevated-protection flags.
//!
//! Emergency is decided only by emergency-marker evidence, net of romantic
//! and colloquial counter-evidence. Vertical scores never imply it.

use std::collections::BTreeMap;

use covenant_types::{DimensionalState, HorizontalDomain, IntegrationMetrics, VerticalBand};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PerceptionError;
use crate::lexicon::{self, PatternGroup};

/// Top vertical score above which elevated-protection mode engages.
///
/// Strict `>`: a score of exactly 0.6 does not trigger. Short inputs on a
/// high-severity topic often land under this line and stay unprotected;
/// that gap is accepted behaviour.
pub const ELEVATED_THRESHOLD: f64 = 0.6;

/// Detector tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Weight of the current turn when smoothing against a prior (0..=1)
    pub smoothing_alpha: f64,
    /// Domains within this distance of the maximum are all primary
    pub primary_epsilon: f64,
    /// Net emergency evidence required to flag an emergency
    pub emergency_margin: f64,
    /// Domains scoring above this are active for the integration metric
    pub activation_floor: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.7,
            primary_epsilon: 0.05,
            emergency_margin: 0.5,
            activation_floor: 0.1,
        }
    }
}

/// Emergency evidence balance for one message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmergencyEvidence {
    pub positive: f64,
    pub negative: f64,
    pub independent: bool,
    pub markers: Vec<&'static str>,
    pub counters: Vec<&'static str>,
}

impl EmergencyEvidence {
    pub fn net(&self) -> f64 {
        self.positive - self.negative
    }
}

/// Detector output plus the per-domain evidence that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub state: DimensionalState,
    pub evidence: BTreeMap<HorizontalDomain, Vec<String>>,
    pub emergency: EmergencyEvidence,
}

/// The compiled dimensional detector.
#[derive(Clone, Debug)]
pub struct DimensionalDetector {
    config: DetectorConfig,
    vertical: Vec<(VerticalBand, PatternGroup)>,
    horizontal: Vec<(HorizontalDomain, PatternGroup)>,
    emergency_positive: PatternGroup,
    emergency_counter: PatternGroup,
}

impl DimensionalDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, PerceptionError> {
        let vertical = vec![
            (VerticalBand::Somatic, PatternGroup::compile(lexicon::SOMATIC)?),
            (VerticalBand::Functional, PatternGroup::compile(lexicon::FUNCTIONAL)?),
            (VerticalBand::Relational, PatternGroup::compile(lexicon::RELATIONAL)?),
            (VerticalBand::Existential, PatternGroup::compile(lexicon::EXISTENTIAL)?),
            (VerticalBand::Transcendent, PatternGroup::compile(lexicon::TRANSCENDENT)?),
        ];
        let horizontal = vec![
            (HorizontalDomain::Survival, PatternGroup::compile(lexicon::H_SURVIVAL)?),
            (HorizontalDomain::Safety, PatternGroup::compile(lexicon::H_SAFETY)?),
            (HorizontalDomain::Body, PatternGroup::compile(lexicon::H_BODY)?),
            (HorizontalDomain::Emotion, PatternGroup::compile(lexicon::H_EMOTION)?),
            (HorizontalDomain::Cognition, PatternGroup::compile(lexicon::H_COGNITION)?),
            (HorizontalDomain::Meaning, PatternGroup::compile(lexicon::H_MEANING)?),
            (HorizontalDomain::Identity, PatternGroup::compile(lexicon::H_IDENTITY)?),
            (HorizontalDomain::Temporal, PatternGroup::compile(lexicon::H_TEMPORAL)?),
            (HorizontalDomain::Attachment, PatternGroup::compile(lexicon::H_ATTACHMENT)?),
            (HorizontalDomain::Belonging, PatternGroup::compile(lexicon::H_BELONGING)?),
            (HorizontalDomain::Work, PatternGroup::compile(lexicon::H_WORK)?),
            (HorizontalDomain::Decision, PatternGroup::compile(lexicon::H_DECISION)?),
        ];
        Ok(Self {
            config,
            vertical,
            horizontal,
            emergency_positive: PatternGroup::compile(lexicon::EMERGENCY_POSITIVE)?,
            emergency_counter: PatternGroup::compile(lexicon::EMERGENCY_COUNTER)?,
        })
    }

    pub fn with_defaults() -> Result<Self, PerceptionError> {
        Self::new(DetectorConfig::default())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score a message, optionally smoothing against the previous turn.
    pub fn detect(
        &self,
        message: &str,
        language: &str,
        prior: Option<&DimensionalState>,
    ) -> DimensionalState {
        self.analyze(message, language, prior).state
    }

    /// Like [`detect`](Self::detect) but keeps the matched pattern ids.
    pub fn analyze(
        &self,
        message: &str,
        language: &str,
        prior: Option<&DimensionalState>,
    ) -> Detection {
        if !language.eq_ignore_ascii_case("en") && !language.is_empty() {
            debug!(language, "No lexicon for language, using English patterns");
        }
        if lexicon::is_unreadable(message) {
            let mut state = DimensionalState::empty();
            if let Some(prior) = prior {
                state = self.finish(
                    smooth(&state.vertical, &prior.vertical, self.config.smoothing_alpha),
                    smooth(&state.horizontal, &prior.horizontal, self.config.smoothing_alpha),
                    false,
                );
            }
            return Detection {
                state,
                evidence: BTreeMap::new(),
                emergency: EmergencyEvidence::default(),
            };
        }

        let text = lexicon::normalize(message);

        let mut vertical = BTreeMap::new();
        for (band, group) in &self.vertical {
            vertical.insert(*band, group.score(&text).score);
        }

        let mut horizontal = BTreeMap::new();
        let mut evidence = BTreeMap::new();
        for (domain, group) in &self.horizontal {
            let scored = group.score(&text);
            if scored.fired() {
                evidence.insert(
                    *domain,
                    scored.matched.iter().map(|id| id.to_string()).collect(),
                );
            }
            horizontal.insert(*domain, scored.score);
        }

        let emergency = self.emergency_evidence(&text);
        let emergency_detected = emergency.net() >= self.config.emergency_margin
            && (emergency.counters.is_empty() || emergency.independent);
        if emergency_detected {
            warn!(
                net = emergency.net(),
                markers = ?emergency.markers,
                "Emergency detected"
            );
        } else if !emergency.markers.is_empty() {
            debug!(
                net = emergency.net(),
                counters = ?emergency.counters,
                "Emergency markers present but not conclusive"
            );
        }

        if let Some(prior) = prior {
            vertical = smooth(&vertical, &prior.vertical, self.config.smoothing_alpha);
            horizontal = smooth(&horizontal, &prior.horizontal, self.config.smoothing_alpha);
        }

        Detection {
            state: self.finish(vertical, horizontal, emergency_detected),
            evidence,
            emergency,
        }
    }

    fn emergency_evidence(&self, text: &str) -> EmergencyEvidence {
        let positive = self.emergency_positive.score(text);
        let negative = self.emergency_counter.score(text);
        EmergencyEvidence {
            positive: positive.raw,
            negative: negative.raw,
            independent: positive
                .matched
                .iter()
                .any(|id| lexicon::EMERGENCY_INDEPENDENT.contains(id)),
            markers: positive.matched,
            counters: negative.matched,
        }
    }

    fn finish(
        &self,
        vertical: BTreeMap<VerticalBand, f64>,
        horizontal: BTreeMap<HorizontalDomain, f64>,
        emergency_detected: bool,
    ) -> DimensionalState {
        let primary_vertical = primary_vertical(&vertical);
        let primary_horizontal = primary_horizontal(&horizontal, self.config.primary_epsilon);
        let integration = integration(&horizontal, self.config.activation_floor);
        let elevated = elevated_protection(&vertical, primary_vertical);
        if elevated {
            debug!(
                band = primary_vertical.as_str(),
                score = vertical.get(&primary_vertical).copied().unwrap_or(0.0),
                "Elevated protection engaged"
            );
        }
        DimensionalState {
            vertical,
            horizontal,
            integration,
            primary_vertical,
            primary_horizontal,
            elevated_protection: elevated,
            emergency_detected,
        }
    }
}

/// Whether elevated-protection mode engages for these vertical scores.
///
/// True iff the primary band is one of the two highest-severity bands and
/// its score is strictly above [`ELEVATED_THRESHOLD`].
pub fn elevated_protection(vertical: &BTreeMap<VerticalBand, f64>, primary: VerticalBand) -> bool {
    let top = vertical.get(&primary).copied().unwrap_or(0.0);
    primary.is_elevated() && top > ELEVATED_THRESHOLD
}

/// Argmax over vertical bands; ties go to the higher-severity band.
///
/// With every score at zero there is no evidence of depth, so the lowest
/// band is returned.
pub fn primary_vertical(vertical: &BTreeMap<VerticalBand, f64>) -> VerticalBand {
    let mut best = VerticalBand::Somatic;
    let mut best_score = 0.0;
    for band in VerticalBand::ALL {
        let score = vertical.get(&band).copied().unwrap_or(0.0);
        if score > 0.0 && score >= best_score {
            best = band;
            best_score = score;
        }
    }
    best
}

/// Every domain within `epsilon` of the maximum. Empty when nothing scored.
pub fn primary_horizontal(
    horizontal: &BTreeMap<HorizontalDomain, f64>,
    epsilon: f64,
) -> Vec<HorizontalDomain> {
    let max = horizontal.values().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return Vec::new();
    }
    horizontal
        .iter()
        .filter(|(_, score)| max - **score <= epsilon)
        .map(|(domain, _)| *domain)
        .collect()
}

/// Integration metric over the horizontal scores.
///
/// - differentiation: normalised Shannon entropy of active-domain scores
/// - tension: strongest co-activation of any conflicting pair
/// - coherence: `1 - tension`
/// - phi: `differentiation * coherence`
/// - complexity: fraction of domains active
pub fn integration(
    horizontal: &BTreeMap<HorizontalDomain, f64>,
    activation_floor: f64,
) -> IntegrationMetrics {
    let active: Vec<f64> = horizontal
        .values()
        .copied()
        .filter(|s| *s > activation_floor)
        .collect();
    let total = HorizontalDomain::ALL.len() as f64;

    let tension = HorizontalDomain::CONFLICTS
        .iter()
        .map(|(a, b)| {
            let sa = horizontal.get(a).copied().unwrap_or(0.0);
            let sb = horizontal.get(b).copied().unwrap_or(0.0);
            sa.min(sb)
        })
        .fold(0.0_f64, f64::max);
    let coherence = 1.0 - tension;

    let sum: f64 = active.iter().sum();
    let differentiation = if active.len() < 2 || sum <= 0.0 {
        0.0
    } else {
        let entropy: f64 = active
            .iter()
            .map(|s| {
                let p = s / sum;
                -p * p.ln()
            })
            .sum();
        (entropy / total.ln()).clamp(0.0, 1.0)
    };

    IntegrationMetrics {
        phi: differentiation * coherence,
        complexity: active.len() as f64 / total,
        coherence,
        tension,
    }
}

/// Convex combination `alpha * current + (1 - alpha) * prior` per key.
pub fn smooth<K: Ord + Copy>(
    current: &BTreeMap<K, f64>,
    prior: &BTreeMap<K, f64>,
    alpha: f64,
) -> BTreeMap<K, f64> {
    let alpha = alpha.clamp(0.0, 1.0);
    current
        .iter()
        .map(|(key, now)| {
            let before = prior.get(key).copied().unwrap_or(0.0);
            (*key, (alpha * now + (1.0 - alpha) * before).clamp(0.0, 1.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DimensionalDetector {
        DimensionalDetector::with_defaults().unwrap()
    }

    fn bands(pairs: &[(VerticalBand, f64)]) -> BTreeMap<VerticalBand, f64> {
        let mut map: BTreeMap<_, _> = VerticalBand::ALL.iter().map(|b| (*b, 0.0)).collect();
        for (band, score) in pairs {
            map.insert(*band, *score);
        }
        map
    }

    #[test]
    fn panic_is_somatic_emergency() {
        let state = detector().detect("I can't breathe, my heart is pounding, I'm scared", "en", None);
        assert!(state.emergency_detected);
        assert_eq!(state.primary_vertical, VerticalBand::Somatic);
    }

    #[test]
    fn romantic_heart_is_not_emergency() {
        let state = detector().detect("My heart races when I think of you", "en", None);
        assert!(!state.emergency_detected);
    }

    #[test]
    fn colloquial_breath_is_not_emergency() {
        let state = detector().detect("I was laughing so hard I couldn't breathe lol", "en", None);
        assert!(!state.emergency_detected);
    }

    #[test]
    fn independent_evidence_beats_counter() {
        let state = detector().detect(
            "I love you guys but I have chest pain and I can't breathe, call an ambulance",
            "en",
            None,
        );
        assert!(state.emergency_detected);
    }

    #[test]
    fn vertical_score_alone_never_implies_emergency() {
        let state = detector().detect(
            "My body aches, I'm exhausted, headache and nausea, can't sleep",
            "en",
            None,
        );
        assert!(state.vertical_score(VerticalBand::Somatic) > 0.6);
        assert!(!state.emergency_detected);
    }

    #[test]
    fn elevated_threshold_boundary() {
        let at = bands(&[(VerticalBand::Existential, 0.6)]);
        assert!(!elevated_protection(&at, VerticalBand::Existential));
        let above = bands(&[(VerticalBand::Existential, 0.6000001)]);
        assert!(elevated_protection(&above, VerticalBand::Existential));
    }

    #[test]
    fn elevated_requires_high_band() {
        let somatic = bands(&[(VerticalBand::Somatic, 0.95)]);
        assert!(!elevated_protection(&somatic, VerticalBand::Somatic));
        let transcendent = bands(&[(VerticalBand::Transcendent, 0.9)]);
        assert!(elevated_protection(&transcendent, VerticalBand::Transcendent));
    }

    #[test]
    fn short_existential_input_stays_under_threshold() {
        let state = detector().detect("What's the point?", "en", None);
        assert_eq!(state.primary_vertical, VerticalBand::Existential);
        assert!(state.top_vertical_score() <= ELEVATED_THRESHOLD);
        assert!(!state.elevated_protection);
    }

    #[test]
    fn long_existential_input_triggers_elevated() {
        let state = detector().detect(
            "Nothing matters anymore. What's the point of life, it all feels meaningless and I think about death",
            "en",
            None,
        );
        assert_eq!(state.primary_vertical, VerticalBand::Existential);
        assert!(state.elevated_protection);
    }

    #[test]
    fn tie_breaks_toward_higher_band() {
        let tied = bands(&[(VerticalBand::Relational, 0.5), (VerticalBand::Existential, 0.5)]);
        assert_eq!(primary_vertical(&tied), VerticalBand::Existential);
        assert_eq!(primary_vertical(&bands(&[])), VerticalBand::Somatic);
    }

    #[test]
    fn primary_horizontal_uses_epsilon() {
        let mut scores: BTreeMap<_, _> =
            HorizontalDomain::ALL.iter().map(|d| (*d, 0.0)).collect();
        scores.insert(HorizontalDomain::Work, 0.8);
        scores.insert(HorizontalDomain::Body, 0.77);
        scores.insert(HorizontalDomain::Emotion, 0.5);
        assert_eq!(
            primary_horizontal(&scores, 0.05),
            vec![HorizontalDomain::Body, HorizontalDomain::Work]
        );
        let zero: BTreeMap<_, _> = HorizontalDomain::ALL.iter().map(|d| (*d, 0.0)).collect();
        assert!(primary_horizontal(&zero, 0.05).is_empty());
    }

    #[test]
    fn conflicting_domains_raise_tension() {
        let mut calm: BTreeMap<_, _> = HorizontalDomain::ALL.iter().map(|d| (*d, 0.0)).collect();
        calm.insert(HorizontalDomain::Emotion, 0.8);
        calm.insert(HorizontalDomain::Meaning, 0.8);
        let mut torn = calm.clone();
        torn.insert(HorizontalDomain::Meaning, 0.0);
        torn.insert(HorizontalDomain::Cognition, 0.8);

        let calm_m = integration(&calm, 0.1);
        let torn_m = integration(&torn, 0.1);
        assert_eq!(calm_m.tension, 0.0);
        assert!((torn_m.tension - 0.8).abs() < 1e-9);
        assert!(torn_m.phi < calm_m.phi);
    }

    #[test]
    fn smoothing_is_convex() {
        let now = bands(&[(VerticalBand::Existential, 1.0)]);
        let before = bands(&[(VerticalBand::Somatic, 1.0)]);
        let smoothed = smooth(&now, &before, 0.7);
        assert!((smoothed[&VerticalBand::Existential] - 0.7).abs() < 1e-9);
        assert!((smoothed[&VerticalBand::Somatic] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn prior_damps_reversal() {
        let d = detector();
        let prior = d.detect(
            "Nothing matters, what's the point of life, it all feels meaningless",
            "en",
            None,
        );
        let next = d.detect("I have a work deadline", "en", Some(&prior));
        assert!(next.vertical_score(VerticalBand::Existential) > 0.0);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let state = detector().detect("   ", "en", None);
        assert_eq!(state, DimensionalState::empty());
    }
}
