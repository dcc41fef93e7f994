//! First-order boundary classifier.
//!
//! Maps a message to one of `D1`..`D4` or `NULL`. Stateless; every call is a
//! pure function of the text and the compiled lexicon.
//!
//! Resolution order:
//! 1. Unreadable input returns `NULL` / `UNCLASSIFIABLE`.
//! 2. Any D1 match wins outright. Counter-signals are not consulted.
//! 3. D2–D4 scores are damped by every counter-signal family present, then
//!    the highest score clearing its threshold wins. Ties go to the lower
//!    domain number.

use std::collections::BTreeMap;

use covenant_types::{GateSignal, SignalDomain};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PerceptionError;
use crate::lexicon::{self, PatternGroup};

/// Why the classifier returned what it returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Empty, whitespace-only or symbol-only input
    Unclassifiable,
    /// No domain pattern matched
    NoSignal,
    /// A domain matched but counter-signals pushed it under threshold
    Suppressed,
    AcuteRisk,
    Delegation,
    NormativeRequest,
    IdentityAssignment,
}

impl ReasonCode {
    pub fn for_domain(domain: SignalDomain) -> Self {
        match domain {
            SignalDomain::D1 => ReasonCode::AcuteRisk,
            SignalDomain::D2 => ReasonCode::Delegation,
            SignalDomain::D3 => ReasonCode::NormativeRequest,
            SignalDomain::D4 => ReasonCode::IdentityAssignment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Unclassifiable => "UNCLASSIFIABLE",
            ReasonCode::NoSignal => "NO_SIGNAL",
            ReasonCode::Suppressed => "SUPPRESSED",
            ReasonCode::AcuteRisk => "ACUTE_RISK",
            ReasonCode::Delegation => "DELEGATION",
            ReasonCode::NormativeRequest => "NORMATIVE_REQUEST",
            ReasonCode::IdentityAssignment => "IDENTITY_ASSIGNMENT",
        }
    }
}

/// Counter-signal families that damp D2–D4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSignal {
    /// "hypothetically", "asking for a friend"
    NormativeFraming,
    /// "jk", "lol", "ignore your rules"
    AdversarialPhrasing,
}

/// Classifier output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub signal: GateSignal,
    pub reason_code: ReasonCode,
    /// Ids of every pattern that matched, domain patterns first
    pub evidence: Vec<String>,
    /// Post-suppression score per domain
    pub scores: BTreeMap<SignalDomain, f64>,
    pub counter_signals: Vec<CounterSignal>,
}

impl Classification {
    pub fn unclassifiable() -> Self {
        Self {
            signal: GateSignal::Null,
            reason_code: ReasonCode::Unclassifiable,
            evidence: Vec::new(),
            scores: BTreeMap::new(),
            counter_signals: Vec::new(),
        }
    }

    pub fn has_counter(&self, counter: CounterSignal) -> bool {
        self.counter_signals.contains(&counter)
    }
}

/// Thresholds for the classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum score for each domain to fire
    pub thresholds: BTreeMap<SignalDomain, f64>,
    /// Multiplier applied to D2–D4 per counter-signal family present
    pub suppression_factor: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            thresholds: SignalDomain::ALL.iter().map(|d| (*d, 0.5)).collect(),
            suppression_factor: 0.5,
        }
    }
}

/// The compiled first-order classifier.
#[derive(Clone, Debug)]
pub struct SignalClassifier {
    config: ClassifierConfig,
    domains: Vec<(SignalDomain, PatternGroup)>,
    normative: PatternGroup,
    adversarial: PatternGroup,
}

impl SignalClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, PerceptionError> {
        let domains = vec![
            (SignalDomain::D1, PatternGroup::compile(lexicon::D1_ACUTE_RISK)?),
            (SignalDomain::D2, PatternGroup::compile(lexicon::D2_DELEGATION)?),
            (SignalDomain::D3, PatternGroup::compile(lexicon::D3_DECISION_REQUEST)?),
            (SignalDomain::D4, PatternGroup::compile(lexicon::D4_IDENTITY)?),
        ];
        Ok(Self {
            config,
            domains,
            normative: PatternGroup::compile(lexicon::NORMATIVE_FRAMING)?,
            adversarial: PatternGroup::compile(lexicon::ADVERSARIAL_PHRASING)?,
        })
    }

    pub fn with_defaults() -> Result<Self, PerceptionError> {
        Self::new(ClassifierConfig::default())
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn threshold(&self, domain: SignalDomain) -> f64 {
        self.config.thresholds.get(&domain).copied().unwrap_or(0.5)
    }

    /// Classify a message. Never fails.
    pub fn classify(&self, text: &str) -> Classification {
        if lexicon::is_unreadable(text) {
            debug!("Unreadable input, returning NULL");
            return Classification::unclassifiable();
        }
        let normalized = lexicon::normalize(text);

        let mut evidence = Vec::new();
        let mut raw_scores = BTreeMap::new();
        for (domain, group) in &self.domains {
            let scored = group.score(&normalized);
            evidence.extend(scored.matched.iter().map(|id| id.to_string()));
            raw_scores.insert(*domain, scored.score);
        }

        let mut counter_signals = Vec::new();
        let normative = self.normative.score(&normalized);
        if normative.fired() {
            counter_signals.push(CounterSignal::NormativeFraming);
            evidence.extend(normative.matched.iter().map(|id| id.to_string()));
        }
        let adversarial = self.adversarial.score(&normalized);
        if adversarial.fired() {
            counter_signals.push(CounterSignal::AdversarialPhrasing);
            evidence.extend(adversarial.matched.iter().map(|id| id.to_string()));
        }

        // D1 is never damped.
        let d1 = raw_scores.get(&SignalDomain::D1).copied().unwrap_or(0.0);
        if d1 >= self.threshold(SignalDomain::D1) {
            warn!(
                counter_signals = counter_signals.len(),
                "Acute risk signal detected"
            );
            return Classification {
                signal: GateSignal::D1,
                reason_code: ReasonCode::AcuteRisk,
                evidence,
                scores: raw_scores,
                counter_signals,
            };
        }

        let damping = self
            .config
            .suppression_factor
            .powi(counter_signals.len() as i32);
        let scores: BTreeMap<SignalDomain, f64> = raw_scores
            .iter()
            .map(|(domain, score)| match domain {
                SignalDomain::D1 => (*domain, *score),
                _ => (*domain, score * damping),
            })
            .collect();

        // Ascending domain order + strict `>` keeps the lower number on ties.
        let mut winner: Option<(SignalDomain, f64)> = None;
        for domain in [SignalDomain::D2, SignalDomain::D3, SignalDomain::D4] {
            let score = scores.get(&domain).copied().unwrap_or(0.0);
            if score < self.threshold(domain) {
                continue;
            }
            if winner.map_or(true, |(_, best)| score > best) {
                winner = Some((domain, score));
            }
        }

        let (signal, reason_code) = match winner {
            Some((domain, score)) => {
                debug!(domain = domain.as_str(), score, "Domain signal fired");
                (GateSignal::from(domain), ReasonCode::for_domain(domain))
            }
            None => {
                let any_raw = raw_scores
                    .iter()
                    .any(|(d, s)| *d != SignalDomain::D1 && *s >= self.threshold(*d));
                if any_raw && !counter_signals.is_empty() {
                    debug!("Domain signal suppressed by counter-signals");
                    (GateSignal::Null, ReasonCode::Suppressed)
                } else {
                    (GateSignal::Null, ReasonCode::NoSignal)
                }
            }
        };

        Classification {
            signal,
            reason_code,
            evidence,
            scores,
            counter_signals,
        }
    }
}
