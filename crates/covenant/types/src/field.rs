use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::HorizontalDomain;

/// The perceived state of one turn.
///
/// Built once per turn by the perception stage and only ever handed out by
/// shared reference afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    /// Active horizontal domains, sorted by domain
    pub domains: Vec<DomainActivation>,
    pub arousal: Arousal,
    pub valence: Valence,
    pub coherence: CoherenceLevel,
    pub goal: Goal,
    /// Consecutive turns without a change of primary domain
    pub loop_count: u32,
    /// Free-form observations (e.g. `"minimizing_phrasing"`)
    pub flags: BTreeSet<String>,
    /// Closed set of safety-relevant flags
    pub safety_flags: BTreeSet<SafetyFlag>,
    /// 0.0 (certain) to 1.0 (no usable signal)
    pub uncertainty: f64,
    pub language: Option<String>,
}

impl FieldState {
    /// A field carrying no signal, used for empty or unreadable input.
    pub fn minimal(language: Option<String>) -> Self {
        let mut safety_flags = BTreeSet::new();
        safety_flags.insert(SafetyFlag::Unclassifiable);
        Self {
            domains: Vec::new(),
            arousal: Arousal::Low,
            valence: Valence::Neutral,
            coherence: CoherenceLevel::Medium,
            goal: Goal::Unclear,
            loop_count: 0,
            flags: BTreeSet::new(),
            safety_flags,
            uncertainty: 1.0,
            language,
        }
    }

    pub fn has(&self, flag: SafetyFlag) -> bool {
        self.safety_flags.contains(&flag)
    }

    /// Salience of a domain, 0.0 when not active.
    pub fn salience(&self, domain: HorizontalDomain) -> f64 {
        self.domains
            .iter()
            .find(|d| d.domain == domain)
            .map(|d| d.salience)
            .unwrap_or(0.0)
    }

    /// Domains whose salience is at least `min_salience`.
    pub fn domains_above(&self, min_salience: f64) -> Vec<HorizontalDomain> {
        self.domains
            .iter()
            .filter(|d| d.salience >= min_salience)
            .map(|d| d.domain)
            .collect()
    }
}

/// A single horizontal-domain activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainActivation {
    pub domain: HorizontalDomain,
    /// 0.0–1.0
    pub salience: f64,
    pub confidence: Option<f64>,
    /// Pattern ids that contributed
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arousal {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Negative,
    Mixed,
    Neutral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceLevel {
    Low,
    Medium,
    High,
}

/// What the user appears to want from this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Get information or practical help
    Inform,
    /// Explore meaning or possibilities
    Explore,
    /// Reach a decision of their own
    Decide,
    /// Hand the decision over to the system
    Delegate,
    /// Work through an emotional experience
    Process,
    /// Calm down, regain footing
    Regulate,
    /// Be heard, feel accompanied
    Connect,
    Unclear,
}

/// Closed set of safety flags the governor can condition on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFlag {
    /// Classifier fired D1
    AcuteRisk,
    /// Detector found net positive emergency evidence
    Emergency,
    /// Detector triggered elevated-protection mode
    ElevatedProtection,
    /// Classifier fired D2
    DelegationAttempt,
    /// Classifier fired D3
    DecisionRequest,
    /// Classifier fired D4
    IdentityAssignment,
    /// Minimizing / adversarial phrasing was observed
    AdversarialPhrasing,
    /// Input could not be classified
    Unclassifiable,
}

impl SafetyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyFlag::AcuteRisk => "acute_risk",
            SafetyFlag::Emergency => "emergency",
            SafetyFlag::ElevatedProtection => "elevated_protection",
            SafetyFlag::DelegationAttempt => "delegation_attempt",
            SafetyFlag::DecisionRequest => "decision_request",
            SafetyFlag::IdentityAssignment => "identity_assignment",
            SafetyFlag::AdversarialPhrasing => "adversarial_phrasing",
            SafetyFlag::Unclassifiable => "unclassifiable",
        }
    }
}
