use serde::{Deserialize, Serialize};

/// First-order boundary domains evaluated by the classifier.
///
/// Ordered by severity: `D1` is the most severe. The derived `Ord` follows
/// declaration order, so `D1 < D2` means "D1 is more severe than D2".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalDomain {
    /// Acute risk to life or physical safety
    #[serde(alias = "d1")]
    D1,
    /// Delegation: asking the system to act or decide in the user's place
    #[serde(alias = "d2")]
    D2,
    /// Normative decision request ("what should I do")
    #[serde(alias = "d3")]
    D3,
    /// Identity assignment ("tell me who I am", "am I a bad person")
    #[serde(alias = "d4")]
    D4,
}

impl SignalDomain {
    pub const ALL: [SignalDomain; 4] = [
        SignalDomain::D1,
        SignalDomain::D2,
        SignalDomain::D3,
        SignalDomain::D4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDomain::D1 => "D1",
            SignalDomain::D2 => "D2",
            SignalDomain::D3 => "D3",
            SignalDomain::D4 => "D4",
        }
    }
}

/// Classifier output signal, including the explicit `NULL` outcome.
///
/// Serialized exactly as the remote gate wire format (`"D1"`..`"D4"`, `"NULL"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateSignal {
    D1,
    D2,
    D3,
    D4,
    #[serde(rename = "NULL")]
    Null,
}

impl GateSignal {
    pub fn domain(&self) -> Option<SignalDomain> {
        match self {
            GateSignal::D1 => Some(SignalDomain::D1),
            GateSignal::D2 => Some(SignalDomain::D2),
            GateSignal::D3 => Some(SignalDomain::D3),
            GateSignal::D4 => Some(SignalDomain::D4),
            GateSignal::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, GateSignal::Null)
    }
}

impl From<SignalDomain> for GateSignal {
    fn from(domain: SignalDomain) -> Self {
        match domain {
            SignalDomain::D1 => GateSignal::D1,
            SignalDomain::D2 => GateSignal::D2,
            SignalDomain::D3 => GateSignal::D3,
            SignalDomain::D4 => GateSignal::D4,
        }
    }
}

/// Vertical bands, ordered by ascending depth of concern.
///
/// The derived `Ord` is the severity order used for tie-breaks: a later
/// variant is "higher severity".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerticalBand {
    /// Bodily sensations, physiological state
    Somatic,
    /// Practical tasks, logistics, work
    Functional,
    /// Relationships and attachment
    Relational,
    /// Meaning, purpose, mortality
    Existential,
    /// Spiritual, cosmic, beyond-self concerns
    Transcendent,
}

impl VerticalBand {
    pub const ALL: [VerticalBand; 5] = [
        VerticalBand::Somatic,
        VerticalBand::Functional,
        VerticalBand::Relational,
        VerticalBand::Existential,
        VerticalBand::Transcendent,
    ];

    /// The two highest-severity bands, the only ones that can trigger
    /// elevated-protection mode.
    pub fn is_elevated(&self) -> bool {
        matches!(self, VerticalBand::Existential | VerticalBand::Transcendent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerticalBand::Somatic => "SOMATIC",
            VerticalBand::Functional => "FUNCTIONAL",
            VerticalBand::Relational => "RELATIONAL",
            VerticalBand::Existential => "EXISTENTIAL",
            VerticalBand::Transcendent => "TRANSCENDENT",
        }
    }
}

/// Horizontal life-domains, orthogonal to vertical severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HorizontalDomain {
    Survival,
    Safety,
    Body,
    Emotion,
    Cognition,
    Meaning,
    Identity,
    Temporal,
    Attachment,
    Belonging,
    Work,
    Decision,
}

impl HorizontalDomain {
    pub const ALL: [HorizontalDomain; 12] = [
        HorizontalDomain::Survival,
        HorizontalDomain::Safety,
        HorizontalDomain::Body,
        HorizontalDomain::Emotion,
        HorizontalDomain::Cognition,
        HorizontalDomain::Meaning,
        HorizontalDomain::Identity,
        HorizontalDomain::Temporal,
        HorizontalDomain::Attachment,
        HorizontalDomain::Belonging,
        HorizontalDomain::Work,
        HorizontalDomain::Decision,
    ];

    /// Pairs of domains that pull in opposite directions when both are
    /// strongly active. Drives the tension component of the integration
    /// metric.
    pub const CONFLICTS: [(HorizontalDomain, HorizontalDomain); 5] = [
        (HorizontalDomain::Attachment, HorizontalDomain::Identity),
        (HorizontalDomain::Belonging, HorizontalDomain::Identity),
        (HorizontalDomain::Emotion, HorizontalDomain::Cognition),
        (HorizontalDomain::Work, HorizontalDomain::Body),
        (HorizontalDomain::Safety, HorizontalDomain::Decision),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HorizontalDomain::Survival => "SURVIVAL",
            HorizontalDomain::Safety => "SAFETY",
            HorizontalDomain::Body => "BODY",
            HorizontalDomain::Emotion => "EMOTION",
            HorizontalDomain::Cognition => "COGNITION",
            HorizontalDomain::Meaning => "MEANING",
            HorizontalDomain::Identity => "IDENTITY",
            HorizontalDomain::Temporal => "TEMPORAL",
            HorizontalDomain::Attachment => "ATTACHMENT",
            HorizontalDomain::Belonging => "BELONGING",
            HorizontalDomain::Work => "WORK",
            HorizontalDomain::Decision => "DECISION",
        }
    }
}
