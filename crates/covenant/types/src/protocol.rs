use serde::{Deserialize, Serialize};

/// Response depth. Totally ordered: `Surface < Medium < Deep`.
///
/// Ceilings combine via `min`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Surface,
    Medium,
    Deep,
}

impl Depth {
    pub fn ordinal(&self) -> u8 {
        match self {
            Depth::Surface => 0,
            Depth::Medium => 1,
            Depth::Deep => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Surface => "surface",
            Depth::Medium => "medium",
            Depth::Deep => "deep",
        }
    }
}

/// Pacing. Ordered from least to most conservative, so the most
/// conservative of a set is its `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Responsive,
    Normal,
    Conservative,
    Slow,
}

impl Pacing {
    pub fn most_conservative(self, other: Pacing) -> Pacing {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pacing::Responsive => "responsive",
            Pacing::Normal => "normal",
            Pacing::Conservative => "conservative",
            Pacing::Slow => "slow",
        }
    }
}

/// The overall register of the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Atmosphere {
    Operational,
    HumanField,
    Decision,
    Existential,
    Emergency,
}

impl Atmosphere {
    pub fn as_str(&self) -> &'static str {
        match self {
            Atmosphere::Operational => "OPERATIONAL",
            Atmosphere::HumanField => "HUMAN_FIELD",
            Atmosphere::Decision => "DECISION",
            Atmosphere::Existential => "EXISTENTIAL",
            Atmosphere::Emergency => "EMERGENCY",
        }
    }
}

/// Regulation direction of the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Stabilise: slow down, ground
    Regulate,
    /// Open up the space
    Expand,
    /// Narrow down, converge
    Contract,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Regulate => "REGULATE",
            Mode::Expand => "EXPAND",
            Mode::Contract => "CONTRACT",
        }
    }
}

/// The response move the generator is asked to make.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Primitive {
    Ground,
    Validate,
    Reflect,
    Open,
    Crystallize,
    Map,
    ReturnAgency,
    Inform,
}

impl Primitive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::Ground => "GROUND",
            Primitive::Validate => "VALIDATE",
            Primitive::Reflect => "REFLECT",
            Primitive::Open => "OPEN",
            Primitive::Crystallize => "CRYSTALLIZE",
            Primitive::Map => "MAP",
            Primitive::ReturnAgency => "RETURN_AGENCY",
            Primitive::Inform => "INFORM",
        }
    }
}

/// Actions that rules can forbid or require of the generated response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstitutionalAction {
    GiveAdvice,
    Recommend,
    MakeDecision,
    Diagnose,
    AssignIdentity,
    ExploreDepth,
    Interpret,
    Ground,
    Presence,
    ReferToSupport,
    ReturnOwnership,
    Validate,
    Reflect,
    AskOpenQuestion,
    Summarize,
}

impl ConstitutionalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstitutionalAction::GiveAdvice => "give_advice",
            ConstitutionalAction::Recommend => "recommend",
            ConstitutionalAction::MakeDecision => "make_decision",
            ConstitutionalAction::Diagnose => "diagnose",
            ConstitutionalAction::AssignIdentity => "assign_identity",
            ConstitutionalAction::ExploreDepth => "explore_depth",
            ConstitutionalAction::Interpret => "interpret",
            ConstitutionalAction::Ground => "ground",
            ConstitutionalAction::Presence => "presence",
            ConstitutionalAction::ReferToSupport => "refer_to_support",
            ConstitutionalAction::ReturnOwnership => "return_ownership",
            ConstitutionalAction::Validate => "validate",
            ConstitutionalAction::Reflect => "reflect",
            ConstitutionalAction::AskOpenQuestion => "ask_open_question",
            ConstitutionalAction::Summarize => "summarize",
        }
    }
}

/// Response length bucket, derived from depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLength {
    Minimal,
    Brief,
    Moderate,
}

impl ResponseLength {
    pub fn for_depth(depth: Depth) -> Self {
        match depth {
            Depth::Surface => ResponseLength::Minimal,
            Depth::Medium => ResponseLength::Brief,
            Depth::Deep => ResponseLength::Moderate,
        }
    }

    pub fn max_words(&self) -> u32 {
        match self {
            ResponseLength::Minimal => 50,
            ResponseLength::Brief => 120,
            ResponseLength::Moderate => 220,
        }
    }

    /// Rough output-token allowance for the generator.
    pub fn max_output_tokens(&self) -> u32 {
        self.max_words() * 2
    }
}

/// Tone on two 1–5 scales.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tone {
    pub warmth: u8,
    pub directness: u8,
}

impl Tone {
    pub fn new(warmth: u8, directness: u8) -> Self {
        Self {
            warmth: warmth.clamp(1, 5),
            directness: directness.clamp(1, 5),
        }
    }
}

/// The bounded protocol for one turn.
///
/// Produced by the protocol selector and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSelection {
    pub atmosphere: Atmosphere,
    pub mode: Mode,
    pub primitive: Primitive,
    pub depth: Depth,
    pub length: ResponseLength,
    pub pacing: Pacing,
    pub tone: Tone,
    /// Sorted, deduplicated
    pub forbidden: Vec<ConstitutionalAction>,
    /// Sorted, deduplicated
    pub required: Vec<ConstitutionalAction>,
    pub confidence: f64,
    pub reasoning: String,
}

impl ProtocolSelection {
    pub fn forbids(&self, action: ConstitutionalAction) -> bool {
        self.forbidden.contains(&action)
    }

    pub fn requires(&self, action: ConstitutionalAction) -> bool {
        self.required.contains(&action)
    }
}
