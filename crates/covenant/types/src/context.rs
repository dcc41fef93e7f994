use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::HorizontalDomain;
use crate::field::Goal;
use crate::hash::ContentHash;
use crate::protocol::{ConstitutionalAction, Depth, Pacing, Primitive, ResponseLength, Tone};

/// Runtime tier of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeClass {
    /// No external generation; templated output only
    Templated,
    /// One external generation call, no regeneration
    Constrained,
    /// Initial call plus one regeneration
    Open,
}

impl RuntimeClass {
    pub fn max_generation_calls(&self) -> u32 {
        match self {
            RuntimeClass::Templated => 0,
            RuntimeClass::Constrained => 1,
            RuntimeClass::Open => 2,
        }
    }

    pub fn templated_only(&self) -> bool {
        matches!(self, RuntimeClass::Templated)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
}

/// Constraints the generator must satisfy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextConstraints {
    pub forbidden: Vec<ConstitutionalAction>,
    pub required: Vec<ConstitutionalAction>,
    pub depth_ceiling: Depth,
    pub allowed_dimensions: Vec<HorizontalDomain>,
    pub token_budget: TokenBudget,
    pub tone: Tone,
    pub pacing: Pacing,
    pub language: String,
    pub active_invariants: Vec<String>,
}

/// Resources the turn may consume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope {
    pub max_latency_ms: u64,
    pub max_generation_calls: u32,
    pub token_budget: TokenBudget,
    pub permitted_tools: Vec<String>,
    pub network_access: bool,
    pub file_access: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    PlainText,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub primitive: Primitive,
    pub length: ResponseLength,
    pub max_words: u32,
    pub format: OutputFormat,
    pub language: String,
}

/// Identifiers of the verifier's checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorId {
    Emptiness,
    DirectiveLanguage,
    Diagnosis,
    IdentityAssignment,
    LengthBound,
    Format,
    Language,
    ForbiddenActions,
    RequiredActions,
    ContextIntegrity,
    ChainIntegrity,
}

impl ValidatorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorId::Emptiness => "emptiness",
            ValidatorId::DirectiveLanguage => "directive_language",
            ValidatorId::Diagnosis => "diagnosis",
            ValidatorId::IdentityAssignment => "identity_assignment",
            ValidatorId::LengthBound => "length_bound",
            ValidatorId::Format => "format",
            ValidatorId::Language => "language",
            ValidatorId::ForbiddenActions => "forbidden_actions",
            ValidatorId::RequiredActions => "required_actions",
            ValidatorId::ContextIntegrity => "context_integrity",
            ValidatorId::ChainIntegrity => "chain_integrity",
        }
    }
}

/// Violation severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Critical,
}

impl Severity {
    /// Weight used in the violation score. Critical is never weighed; it
    /// forces fallback outright.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Minor => 1.0,
            Severity::Moderate => 2.0,
            Severity::Critical => f64::INFINITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSpec {
    pub id: ValidatorId,
    /// Severity when this validator fails
    pub severity: Severity,
}

/// Fallback ladder levels, ordered from least to most conservative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackLevel {
    /// The first generation attempt; not a fallback
    Initial,
    Regenerate,
    Medium,
    Surface,
    Presence,
    /// Terminal: emit no new content this turn
    Stop,
}

impl FallbackLevel {
    /// The strictly ordered ladder, excluding `Initial`.
    pub const LADDER: [FallbackLevel; 5] = [
        FallbackLevel::Regenerate,
        FallbackLevel::Medium,
        FallbackLevel::Surface,
        FallbackLevel::Presence,
        FallbackLevel::Stop,
    ];

    /// The next, strictly safer level. `Stop` is its own successor.
    pub fn next(&self) -> FallbackLevel {
        match self {
            FallbackLevel::Initial => FallbackLevel::Regenerate,
            FallbackLevel::Regenerate => FallbackLevel::Medium,
            FallbackLevel::Medium => FallbackLevel::Surface,
            FallbackLevel::Surface => FallbackLevel::Presence,
            FallbackLevel::Presence | FallbackLevel::Stop => FallbackLevel::Stop,
        }
    }

    /// Whether output at this level comes from the external generator.
    pub fn uses_generator(&self) -> bool {
        matches!(self, FallbackLevel::Initial | FallbackLevel::Regenerate)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FallbackLevel::Stop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackLevel::Initial => "INITIAL",
            FallbackLevel::Regenerate => "REGENERATE",
            FallbackLevel::Medium => "MEDIUM",
            FallbackLevel::Surface => "SURFACE",
            FallbackLevel::Presence => "PRESENCE",
            FallbackLevel::Stop => "STOP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackSpec {
    pub ladder: Vec<FallbackLevel>,
    /// Attempts permitted at each level; zero skips the level
    pub attempt_caps: BTreeMap<FallbackLevel, u32>,
    pub terminal: FallbackLevel,
}

impl FallbackSpec {
    pub fn cap(&self, level: FallbackLevel) -> u32 {
        self.attempt_caps.get(&level).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditSpec {
    pub session_id: String,
    pub turn_number: u32,
    pub input_hash: ContentHash,
    pub hash_algorithm: String,
}

/// The immutable execution contract handed to the generator.
///
/// Only the compiler constructs one; afterwards it travels inside a sealed
/// wrapper that exposes it by shared reference together with its hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub context_id: String,
    pub compiled_at: DateTime<Utc>,
    pub runtime_class: RuntimeClass,
    pub goal: Goal,
    pub constraints: ContextConstraints,
    pub resources: ResourceEnvelope,
    pub output: OutputSpec,
    pub validators: Vec<ValidatorSpec>,
    pub fallback: FallbackSpec,
    pub audit: AuditSpec,
}
