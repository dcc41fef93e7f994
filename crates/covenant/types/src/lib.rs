//! # covenant-types
//!
//! Shared vocabulary for the Covenant constitutional pipeline.
//!
//! Every stage of the pipeline speaks in these types:
//!
//! ```text
//! text ─┬─ Classifier ──────────┐
//!       └─ Dimensional Detector ┴─ FieldState ─ Domain Governor ─┐
//!                                              Meta-Kernel knobs ┴─ Protocol Selector
//!                                                                        │
//!                        Verifier / Fallback Ladder ◄─ Generator ◄─ ExecutionContext
//! ```
//!
//! ## Modules
//!
//! - [`domain`]: classifier domains (D1–D4), vertical bands, horizontal domains
//! - [`field`]: the per-turn [`FieldState`]
//! - [`dimensional`]: the detector's [`DimensionalState`]
//! - [`protocol`]: depth/pacing/atmosphere/mode/primitive and [`ProtocolSelection`]
//! - [`governance`]: [`GovernorResult`] and its [`MergedEffect`]
//! - [`kernel`]: meta-kernel knobs, telemetry and state
//! - [`context`]: the compiled [`ExecutionContext`] and fallback vocabulary
//! - [`verification`]: verifier violations shared with the audit trail
//! - [`hash`]: SHA-256 content hashing used by contracts and the audit chain

pub mod context;
pub mod dimensional;
pub mod domain;
pub mod error;
pub mod field;
pub mod governance;
pub mod hash;
pub mod kernel;
pub mod protocol;
pub mod verification;

pub use context::{
    AuditSpec, ContextConstraints, ExecutionContext, FallbackLevel, FallbackSpec, OutputFormat,
    OutputSpec, ResourceEnvelope, RuntimeClass, Severity, TokenBudget, ValidatorId, ValidatorSpec,
};
pub use dimensional::{DimensionalState, IntegrationMetrics};
pub use domain::{GateSignal, HorizontalDomain, SignalDomain, VerticalBand};
pub use error::TypesError;
pub use field::{
    Arousal, CoherenceLevel, DomainActivation, FieldState, Goal, SafetyFlag, Valence,
};
pub use governance::{GovernorResult, MergedEffect, Precedence};
pub use hash::{hash_bytes, hash_json, ContentHash};
pub use kernel::{
    ComputedTelemetry, ContinuationPolicy, KernelPhase, KnobChange, KnobSettings,
    MetaKernelResult, MetaKernelState, PowerEnvelope, SessionTelemetry, TurnTelemetry,
};
pub use protocol::{
    Atmosphere, ConstitutionalAction, Depth, Mode, Pacing, Primitive, ProtocolSelection,
    ResponseLength, Tone,
};
pub use verification::{GeneratedOutput, GenerationMethod, Violation, ViolationCategory};
