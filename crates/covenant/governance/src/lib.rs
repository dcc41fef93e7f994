//! # covenant-governance
//!
//! Turns a perceived field into constraints.
//!
//! - [`governor`]: the domain governor. Evaluates the ordered [`RuleSet`]
//!   against a `FieldState` and merges every applicable effect under
//!   precedence rules. `check_invariants` reports post-condition
//!   violations for observability.
//! - [`meta_kernel`]: the session-level power governor. Converts rolling
//!   telemetry into knob settings, runs recovery, and asks for a handshake
//!   before deep mode.
//! - [`handshake`]: consumes the answer to a pending handshake.
//!
//! Both rule sets are plain data and serialise to JSON.

pub mod error;
pub mod governor;
pub mod handshake;
pub mod meta_kernel;
pub mod rules;
pub mod telemetry;

pub use error::GovernanceError;
pub use governor::{DomainGovernor, InvariantViolation};
pub use handshake::{HandshakeInterpreter, HandshakeOutcome};
pub use meta_kernel::{
    end_session, KernelCondition, KernelEffect, KernelRule, MetaKernel, MetaKernelConfig,
    HANDSHAKE_PROMPT,
};
pub use rules::{DomainRule, RuleCondition, RuleEffect, RuleSet};
