//! # covenant-verifier
//!
//! Checks each attempt against its sealed execution context, decides where
//! the fallback ladder goes next and seals the turn's audit entry.
//!
//! The ladder is a plain transition function ([`ladder::next`]) so it can be
//! exercised without a generator. Template levels are rendered by a
//! [`FallbackRenderer`]; [`BuiltinTemplates`] ships English text.

pub mod checks;
pub mod error;
pub mod ladder;
pub mod templates;
pub mod verify;

pub use checks::{severity_of, CheckBattery, CheckReport};
pub use error::VerifierError;
pub use ladder::{descend, starting_level, Failure, LadderState};
pub use templates::{BuiltinTemplates, FallbackRenderer};
pub use verify::{
    Attempt, RejectedContext, VerificationResult, Verifier, VerifierConfig, VerifyRequest,
};
