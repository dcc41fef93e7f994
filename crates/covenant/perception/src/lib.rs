//! # covenant-perception
//!
//! The perception stage: everything that reads the raw message.
//!
//! - [`classifier`]: first-order boundary classifier (`D1`..`D4` / `NULL`)
//! - [`detector`]: vertical/horizontal scoring, integration metric,
//!   emergency and elevated-protection flags
//! - [`field`]: joins both into a [`covenant_types::FieldState`]
//! - [`lexicon`]: the weighted pattern tables behind all three
//!
//! The classifier and detector share no state and can run concurrently on
//! the same text.

pub mod classifier;
pub mod detector;
pub mod error;
pub mod field;
pub mod lexicon;

pub use classifier::{
    Classification, ClassifierConfig, CounterSignal, ReasonCode, SignalClassifier,
};
pub use detector::{
    elevated_protection, Detection, DetectorConfig, DimensionalDetector, EmergencyEvidence,
    ELEVATED_THRESHOLD,
};
pub use error::PerceptionError;
pub use field::{FieldAssembler, LoopHistory};
