use serde::{Deserialize, Serialize};

use crate::context::{Severity, ValidatorId};

/// Where a piece of output text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    /// The external generator
    External,
    /// A built-in fallback template
    Template,
}

/// Text returned for one attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub text: String,
    pub language: String,
    /// As reported by the producer; the verifier counts for itself
    pub word_count: u32,
    pub generation_method: GenerationMethod,
}

impl GeneratedOutput {
    pub fn template(text: impl Into<String>, language: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            word_count: text.split_whitespace().count() as u32,
            text,
            language: language.into(),
            generation_method: GenerationMethod::Template,
        }
    }
}

/// What kind of constraint a violation broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// Pattern-based prohibition (directive language, diagnosis, identity)
    Prohibition,
    /// Length or format bound
    Structural,
    /// Forbidden or required action
    Constitutional,
    /// Context hash or audit chain mismatch
    Integrity,
    /// Generator failed, timed out or returned nothing
    Generation,
}

/// One failed check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub validator: ValidatorId,
    pub category: ViolationCategory,
    pub severity: Severity,
    pub detail: String,
}

impl Violation {
    pub fn new(
        validator: ValidatorId,
        category: ViolationCategory,
        severity: Severity,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            category,
            severity,
            detail: detail.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_output_counts_words() {
        let out = GeneratedOutput::template("I'm here with you.", "en");
        assert_eq!(out.word_count, 4);
        assert_eq!(out.generation_method, GenerationMethod::Template);
    }

    #[test]
    fn critical_violation() {
        let v = Violation::new(
            ValidatorId::ChainIntegrity,
            ViolationCategory::Integrity,
            Severity::Critical,
            "head mismatch",
        );
        assert!(v.is_critical());
    }
}
