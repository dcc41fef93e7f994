//! Audit entry types and sealing.
//!
//! An entry is an [`AuditRecord`] sealed against the previous entry's hash:
//!
//! ```text
//! entry_hash = SHA-256( json({record, previous_hash}) ‖ previous_hash )
//! ```
//!
//! The first entry of a session links to [`genesis_hash`].

use chrono::{DateTime, Utc};
use covenant_types::{
    hash_bytes, Arousal, Atmosphere, ConstitutionalAction, ContentHash, Depth, FallbackLevel,
    FieldState, Goal, HorizontalDomain, Mode, Primitive, ProtocolSelection, SafetyFlag,
    ValidatorId, Valence, Violation,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Salience at which a domain is listed in the field summary.
const SUMMARY_SALIENCE: f64 = 0.3;

/// The chain anchor for a session.
pub fn genesis_hash(session_id: &str) -> ContentHash {
    hash_bytes(format!("genesis:{session_id}").as_bytes())
}

/// What the verifier did with the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTaken {
    /// Generator output released as is
    Deliver,
    /// A fallback template was released
    Fallback,
    /// Nothing new was released this turn
    Stop,
}

/// The parts of the field state kept for compliance review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub arousal: Arousal,
    pub valence: Valence,
    pub goal: Goal,
    pub safety_flags: Vec<SafetyFlag>,
    pub primary_domains: Vec<HorizontalDomain>,
    pub uncertainty: f64,
}

impl From<&FieldState> for FieldSummary {
    fn from(field: &FieldState) -> Self {
        Self {
            arousal: field.arousal,
            valence: field.valence,
            goal: field.goal,
            safety_flags: field.safety_flags.iter().copied().collect(),
            primary_domains: field
                .domains
                .iter()
                .filter(|d| d.salience >= SUMMARY_SALIENCE)
                .map(|d| d.domain)
                .collect(),
            uncertainty: field.uncertainty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub atmosphere: Atmosphere,
    pub mode: Mode,
    pub primitive: Primitive,
    pub depth: Depth,
    pub forbidden: Vec<ConstitutionalAction>,
    pub required: Vec<ConstitutionalAction>,
    pub reasoning: String,
}

impl From<&ProtocolSelection> for SelectionSummary {
    fn from(selection: &ProtocolSelection) -> Self {
        Self {
            atmosphere: selection.atmosphere,
            mode: selection.mode,
            primitive: selection.primitive,
            depth: selection.depth,
            forbidden: selection.forbidden.clone(),
            required: selection.required.clone(),
            reasoning: selection.reasoning.clone(),
        }
    }
}

/// Outcome of the check battery for the released attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub checks_run: Vec<ValidatorId>,
    pub violations: Vec<Violation>,
    pub passed: bool,
    /// Weighted score of the non-critical violations
    pub weighted_score: f64,
}

/// Everything an entry records about one turn, before sealing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub turn_number: u32,
    pub input_hash: ContentHash,
    /// Hash of the sealed execution context, if one was compiled
    pub context_hash: Option<ContentHash>,
    pub field: FieldSummary,
    pub selection: SelectionSummary,
    pub verification: VerificationRecord,
    pub action: ActionTaken,
    pub fallback_level: FallbackLevel,
    /// Total attempts across the ladder this turn
    pub attempts: u32,
}

impl AuditRecord {
    /// Seal the record against the previous entry's hash.
    pub fn seal(self, previous_hash: ContentHash) -> Result<AuditEntry> {
        let entry_hash = compute_hash(&self, &previous_hash)?;
        Ok(AuditEntry {
            record: self,
            previous_hash,
            entry_hash,
        })
    }
}

/// A sealed audit entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub record: AuditRecord,
    pub previous_hash: ContentHash,
    pub entry_hash: ContentHash,
}

impl AuditEntry {
    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }

    pub fn turn_number(&self) -> u32 {
        self.record.turn_number
    }

    /// Recompute this entry's hash from its contents.
    pub fn recompute_hash(&self) -> Result<ContentHash> {
        compute_hash(&self.record, &self.previous_hash)
    }
}

#[derive(Serialize)]
struct Hashed<'a> {
    record: &'a AuditRecord,
    previous_hash: &'a ContentHash,
}

fn compute_hash(record: &AuditRecord, previous_hash: &ContentHash) -> Result<ContentHash> {
    let mut bytes = serde_json::to_vec(&Hashed {
        record,
        previous_hash,
    })?;
    bytes.extend_from_slice(previous_hash.as_str().as_bytes());
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn record(session_id: &str, turn_number: u32) -> AuditRecord {
        AuditRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, turn_number).unwrap(),
            session_id: session_id.to_string(),
            turn_number,
            input_hash: hash_bytes(format!("turn {turn_number}").as_bytes()),
            context_hash: None,
            field: FieldSummary {
                arousal: Arousal::Low,
                valence: Valence::Neutral,
                goal: Goal::Unclear,
                safety_flags: vec![],
                primary_domains: vec![],
                uncertainty: 0.25,
            },
            selection: SelectionSummary {
                atmosphere: Atmosphere::HumanField,
                mode: Mode::Expand,
                primitive: Primitive::Open,
                depth: Depth::Surface,
                forbidden: vec![ConstitutionalAction::Diagnose],
                required: vec![],
                reasoning: "test".into(),
            },
            verification: VerificationRecord {
                checks_run: vec![ValidatorId::Emptiness],
                violations: vec![],
                passed: true,
                weighted_score: 0.0,
            },
            action: ActionTaken::Deliver,
            fallback_level: FallbackLevel::Initial,
            attempts: 1,
        }
    }

    #[test]
    fn seal_links_to_previous() {
        let genesis = genesis_hash("s");
        let first = record("s", 0).seal(genesis.clone()).unwrap();
        assert_eq!(first.previous_hash, genesis);
        assert_eq!(first.recompute_hash().unwrap(), first.entry_hash);

        let second = record("s", 1).seal(first.entry_hash.clone()).unwrap();
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_ne!(second.entry_hash, first.entry_hash);
    }

    #[test]
    fn hash_depends_on_previous() {
        let a = record("s", 0).seal(genesis_hash("s")).unwrap();
        let b = record("s", 0).seal(genesis_hash("t")).unwrap();
        assert_ne!(a.entry_hash, b.entry_hash);
    }

    #[test]
    fn survives_json_round_trip() {
        let entry = record("s", 0).seal(genesis_hash("s")).unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.recompute_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn genesis_is_per_session() {
        assert_ne!(genesis_hash("a"), genesis_hash("b"));
        assert_eq!(genesis_hash("a"), genesis_hash("a"));
    }
}
