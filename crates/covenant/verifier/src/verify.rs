//! Verification of one attempt and emission of its audit entry.

use chrono::{DateTime, Utc};
use covenant_audit::{
    ActionTaken, AuditEntry, AuditRecord, FieldSummary, SelectionSummary, VerificationRecord,
};
use covenant_protocol::CompiledContext;
use covenant_types::{
    ContentHash, FallbackLevel, FieldState, GeneratedOutput, ProtocolSelection, Severity,
    ValidatorId, Violation, ViolationCategory,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checks::{CheckBattery, CheckReport};
use crate::error::VerifierError;
use crate::ladder::{self, Failure, LadderState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Weighted score of non-critical violations above which the attempt
    /// falls back
    pub fallback_threshold: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: 2.0,
        }
    }
}

/// What was produced at the current level.
#[derive(Clone, Copy, Debug)]
pub enum Attempt<'a> {
    Output(&'a GeneratedOutput),
    /// Generation failed, timed out or had no template
    Failed(&'a str),
    /// Nothing is released; used at `Stop`
    Withheld,
}

/// Everything [`Verifier::verify`] looks at.
#[derive(Clone, Copy, Debug)]
pub struct VerifyRequest<'a> {
    pub attempt: Attempt<'a>,
    pub context: &'a CompiledContext,
    pub selection: &'a ProtocolSelection,
    pub field: &'a FieldState,
    pub session_id: &'a str,
    pub turn_number: u32,
    /// The head the caller believes the chain has
    pub previous_hash: &'a ContentHash,
    /// The head the audit sink actually has
    pub chain_head: &'a ContentHash,
    /// Ladder position, with this attempt already counted
    pub ladder: LadderState,
    pub timestamp: DateTime<Utc>,
}

/// A turn whose execution context could not be compiled or sealed.
#[derive(Clone, Copy, Debug)]
pub struct RejectedContext<'a> {
    pub reason: &'a str,
    pub selection: &'a ProtocolSelection,
    pub field: &'a FieldState,
    pub session_id: &'a str,
    pub turn_number: u32,
    pub input_hash: &'a ContentHash,
    pub chain_head: &'a ContentHash,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerificationResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub fallback_required: bool,
    /// The level to go to next; the current level when nothing failed
    pub fallback_level: FallbackLevel,
    pub weighted_score: f64,
    /// Sealed against `chain_head`
    pub audit_entry: AuditEntry,
}

impl VerificationResult {
    /// Whether this result ends the turn.
    pub fn is_final(&self) -> bool {
        !self.fallback_required || self.audit_entry.record.fallback_level.is_terminal()
    }
}

pub struct Verifier {
    config: VerifierConfig,
    battery: CheckBattery,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Result<Self, VerifierError> {
        Ok(Self {
            config,
            battery: CheckBattery::new()?,
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn verify(&self, req: &VerifyRequest<'_>) -> Result<VerificationResult, VerifierError> {
        let context = req.context.context();
        let level = req.ladder.level;

        let mut report = CheckReport::default();
        self.battery
            .check_integrity(&mut report, req.context, req.previous_hash, req.chain_head);
        match req.attempt {
            Attempt::Output(output) if !level.is_terminal() => {
                self.battery.check_output(&mut report, context, output)
            }
            Attempt::Failed(reason) if !level.is_terminal() => {
                self.battery.check_failure(&mut report, reason)
            }
            _ => {}
        }

        let weighted_score = report.weighted_score();
        let integrity = report.has_integrity_failure();
        if integrity {
            warn!(
                session_id = %req.session_id,
                turn = req.turn_number,
                "Integrity violation; stopping turn"
            );
        }

        let fallback_required = integrity
            || (!level.is_terminal()
                && (report.has_critical() || weighted_score > self.config.fallback_threshold));
        let fallback_level = if !fallback_required {
            level
        } else if integrity {
            FallbackLevel::Stop
        } else {
            let failure = Failure::Severity(report.worst().unwrap_or(Severity::Minor));
            ladder::next(level, failure, req.ladder.attempts_at_level, &context.fallback)
        };

        let action = if level.is_terminal() || fallback_level.is_terminal() {
            ActionTaken::Stop
        } else if fallback_required || level != req.ladder.starting_level {
            ActionTaken::Fallback
        } else {
            ActionTaken::Deliver
        };
        let recorded_level = if fallback_required { fallback_level } else { level };

        if fallback_required {
            info!(
                session_id = %req.session_id,
                turn = req.turn_number,
                from = level.as_str(),
                to = fallback_level.as_str(),
                violations = report.violations.len(),
                "Fallback required"
            );
        } else {
            debug!(
                session_id = %req.session_id,
                turn = req.turn_number,
                level = level.as_str(),
                "Attempt verified"
            );
        }

        let passed = !fallback_required;
        let record = AuditRecord {
            timestamp: req.timestamp,
            session_id: req.session_id.to_string(),
            turn_number: req.turn_number,
            input_hash: context.audit.input_hash.clone(),
            context_hash: Some(req.context.hash().clone()),
            field: FieldSummary::from(req.field),
            selection: SelectionSummary::from(req.selection),
            verification: VerificationRecord {
                checks_run: report.checks_run,
                violations: report.violations.clone(),
                passed,
                weighted_score,
            },
            action,
            fallback_level: recorded_level,
            attempts: req.ladder.total_attempts,
        };
        let audit_entry = record.seal(req.chain_head.clone())?;

        Ok(VerificationResult {
            passed,
            violations: report.violations,
            fallback_required,
            fallback_level,
            weighted_score,
            audit_entry,
        })
    }

    /// Stop a turn that never got a sealed context.
    ///
    /// Records one critical `ContextIntegrity` violation and seals a `Stop`
    /// entry against `chain_head`. No generation was attempted.
    pub fn reject_context(
        &self,
        req: &RejectedContext<'_>,
    ) -> Result<VerificationResult, VerifierError> {
        warn!(
            session_id = %req.session_id,
            turn = req.turn_number,
            reason = %req.reason,
            "Context rejected; stopping turn"
        );
        let mut report = CheckReport::default();
        report.run(ValidatorId::ContextIntegrity);
        report.violations.push(Violation::new(
            ValidatorId::ContextIntegrity,
            ViolationCategory::Integrity,
            Severity::Critical,
            format!("execution context rejected: {}", req.reason),
        ));
        let weighted_score = report.weighted_score();

        let record = AuditRecord {
            timestamp: req.timestamp,
            session_id: req.session_id.to_string(),
            turn_number: req.turn_number,
            input_hash: req.input_hash.clone(),
            context_hash: None,
            field: FieldSummary::from(req.field),
            selection: SelectionSummary::from(req.selection),
            verification: VerificationRecord {
                checks_run: report.checks_run,
                violations: report.violations.clone(),
                passed: false,
                weighted_score,
            },
            action: ActionTaken::Stop,
            fallback_level: FallbackLevel::Stop,
            attempts: 0,
        };
        let audit_entry = record.seal(req.chain_head.clone())?;

        Ok(VerificationResult {
            passed: false,
            violations: report.violations,
            fallback_required: true,
            fallback_level: FallbackLevel::Stop,
            weighted_score,
            audit_entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use covenant_audit::genesis_hash;
    use covenant_governance::DomainGovernor;
    use covenant_protocol::{select, ContextCompiler};
    use covenant_types::{
        hash_bytes, Arousal, AuditSpec, ComputedTelemetry, ContinuationPolicy, Goal,
        KnobSettings, MetaKernelResult, MetaKernelState, Pacing, PowerEnvelope, SafetyFlag,
    };

    struct Fixture {
        field: FieldState,
        selection: ProtocolSelection,
        context: CompiledContext,
    }

    fn fixture(emergency: bool) -> Fixture {
        let mut field = FieldState::minimal(Some("en".into()));
        field.safety_flags.clear();
        field.uncertainty = 0.2;
        if emergency {
            field.safety_flags.insert(SafetyFlag::Emergency);
            field.arousal = Arousal::High;
            field.goal = Goal::Regulate;
        } else {
            field.goal = Goal::Connect;
        }
        let knobs = KnobSettings::default();
        let governor = DomainGovernor::default().apply(&field);
        let selection = select(&field, &governor, &knobs);
        let kernel = MetaKernelResult {
            rules_applied: vec![],
            knob_changes: vec![],
            power_envelope: PowerEnvelope {
                max_depth: knobs.max_depth_allowed,
                enabled_dimensions: knobs.enabled_dimensions.clone(),
                pacing: Pacing::Responsive,
                continuation: ContinuationPolicy::Continue,
                turns_remaining: 10,
                time_remaining_secs: 600,
                power_level: 1.0,
            },
            prompt_handshake: None,
            computed: ComputedTelemetry::default(),
            new_state: MetaKernelState::new(),
        };
        let audit = AuditSpec {
            session_id: "s".into(),
            turn_number: 0,
            input_hash: hash_bytes(b"input"),
            hash_algorithm: "sha256".into(),
        };
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let context = ContextCompiler::default()
            .compile_with(&field, &selection, &governor, &kernel, audit, "ctx".into(), at)
            .unwrap();
        Fixture {
            field,
            selection,
            context,
        }
    }

    fn run(
        fx: &Fixture,
        attempt: Attempt<'_>,
        level: FallbackLevel,
        previous: &ContentHash,
    ) -> VerificationResult {
        let head = genesis_hash("s");
        let mut ladder = LadderState::start(level);
        ladder.record_attempt();
        let req = VerifyRequest {
            attempt,
            context: &fx.context,
            selection: &fx.selection,
            field: &fx.field,
            session_id: "s",
            turn_number: 0,
            previous_hash: previous,
            chain_head: &head,
            ladder,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 1).unwrap(),
        };
        Verifier::new(VerifierConfig::default())
            .unwrap()
            .verify(&req)
            .unwrap()
    }

    #[test]
    fn grounding_template_passes_in_emergency() {
        let fx = fixture(true);
        let out = GeneratedOutput::template(
            "Let's slow down together. Feel your feet on the floor and take one slow breath. I'm here with you.",
            "en",
        );
        let result = run(&fx, Attempt::Output(&out), FallbackLevel::Medium, &genesis_hash("s"));
        assert!(result.passed, "{:?}", result.violations);
        assert_eq!(result.fallback_level, FallbackLevel::Medium);
        assert_eq!(result.audit_entry.record.action, ActionTaken::Deliver);
        assert!(result.is_final());
    }

    #[test]
    fn directive_phrasing_fails_in_emergency() {
        let fx = fixture(true);
        let out = GeneratedOutput::template(
            "You should take a slow breath. I'm here with you.",
            "en",
        );
        let result = run(&fx, Attempt::Output(&out), FallbackLevel::Medium, &genesis_hash("s"));
        assert!(!result.passed);
        assert!(result.fallback_required);
        assert!(result
            .violations
            .iter()
            .any(|v| v.validator == ValidatorId::DirectiveLanguage && v.is_critical()));
        assert!(result.fallback_level > FallbackLevel::Medium);
    }

    #[test]
    fn generation_failure_moves_down() {
        let fx = fixture(false);
        let result = run(&fx, Attempt::Failed("timeout"), FallbackLevel::Initial, &genesis_hash("s"));
        assert!(result.fallback_required);
        assert_eq!(result.fallback_level, FallbackLevel::Regenerate);
        assert_eq!(result.audit_entry.record.action, ActionTaken::Fallback);
        assert!(!result.is_final());
        assert_eq!(result.violations[0].category, ViolationCategory::Generation);
    }

    #[test]
    fn broken_chain_forces_stop() {
        let fx = fixture(false);
        let out = GeneratedOutput::template("I'm here with you. What feels most present?", "en");
        let stale = hash_bytes(b"stale");
        let result = run(&fx, Attempt::Output(&out), FallbackLevel::Initial, &stale);
        assert!(!result.passed);
        assert_eq!(result.fallback_level, FallbackLevel::Stop);
        assert_eq!(result.audit_entry.record.action, ActionTaken::Stop);
        assert!(result.is_final());
        // Sealed against the real head, not the stale one.
        assert_eq!(result.audit_entry.previous_hash, genesis_hash("s"));
        assert!(result
            .violations
            .iter()
            .any(|v| v.validator == ValidatorId::ChainIntegrity));
    }

    #[test]
    fn stop_runs_only_integrity_checks() {
        let fx = fixture(false);
        let result = run(&fx, Attempt::Withheld, FallbackLevel::Stop, &genesis_hash("s"));
        assert!(result.passed);
        assert_eq!(result.audit_entry.record.action, ActionTaken::Stop);
        assert_eq!(
            result.audit_entry.record.verification.checks_run,
            vec![ValidatorId::ContextIntegrity, ValidatorId::ChainIntegrity]
        );
    }

    #[test]
    fn single_minor_violation_is_tolerated() {
        let fx = fixture(false);
        let long = ["word"; 130].join(" ");
        let out = GeneratedOutput::template(long, "en");
        let result = run(&fx, Attempt::Output(&out), FallbackLevel::Initial, &genesis_hash("s"));
        assert!(result.passed, "{:?}", result.violations);
        assert_eq!(result.weighted_score, 1.0);
    }

    #[test]
    fn rejected_context_seals_a_stop_entry() {
        let fx = fixture(false);
        let head = genesis_hash("s");
        let input = hash_bytes(b"input");
        let result = Verifier::new(VerifierConfig::default())
            .unwrap()
            .reject_context(&RejectedContext {
                reason: "context exposes field internals",
                selection: &fx.selection,
                field: &fx.field,
                session_id: "s",
                turn_number: 0,
                input_hash: &input,
                chain_head: &head,
                timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 1).unwrap(),
            })
            .unwrap();

        assert!(!result.passed);
        assert!(result.is_final());
        assert_eq!(result.fallback_level, FallbackLevel::Stop);
        assert_eq!(result.violations.len(), 1);
        let violation = &result.violations[0];
        assert_eq!(violation.validator, ValidatorId::ContextIntegrity);
        assert_eq!(violation.category, ViolationCategory::Integrity);
        assert!(violation.is_critical());

        let record = &result.audit_entry.record;
        assert_eq!(record.action, ActionTaken::Stop);
        assert_eq!(record.attempts, 0);
        assert!(record.context_hash.is_none());
        assert_eq!(record.input_hash, input);
        assert_eq!(result.audit_entry.previous_hash, head);
    }
}
