//! Execution-context compiler.
//!
//! Freezes a [`ProtocolSelection`] together with the governor and
//! meta-kernel outputs into an [`ExecutionContext`], hashes it once, and
//! hands it out sealed inside a [`CompiledContext`].
//!
//! Before sealing, the compiler runs a blindness check over the serialized
//! sections the generator reads: the generator must only ever see constraints, never the field
//! internals (saliences, evidence, arousal, flags...) they were derived
//! from.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use covenant_types::{
    hash_json, Arousal, Atmosphere, AuditSpec, ContentHash, ContextConstraints, ExecutionContext,
    FallbackLevel, FallbackSpec, FieldState, GovernorResult, HorizontalDomain, MetaKernelResult,
    Mode, OutputFormat, OutputSpec, ProtocolSelection, ResourceEnvelope, RuntimeClass, Severity,
    TokenBudget, ValidatorId, ValidatorSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CompileError;
use crate::selector::active_domains;

/// Object keys that would expose field-state internals.
const DENIED_KEYS: &[&str] = &[
    "salience",
    "evidence",
    "uncertainty",
    "arousal",
    "valence",
    "flags",
    "safety_flags",
    "domains",
    "loop_count",
];

/// Resource limits applied to every compiled context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Deadline for each external generation call
    pub max_latency_ms: u64,
    pub max_input_tokens: u32,
    /// Attempts at each fallback level below REGENERATE
    pub template_attempts: u32,
    pub default_language: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 8_000,
            max_input_tokens: 2_048,
            template_attempts: 1,
            default_language: "en".to_string(),
        }
    }
}

/// An execution context and the hash taken when it was sealed.
///
/// The context is only reachable by shared reference.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledContext {
    context: ExecutionContext,
    hash: ContentHash,
}

impl CompiledContext {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Recompute the hash and compare it with the sealed one.
    pub fn verify_integrity(&self) -> bool {
        match hash_json(&self.context) {
            Ok(h) => h == self.hash,
            Err(_) => false,
        }
    }

    /// Rebuild a sealed context from parts, e.g. after reading it back from
    /// storage. The hash is taken as given; call
    /// [`verify_integrity`](Self::verify_integrity) before trusting it.
    pub fn from_parts(context: ExecutionContext, hash: ContentHash) -> Self {
        Self { context, hash }
    }
}

impl Deref for CompiledContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Pick the runtime tier from atmosphere, arousal and mode.
pub fn runtime_class(atmosphere: Atmosphere, arousal: Arousal, mode: Mode) -> RuntimeClass {
    if atmosphere == Atmosphere::Emergency {
        RuntimeClass::Templated
    } else if atmosphere == Atmosphere::Existential
        || mode == Mode::Regulate
        || arousal == Arousal::High
    {
        RuntimeClass::Constrained
    } else {
        RuntimeClass::Open
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContextCompiler {
    config: CompilerConfig,
}

impl ContextCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile with a fresh id and the current time.
    pub fn compile(
        &self,
        field: &FieldState,
        selection: &ProtocolSelection,
        governor: &GovernorResult,
        kernel: &MetaKernelResult,
        audit: AuditSpec,
    ) -> Result<CompiledContext, CompileError> {
        self.compile_with(
            field,
            selection,
            governor,
            kernel,
            audit,
            format!("ctx-{}", Uuid::new_v4()),
            Utc::now(),
        )
    }

    /// Compile with a caller-supplied id and timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn compile_with(
        &self,
        field: &FieldState,
        selection: &ProtocolSelection,
        governor: &GovernorResult,
        kernel: &MetaKernelResult,
        audit: AuditSpec,
        context_id: String,
        compiled_at: DateTime<Utc>,
    ) -> Result<CompiledContext, CompileError> {
        let class = runtime_class(selection.atmosphere, field.arousal, selection.mode);
        let envelope = &kernel.power_envelope;

        let token_budget = TokenBudget {
            max_input_tokens: self.config.max_input_tokens,
            max_output_tokens: selection.length.max_output_tokens(),
        };
        let language = field
            .language
            .clone()
            .unwrap_or_else(|| self.config.default_language.clone());

        let allowed_dimensions: Vec<_> = active_domains(field)
            .into_iter()
            .filter(|d| envelope.enabled_dimensions.contains(d))
            .collect();

        let mut active_invariants = governor.rules_applied.clone();
        active_invariants.extend(kernel.rules_applied.iter().cloned());

        let context = ExecutionContext {
            context_id,
            compiled_at,
            runtime_class: class,
            goal: field.goal,
            constraints: ContextConstraints {
                forbidden: selection.forbidden.clone(),
                required: selection.required.clone(),
                depth_ceiling: selection.depth,
                allowed_dimensions,
                token_budget,
                tone: selection.tone,
                pacing: selection.pacing,
                language: language.clone(),
                active_invariants,
            },
            resources: ResourceEnvelope {
                max_latency_ms: self.config.max_latency_ms,
                max_generation_calls: class.max_generation_calls(),
                token_budget,
                permitted_tools: Vec::new(),
                network_access: false,
                file_access: false,
            },
            output: OutputSpec {
                primitive: selection.primitive,
                length: selection.length,
                max_words: selection.length.max_words(),
                format: OutputFormat::PlainText,
                language,
            },
            validators: validators_for(selection),
            fallback: self.fallback_for(class),
            audit,
        };

        check_consistency(&context, selection, kernel)?;
        check_blindness(&context, field, &envelope.enabled_dimensions)?;

        let hash = hash_json(&context)?;
        debug!(
            context_id = %context.context_id,
            runtime_class = ?class,
            hash = %hash,
            "Execution context sealed"
        );
        Ok(CompiledContext { context, hash })
    }

    fn fallback_for(&self, class: RuntimeClass) -> FallbackSpec {
        let regenerate = if class == RuntimeClass::Open { 1 } else { 0 };
        let mut attempt_caps = BTreeMap::new();
        attempt_caps.insert(FallbackLevel::Regenerate, regenerate);
        attempt_caps.insert(FallbackLevel::Medium, self.config.template_attempts);
        attempt_caps.insert(FallbackLevel::Surface, self.config.template_attempts);
        attempt_caps.insert(FallbackLevel::Presence, self.config.template_attempts);
        attempt_caps.insert(FallbackLevel::Stop, 1);
        FallbackSpec {
            ladder: FallbackLevel::LADDER.to_vec(),
            attempt_caps,
            terminal: FallbackLevel::Stop,
        }
    }
}

fn validators_for(selection: &ProtocolSelection) -> Vec<ValidatorSpec> {
    use covenant_types::ConstitutionalAction as A;

    let v = |id, severity| ValidatorSpec { id, severity };
    let directive = if selection.atmosphere == Atmosphere::Emergency
        || selection.forbids(A::GiveAdvice)
        || selection.forbids(A::MakeDecision)
    {
        Severity::Critical
    } else {
        Severity::Moderate
    };
    vec![
        v(ValidatorId::ContextIntegrity, Severity::Critical),
        v(ValidatorId::ChainIntegrity, Severity::Critical),
        v(ValidatorId::Emptiness, Severity::Critical),
        v(ValidatorId::DirectiveLanguage, directive),
        v(ValidatorId::Diagnosis, Severity::Critical),
        v(ValidatorId::IdentityAssignment, Severity::Critical),
        v(ValidatorId::ForbiddenActions, Severity::Moderate),
        v(ValidatorId::RequiredActions, Severity::Minor),
        v(ValidatorId::LengthBound, Severity::Minor),
        v(ValidatorId::Format, Severity::Minor),
        v(ValidatorId::Language, Severity::Minor),
    ]
}

fn check_consistency(
    context: &ExecutionContext,
    selection: &ProtocolSelection,
    kernel: &MetaKernelResult,
) -> Result<(), CompileError> {
    if context.constraints.depth_ceiling > kernel.power_envelope.max_depth {
        return Err(CompileError::Inconsistent {
            field: "depth_ceiling",
            detail: format!(
                "{} exceeds kernel ceiling {}",
                context.constraints.depth_ceiling.as_str(),
                kernel.power_envelope.max_depth.as_str()
            ),
        });
    }
    if context.constraints.forbidden != selection.forbidden {
        return Err(CompileError::Inconsistent {
            field: "forbidden",
            detail: "forbidden actions differ from the selection".into(),
        });
    }
    Ok(())
}

/// Check that nothing in the context exposes field internals.
///
/// Scans the sections the generator sees (constraints, resources, output
/// and validators). Fails on any denied object key, on any string equal to
/// one of the field's free-form flags or evidence ids, and on any allowed
/// dimension outside `enabled`.
pub fn check_blindness(
    context: &ExecutionContext,
    field: &FieldState,
    enabled: &BTreeSet<HorizontalDomain>,
) -> Result<(), CompileError> {
    if let Some(d) = context
        .constraints
        .allowed_dimensions
        .iter()
        .find(|d| !enabled.contains(d))
    {
        return Err(CompileError::DimensionNotEnabled(format!("{d:?}")));
    }

    let mut denied_values: BTreeSet<&str> = field.flags.iter().map(String::as_str).collect();
    for activation in &field.domains {
        denied_values.extend(activation.evidence.iter().map(String::as_str));
    }

    // Only these sections reach the generator. Identifiers in `audit` and
    // `context_id` are caller-supplied and may collide with flag names.
    let sections = [
        ("$.constraints", serde_json::to_value(&context.constraints)?),
        ("$.resources", serde_json::to_value(&context.resources)?),
        ("$.output", serde_json::to_value(&context.output)?),
        ("$.validators", serde_json::to_value(&context.validators)?),
    ];
    let result = sections
        .iter()
        .try_for_each(|(path, value)| scan(value, path, &denied_values));
    if let Err(CompileError::Leak { path, detail }) = &result {
        warn!(context_id = %context.context_id, %path, %detail, "Blindness check failed");
    }
    result
}

fn scan(value: &Value, path: &str, denied_values: &BTreeSet<&str>) -> Result<(), CompileError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                if DENIED_KEYS.contains(&key.as_str()) {
                    return Err(CompileError::Leak {
                        path: child_path,
                        detail: "denied key".into(),
                    });
                }
                scan(child, &child_path, denied_values)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                scan(child, &format!("{path}[{i}]"), denied_values)?;
            }
            Ok(())
        }
        Value::String(s) if denied_values.contains(s.as_str()) => Err(CompileError::Leak {
            path: path.to_string(),
            detail: format!("field observation {s:?}"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::select;
    use chrono::TimeZone;
    use covenant_governance::DomainGovernor;
    use covenant_types::{
        hash_bytes, ComputedTelemetry, ContinuationPolicy, DomainActivation, Goal, KnobSettings,
        MetaKernelState, Pacing, PowerEnvelope, SafetyFlag,
    };

    fn field() -> FieldState {
        let mut f = FieldState::minimal(Some("en".into()));
        f.safety_flags.clear();
        f.goal = Goal::Process;
        f.uncertainty = 0.2;
        f.domains = vec![DomainActivation {
            domain: HorizontalDomain::Work,
            salience: 0.8,
            confidence: Some(0.9),
            evidence: vec!["h.work.boss".into()],
        }];
        f.flags.insert("minimizing_phrasing".into());
        f
    }

    fn kernel(knobs: &KnobSettings) -> MetaKernelResult {
        MetaKernelResult {
            rules_applied: vec!["MK-TEST".into()],
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
        }
    }

    fn audit() -> AuditSpec {
        AuditSpec {
            session_id: "s".into(),
            turn_number: 3,
            input_hash: hash_bytes(b"input"),
            hash_algorithm: "sha256".into(),
        }
    }

    fn compile(f: &FieldState, knobs: &KnobSettings) -> Result<CompiledContext, CompileError> {
        let governor = DomainGovernor::default().apply(f);
        let selection = select(f, &governor, knobs);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        ContextCompiler::default().compile_with(
            f,
            &selection,
            &governor,
            &kernel(knobs),
            audit(),
            "ctx-1".into(),
            at,
        )
    }

    #[test]
    fn runtime_class_tiers() {
        use Arousal::*;
        assert_eq!(
            runtime_class(Atmosphere::Emergency, Low, Mode::Expand),
            RuntimeClass::Templated
        );
        assert_eq!(
            runtime_class(Atmosphere::Existential, Low, Mode::Expand),
            RuntimeClass::Constrained
        );
        assert_eq!(
            runtime_class(Atmosphere::HumanField, High, Mode::Expand),
            RuntimeClass::Constrained
        );
        assert_eq!(
            runtime_class(Atmosphere::HumanField, Medium, Mode::Regulate),
            RuntimeClass::Constrained
        );
        assert_eq!(
            runtime_class(Atmosphere::Operational, Medium, Mode::Contract),
            RuntimeClass::Open
        );
    }

    #[test]
    fn compiled_context_is_sealed() {
        let ctx = compile(&field(), &KnobSettings::default()).unwrap();
        assert!(ctx.verify_integrity());
        assert_eq!(ctx.runtime_class, RuntimeClass::Open);
        assert_eq!(ctx.resources.max_generation_calls, 2);
        assert_eq!(ctx.fallback.cap(FallbackLevel::Regenerate), 1);
        assert_eq!(ctx.constraints.allowed_dimensions, vec![HorizontalDomain::Work]);
        assert!(ctx
            .constraints
            .active_invariants
            .contains(&"MK-TEST".to_string()));
        assert_eq!(ctx.audit.turn_number, 3);
    }

    #[test]
    fn edited_context_fails_integrity() {
        let ctx = compile(&field(), &KnobSettings::default()).unwrap();
        let mut inner = ctx.context().clone();
        inner.constraints.depth_ceiling = covenant_types::Depth::Deep;
        let forged = CompiledContext::from_parts(inner, ctx.hash().clone());
        assert!(!forged.verify_integrity());
    }

    #[test]
    fn disabled_dimensions_are_not_allowed() {
        let mut knobs = KnobSettings::default();
        knobs.enabled_dimensions.remove(&HorizontalDomain::Work);
        let ctx = compile(&field(), &knobs).unwrap();
        assert!(ctx.constraints.allowed_dimensions.is_empty());
    }

    #[test]
    fn emergency_is_templated_without_regeneration() {
        let mut f = field();
        f.safety_flags.insert(SafetyFlag::Emergency);
        f.arousal = Arousal::High;
        let ctx = compile(&f, &KnobSettings::default()).unwrap();
        assert_eq!(ctx.runtime_class, RuntimeClass::Templated);
        assert_eq!(ctx.resources.max_generation_calls, 0);
        assert_eq!(ctx.fallback.cap(FallbackLevel::Regenerate), 0);
        let directive = ctx
            .validators
            .iter()
            .find(|v| v.id == ValidatorId::DirectiveLanguage)
            .unwrap();
        assert_eq!(directive.severity, Severity::Critical);
    }

    #[test]
    fn blindness_catches_leaked_observations() {
        let f = field();
        let knobs = KnobSettings::default();
        let ctx = compile(&f, &knobs).unwrap();

        let mut leaked = ctx.context().clone();
        leaked.constraints.language = "h.work.boss".into();
        let err = check_blindness(&leaked, &f, &knobs.enabled_dimensions).unwrap_err();
        match err {
            CompileError::Leak { path, .. } => assert_eq!(path, "$.constraints.language"),
            other => panic!("unexpected {other:?}"),
        }

        let mut flagged = ctx.context().clone();
        flagged.output.language = "minimizing_phrasing".into();
        let err = check_blindness(&flagged, &f, &knobs.enabled_dimensions).unwrap_err();
        assert!(matches!(err, CompileError::Leak { ref path, .. } if path == "$.output.language"));

        let narrow = BTreeSet::new();
        assert!(matches!(
            check_blindness(ctx.context(), &f, &narrow),
            Err(CompileError::DimensionNotEnabled(_))
        ));
    }

    #[test]
    fn identifiers_matching_flags_still_compile() {
        let f = field();
        let knobs = KnobSettings::default();
        let governor = DomainGovernor::default().apply(&f);
        let selection = select(&f, &governor, &knobs);
        let spec = AuditSpec {
            session_id: "minimizing_phrasing".into(),
            ..audit()
        };
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ctx = ContextCompiler::default()
            .compile_with(&f, &selection, &governor, &kernel(&knobs), spec, "h.work.boss".into(), at)
            .unwrap();
        assert_eq!(ctx.context().audit.session_id, "minimizing_phrasing");
        assert!(ctx.verify_integrity());
    }

    #[test]
    fn undetected_language_uses_configured_default() {
        let mut f = field();
        f.language = None;
        let knobs = KnobSettings::default();
        let governor = DomainGovernor::default().apply(&f);
        let selection = select(&f, &governor, &knobs);
        let compiler = ContextCompiler::new(CompilerConfig {
            default_language: "de".into(),
            ..CompilerConfig::default()
        });
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ctx = compiler
            .compile_with(&f, &selection, &governor, &kernel(&knobs), audit(), "ctx-2".into(), at)
            .unwrap();
        assert_eq!(ctx.context().output.language, "de");
        assert_eq!(ctx.context().constraints.language, "de");
    }
}
