//! The turn pipeline.
//!
//! One call to [`Pipeline::process_turn`] takes a user message through
//! perception, governance, protocol selection, context compilation,
//! generation and verification, and commits exactly one audit entry.
//! Turns for the same session are serialised; different sessions run
//! concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use covenant_audit::{
    genesis_hash, verify_chain, ActionTaken, AuditEntry, AuditSink, ChainVerification,
    FileAuditSink, MemoryAuditSink,
};
use covenant_governance::{
    end_session, DomainGovernor, HandshakeInterpreter, HandshakeOutcome, InvariantViolation,
    MetaKernel, RuleSet,
};
use covenant_perception::{
    Classification, Detection, DimensionalDetector, FieldAssembler, LoopHistory,
    SignalClassifier,
};
use covenant_protocol::{
    active_domains, requested_depth, runtime_class, select, CompiledContext, ContextCompiler,
};
use covenant_types::{
    hash_bytes, AuditSpec, ContentHash, ContinuationPolicy, Depth, DimensionalState,
    FallbackLevel, FieldState, GeneratedOutput, KnobSettings, ProtocolSelection, RuntimeClass,
    SafetyFlag, SessionTelemetry, TurnTelemetry, Violation,
};
use covenant_verifier::{
    starting_level, Attempt, BuiltinTemplates, FallbackRenderer, LadderState, RejectedContext,
    VerificationResult, Verifier, VerifyRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AuditBackend, AuditConfig, CovenantConfig, RuntimeConfig};
use crate::error::{Result, RuntimeError};
use crate::gate::{resolve_signal, GateRequest, GateService, HttpGateClient, SignalSource};
use crate::generator::{generate_within, Generator};
use crate::locks::SessionLocks;
use crate::session::{MemorySessionStore, Session, SessionStore};

/// What a caller gets back from one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub turn_number: u32,
    /// Released text; empty when the turn stopped without a statement
    pub text: String,
    /// Level the released text came from
    pub level: FallbackLevel,
    pub action: ActionTaken,
    pub passed: bool,
    /// Violations of the final attempt
    pub violations: Vec<Violation>,
    /// Deep-mode confirmation question, when the kernel asks for one
    pub handshake_prompt: Option<String>,
    pub handshake: HandshakeOutcome,
    pub signal_source: SignalSource,
    pub runtime_class: RuntimeClass,
    pub selection: ProtocolSelection,
    /// Depth ceiling the kernel set for this turn
    pub depth_ceiling: Depth,
    pub kernel_rules: Vec<String>,
    pub governor_rules: Vec<String>,
    /// Post-condition failures of the governor's merged effect
    pub invariant_violations: Vec<InvariantViolation>,
    pub attempts: u32,
    pub entry_hash: ContentHash,
    /// Session is closed after this turn
    pub session_closed: bool,
}

/// What was produced at one ladder level.
enum Produced {
    Output(GeneratedOutput),
    Failed(String),
    Withheld,
}

impl Produced {
    fn as_attempt(&self) -> Attempt<'_> {
        match self {
            Produced::Output(output) => Attempt::Output(output),
            Produced::Failed(reason) => Attempt::Failed(reason),
            Produced::Withheld => Attempt::Withheld,
        }
    }
}

/// Inputs of one walk down the fallback ladder.
struct LadderRun<'a> {
    context: &'a CompiledContext,
    selection: &'a ProtocolSelection,
    field: &'a FieldState,
    message: &'a str,
    session_id: &'a str,
    turn_number: u32,
    previous_hash: &'a ContentHash,
    chain_head: &'a ContentHash,
    closed: bool,
}

/// Open the audit sink named by the configuration.
pub async fn open_audit_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>> {
    let sink: Arc<dyn AuditSink> = match config.backend {
        AuditBackend::Memory => Arc::new(MemoryAuditSink::new()),
        AuditBackend::File => Arc::new(FileAuditSink::open(config.path.clone()).await?),
    };
    Ok(sink)
}

pub struct Pipeline {
    classifier: Arc<SignalClassifier>,
    detector: Arc<DimensionalDetector>,
    assembler: FieldAssembler,
    governor: DomainGovernor,
    kernel: MetaKernel,
    handshake: HandshakeInterpreter,
    compiler: ContextCompiler,
    verifier: Verifier,
    renderer: Arc<dyn FallbackRenderer>,
    generator: Arc<dyn Generator>,
    gate: Option<Arc<dyn GateService>>,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    locks: SessionLocks,
    runtime: RuntimeConfig,
}

impl Pipeline {
    pub fn new(
        config: &CovenantConfig,
        generator: Arc<dyn Generator>,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Ok(Self {
            classifier: Arc::new(SignalClassifier::new(config.classifier.clone())?),
            detector: Arc::new(DimensionalDetector::new(config.detector.clone())?),
            assembler: FieldAssembler::new()?,
            governor: DomainGovernor::default(),
            kernel: MetaKernel::new(config.kernel.clone()),
            handshake: HandshakeInterpreter::new()?,
            compiler: ContextCompiler::new(config.compiler.clone()),
            verifier: Verifier::new(config.verifier.clone())?,
            renderer: Arc::new(BuiltinTemplates),
            generator,
            gate: None,
            sessions,
            audit,
            locks: SessionLocks::new(),
            runtime: config.runtime.clone(),
        })
    }

    /// Build everything from configuration: in-memory sessions, the
    /// configured audit backend and, when an endpoint is set, the HTTP gate.
    pub async fn from_config(
        config: &CovenantConfig,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let audit = open_audit_sink(&config.audit).await?;
        let pipeline = Self::new(config, generator, Arc::new(MemorySessionStore::new()), audit)?;
        match &config.runtime.gate.endpoint {
            Some(endpoint) => {
                let timeout = Duration::from_millis(config.runtime.gate.timeout_ms);
                let client = HttpGateClient::new(endpoint, timeout)?;
                info!(endpoint = %endpoint, "Remote gate enabled");
                Ok(pipeline.with_gate(Arc::new(client)))
            }
            None => Ok(pipeline),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn GateService>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn FallbackRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the domain rules, e.g. with a set loaded from JSON.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.governor = DomainGovernor::new(rules);
        self
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<Session>> {
        self.sessions.get(session_id).await
    }

    /// Process one user message. Creates the session on first use.
    pub async fn process_turn(&self, session_id: &str, text: &str) -> Result<TurnOutcome> {
        let guard = self.locks.lock(session_id).await;
        let now = Utc::now();
        let session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => {
                info!(session_id = %session_id, "Session started");
                Session::new(session_id, now)
            }
        };
        let turn_number = session.turn_count;
        // Nothing detects the message language. The configured default only
        // picks the detector lexicon; the field carries no language and the
        // compiler applies the same default.
        let lexicon_language = self.compiler.config().default_language.clone();

        let (handshake, kernel_state) = self
            .handshake
            .process_handshake_response(text, &session.kernel);

        let (classification, detection) = self
            .perceive(text, &lexicon_language, session.previous_dimensional.clone())
            .await?;

        let input_hash = hash_bytes(text.as_bytes());
        let gate_request = GateRequest {
            request_id: Uuid::new_v4().to_string(),
            timestamp: now,
            input_hash: input_hash.clone(),
            input_text: text.to_string(),
            marker_version: self.runtime.gate.marker_version.clone(),
            context_scope_id: session_id.to_string(),
        };
        let resolved = resolve_signal(self.gate.as_deref(), &gate_request, classification).await;

        let field = self.assembler.assemble(
            text,
            &resolved.classification,
            &detection,
            &session.loop_history,
            None,
        );
        let governed = self.governor.apply(&field);
        let invariant_violations = self.governor.check_invariants(&field, &governed);

        let session_telemetry = SessionTelemetry {
            session_id: session_id.to_string(),
            started_at: session.created_at,
            now,
            turn_budget: self.runtime.turn_budget,
            time_budget_secs: self.runtime.time_budget_secs,
        };
        let turn = TurnTelemetry {
            turn_index: turn_number,
            depth_requested: requested_depth(&field),
            active_domains: active_domains(&field),
            delegation_attempt: field.has(SafetyFlag::DelegationAttempt),
            loop_count: field.loop_count,
            decision_markers: self.assembler.decision_markers(text),
        };
        let kernel = self.kernel.apply(&session_telemetry, &turn, &kernel_state);

        // The envelope, not the stored knobs, bounds this turn.
        let knobs = KnobSettings {
            max_depth_allowed: kernel.power_envelope.max_depth,
            enabled_dimensions: kernel.power_envelope.enabled_dimensions.clone(),
            ..kernel.new_state.knobs.clone()
        };
        let selection = select(&field, &governed, &knobs);

        let audit_spec = AuditSpec {
            session_id: session_id.to_string(),
            turn_number,
            input_hash: input_hash.clone(),
            hash_algorithm: "sha256".to_string(),
        };
        let compiled = self
            .compiler
            .compile(&field, &selection, &governed, &kernel, audit_spec);
        let chain_head = self.audit.head(session_id).await?;

        let (result, released, class, attempts) = match compiled {
            Ok(context) => {
                let (result, produced, attempts) = self
                    .run_ladder(&LadderRun {
                        context: &context,
                        selection: &selection,
                        field: &field,
                        message: text,
                        session_id,
                        turn_number,
                        previous_hash: &session.last_audit_hash,
                        chain_head: &chain_head,
                        closed: kernel_state.is_closed(),
                    })
                    .await?;
                let execution = context.context();
                let released = if result.audit_entry.record.fallback_level.is_terminal() {
                    self.renderer
                        .render(FallbackLevel::Stop, &selection, &execution.output.language)
                        .unwrap_or_default()
                } else {
                    match produced {
                        Produced::Output(output) => output.text,
                        Produced::Failed(_) | Produced::Withheld => String::new(),
                    }
                };
                (result, released, execution.runtime_class, attempts)
            }
            Err(err) => {
                // Nothing was sealed, so nothing is generated: the turn stops.
                let reason = err.to_string();
                let result = self.verifier.reject_context(&RejectedContext {
                    reason: &reason,
                    selection: &selection,
                    field: &field,
                    session_id,
                    turn_number,
                    input_hash: &input_hash,
                    chain_head: &chain_head,
                    timestamp: Utc::now(),
                })?;
                let language = field
                    .language
                    .clone()
                    .unwrap_or_else(|| self.compiler.config().default_language.clone());
                let released = self
                    .renderer
                    .render(FallbackLevel::Stop, &selection, &language)
                    .unwrap_or_default();
                let class = runtime_class(selection.atmosphere, field.arousal, selection.mode);
                (result, released, class, 0)
            }
        };

        let entry = result.audit_entry.clone();
        let level = entry.record.fallback_level;

        let mut next_kernel = kernel.new_state.clone();
        if kernel.power_envelope.continuation == ContinuationPolicy::Close
            && !next_kernel.is_closed()
        {
            next_kernel = end_session(&next_kernel);
            info!(session_id = %session_id, turn = turn_number, "Session budget exhausted");
        }
        let session_closed = next_kernel.is_closed();

        let updated = Session {
            turn_count: turn_number + 1,
            kernel: next_kernel,
            last_audit_hash: entry.entry_hash.clone(),
            previous_dimensional: Some(detection.state.clone()),
            loop_history: LoopHistory {
                previous_primary: detection.state.primary_horizontal.clone(),
                loop_count: field.loop_count,
            },
            ..session
        };
        self.commit(guard, entry.clone(), updated).await?;

        info!(
            session_id = %session_id,
            turn = turn_number,
            class = ?class,
            level = level.as_str(),
            action = ?entry.record.action,
            attempts,
            "Turn complete"
        );

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            turn_number,
            text: released,
            level,
            action: entry.record.action,
            passed: result.passed,
            violations: result.violations,
            handshake_prompt: kernel.prompt_handshake.clone(),
            handshake,
            signal_source: resolved.source,
            runtime_class: class,
            selection,
            depth_ceiling: kernel.power_envelope.max_depth,
            kernel_rules: kernel.rules_applied.clone(),
            governor_rules: governed.rules_applied.clone(),
            invariant_violations,
            attempts,
            entry_hash: entry.entry_hash,
            session_closed,
        })
    }

    /// Close a session. Later turns receive a presence statement only.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))?;
        if session.is_closed() {
            return Ok(());
        }
        session.kernel = end_session(&session.kernel);
        self.sessions.put(session).await?;
        info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    pub async fn audit_trail(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.entries(session_id).await?)
    }

    /// Walk a session's chain from its genesis hash.
    pub async fn verify_trail(&self, session_id: &str) -> Result<ChainVerification> {
        let entries = self.audit.entries(session_id).await?;
        let verification = verify_chain(&entries, &genesis_hash(session_id));
        if !verification.valid {
            warn!(
                session_id = %session_id,
                first_invalid = ?verification.first_invalid_index,
                "Audit chain failed verification"
            );
        }
        Ok(verification)
    }

    /// Drop lock entries for idle sessions.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    /// Produce and verify until the verifier ends the turn. Returns the
    /// final result, what was produced for it and the attempt count.
    async fn run_ladder(
        &self,
        run: &LadderRun<'_>,
    ) -> Result<(VerificationResult, Produced, u32)> {
        let execution = run.context.context();
        let mut ladder = LadderState::start(starting_level(
            execution.runtime_class,
            run.closed,
            &execution.fallback,
        ));
        let mut generation_calls = 0;

        loop {
            ladder.record_attempt();
            let produced = self
                .produce(
                    run.context,
                    run.selection,
                    run.message,
                    ladder.level,
                    &mut generation_calls,
                )
                .await;
            let result = self.verifier.verify(&VerifyRequest {
                attempt: produced.as_attempt(),
                context: run.context,
                selection: run.selection,
                field: run.field,
                session_id: run.session_id,
                turn_number: run.turn_number,
                previous_hash: run.previous_hash,
                chain_head: run.chain_head,
                ladder,
                timestamp: Utc::now(),
            })?;
            if result.is_final() {
                return Ok((result, produced, ladder.total_attempts));
            }
            ladder.advance_to(result.fallback_level);
        }
    }

    /// Classify and detect on the blocking pool, in parallel.
    async fn perceive(
        &self,
        text: &str,
        language: &str,
        prior: Option<DimensionalState>,
    ) -> Result<(Classification, Detection)> {
        let classifier = Arc::clone(&self.classifier);
        let detector = Arc::clone(&self.detector);
        let for_classifier = text.to_string();
        let for_detector = text.to_string();
        let language = language.to_string();

        let classify = tokio::task::spawn_blocking(move || classifier.classify(&for_classifier));
        let detect = tokio::task::spawn_blocking(move || {
            detector.analyze(&for_detector, &language, prior.as_ref())
        });
        let (classification, detection) = tokio::try_join!(classify, detect)?;
        debug!(
            signal = ?classification.signal,
            reason = ?classification.reason_code,
            emergency = detection.state.emergency_detected,
            "Perception complete"
        );
        Ok((classification, detection))
    }

    async fn produce(
        &self,
        context: &CompiledContext,
        selection: &ProtocolSelection,
        message: &str,
        level: FallbackLevel,
        generation_calls: &mut u32,
    ) -> Produced {
        let execution = context.context();
        match level {
            FallbackLevel::Initial | FallbackLevel::Regenerate => {
                if *generation_calls >= execution.resources.max_generation_calls {
                    return Produced::Failed("generation call limit reached".to_string());
                }
                *generation_calls += 1;
                match generate_within(self.generator.as_ref(), execution, message).await {
                    Ok(output) => Produced::Output(output),
                    Err(e) => {
                        debug!(context_id = %execution.context_id, error = %e, "Generation failed");
                        Produced::Failed(e.to_string())
                    }
                }
            }
            FallbackLevel::Stop => Produced::Withheld,
            template => {
                match self
                    .renderer
                    .render(template, selection, &execution.output.language)
                {
                    Some(text) => Produced::Output(GeneratedOutput::template(
                        text,
                        execution.output.language.clone(),
                    )),
                    None => Produced::Failed(format!("no template for {}", template.as_str())),
                }
            }
        }
    }

    /// Append the entry, then store the session, holding the session lock
    /// throughout. Runs to completion even if the caller is cancelled.
    async fn commit(
        &self,
        guard: tokio::sync::OwnedMutexGuard<()>,
        entry: AuditEntry,
        session: Session,
    ) -> Result<()> {
        let audit = Arc::clone(&self.audit);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let _guard = guard;
            audit.append(&entry).await?;
            sessions.put(session).await?;
            Ok::<_, RuntimeError>(())
        })
        .await?
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("gate", &self.gate.is_some())
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use covenant_governance::HANDSHAKE_PROMPT;
    use covenant_types::ExecutionContext;

    use crate::generator::GenerationError;

    struct Echo(&'static str);

    #[async_trait]
    impl Generator for Echo {
        async fn generate(
            &self,
            context: &ExecutionContext,
            _message: &str,
        ) -> std::result::Result<GeneratedOutput, GenerationError> {
            let mut output = GeneratedOutput::template(self.0, context.output.language.clone());
            output.generation_method = covenant_types::GenerationMethod::External;
            Ok(output)
        }
    }

    fn pipeline(reply: &'static str) -> Pipeline {
        Pipeline::new(
            &CovenantConfig::default(),
            Arc::new(Echo(reply)),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap()
    }

    #[test]
    fn classifier_follows_configuration() {
        let mut config = CovenantConfig::default();
        config.classifier.suppression_factor = 1.0;
        let p = Pipeline::new(
            &config,
            Arc::new(Echo("ok")),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap();
        assert_eq!(p.classifier.config(), &config.classifier);
        let result = p.classifier.classify("Hypothetically, should I quit?");
        assert_eq!(result.signal, covenant_types::GateSignal::D3);
    }

    #[tokio::test]
    async fn first_turn_creates_session() {
        let p = pipeline("That sounds like a lot. What feels most present for you right now?");
        let outcome = p
            .process_turn("s1", "Work has been busy and I keep thinking about it.")
            .await
            .unwrap();
        assert_eq!(outcome.turn_number, 0);
        assert_eq!(outcome.signal_source, SignalSource::Local);
        let session = p.session("s1").await.unwrap().unwrap();
        assert_eq!(session.turn_count, 1);
        assert_eq!(session.last_audit_hash, outcome.entry_hash);
        assert_eq!(p.audit_trail("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ending_unknown_session_fails() {
        let p = pipeline("ok");
        let err = p.end_session("missing").await.unwrap_err();
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn closed_session_gets_presence() {
        let p = pipeline("Here is a long answer about what you should do next.");
        p.process_turn("s2", "Hello there.").await.unwrap();
        p.end_session("s2").await.unwrap();

        let outcome = p.process_turn("s2", "Are you still there?").await.unwrap();
        assert_eq!(outcome.level, FallbackLevel::Presence);
        assert_eq!(outcome.action, ActionTaken::Deliver);
        assert!(outcome.text.starts_with("I'm here with you."));
        assert!(outcome.kernel_rules.contains(&"MK-SESSION-CLOSED".to_string()));
        assert!(outcome.session_closed);
        assert!(p.verify_trail("s2").await.unwrap().valid);
    }

    #[tokio::test]
    async fn handshake_prompt_is_not_a_field_input() {
        assert!(!HANDSHAKE_PROMPT.is_empty());
        let p = pipeline("I hear you. What would you like to explore?");
        let outcome = p.process_turn("s3", "Hi.").await.unwrap();
        assert_eq!(outcome.handshake, HandshakeOutcome::Ignored);
    }
}
