//! End-to-end turns through the pipeline with scripted generators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use covenant_audit::{verify_chain, ActionTaken, FileAuditSink, MemoryAuditSink};
use covenant_governance::{DomainRule, RuleCondition, RuleEffect, RuleSet};
use covenant_runtime::{
    AuditBackend, CovenantConfig, GateError, GateRequest, GateResponse, GateService,
    GenerationError, Generator, MemorySessionStore, Pipeline, SignalSource,
};
use covenant_types::{
    Depth, ExecutionContext, FallbackLevel, GateSignal, GeneratedOutput, GenerationMethod,
    Precedence, RuntimeClass, ValidatorId, ViolationCategory,
};

/// Replies with fixed text and counts calls.
struct Scripted {
    reply: &'static str,
    calls: AtomicU32,
}

impl Scripted {
    fn new(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for Scripted {
    async fn generate(
        &self,
        context: &ExecutionContext,
        _message: &str,
    ) -> Result<GeneratedOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedOutput {
            text: self.reply.to_string(),
            language: context.output.language.clone(),
            word_count: self.reply.split_whitespace().count() as u32,
            generation_method: GenerationMethod::External,
        })
    }
}

/// Never answers in time.
struct Stalled;

#[async_trait]
impl Generator for Stalled {
    async fn generate(
        &self,
        _context: &ExecutionContext,
        _message: &str,
    ) -> Result<GeneratedOutput, GenerationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(GenerationError::Empty)
    }
}

struct FixedGate(GateSignal);

#[async_trait]
impl GateService for FixedGate {
    async fn check(&self, request: &GateRequest) -> Result<GateResponse, GateError> {
        Ok(GateResponse {
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
            signal: self.0,
            halt: true,
            marker_hash: "markers".into(),
            reason_code: "ACUTE_RISK".into(),
        })
    }
}

fn pipeline_with(config: &CovenantConfig, generator: Arc<dyn Generator>) -> Pipeline {
    Pipeline::new(
        config,
        generator,
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryAuditSink::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn emergency_turn_is_grounded_without_generation() {
    let generator = Scripted::new("You should call a doctor right away.");
    let pipeline = pipeline_with(&CovenantConfig::default(), generator.clone());

    let outcome = pipeline
        .process_turn("panic", "I can't breathe, my heart is pounding, I'm scared")
        .await
        .unwrap();

    assert_eq!(outcome.runtime_class, RuntimeClass::Templated);
    assert_eq!(outcome.level, FallbackLevel::Medium);
    assert_eq!(outcome.action, ActionTaken::Deliver);
    assert!(outcome.passed, "{:?}", outcome.violations);
    assert!(outcome.text.contains("breath"));
    assert!(!outcome.text.to_lowercase().contains("you should"));
    assert!(outcome.governor_rules.contains(&"CONST-EMERGENCY".to_string()));
    assert_eq!(generator.calls(), 0);

    let trail = pipeline.verify_trail("panic").await.unwrap();
    assert!(trail.valid);
    assert_eq!(trail.total_entries, 1);
}

#[tokio::test]
async fn repeated_delegation_enters_and_leaves_recovery() {
    let generator = Scripted::new("This is your decision to make. What feels right to you?");
    let pipeline = pipeline_with(&CovenantConfig::default(), generator);
    let message = "Please decide for me, just tell me what to do.";

    let mut outcomes = Vec::new();
    for _ in 0..8 {
        outcomes.push(pipeline.process_turn("delegation", message).await.unwrap());
    }

    for outcome in &outcomes[..2] {
        assert_eq!(outcome.depth_ceiling, Depth::Medium);
        assert!(!outcome.kernel_rules.iter().any(|r| r.starts_with("MK-RECOVERY")));
    }
    assert!(outcomes[2].kernel_rules.contains(&"MK-RECOVERY-ENTER".to_string()));
    for outcome in &outcomes[2..7] {
        assert_eq!(outcome.depth_ceiling, Depth::Surface, "turn {}", outcome.turn_number);
        assert!(outcome.selection.depth <= Depth::Surface);
    }
    for outcome in &outcomes[3..7] {
        assert!(outcome.kernel_rules.contains(&"MK-RECOVERY-HOLD".to_string()));
    }
    assert!(outcomes[7].kernel_rules.contains(&"MK-RECOVERY-EXIT".to_string()));
    assert_eq!(outcomes[7].depth_ceiling, Depth::Medium);

    for outcome in &outcomes {
        assert!(outcome.passed, "turn {}: {:?}", outcome.turn_number, outcome.violations);
        assert!(outcome.governor_rules.contains(&"SAFETY-DELEGATION".to_string()));
    }

    let trail = pipeline.audit_trail("delegation").await.unwrap();
    assert_eq!(trail.len(), 8);
    for (i, entry) in trail.iter().enumerate() {
        assert_eq!(entry.turn_number(), i as u32);
    }
    assert!(pipeline.verify_trail("delegation").await.unwrap().valid);
}

#[tokio::test]
async fn stalled_generator_falls_back_to_a_template() {
    let mut config = CovenantConfig::default();
    config.compiler.max_latency_ms = 50;
    let pipeline = pipeline_with(&config, Arc::new(Stalled));

    let outcome = pipeline
        .process_turn("slow", "Work has been stressful and I keep replaying meetings.")
        .await
        .unwrap();

    assert!(outcome.level >= FallbackLevel::Medium);
    assert_ne!(outcome.action, ActionTaken::Deliver);
    assert!(!outcome.text.is_empty());
    assert!(outcome.attempts >= 2);

    let trail = pipeline.audit_trail("slow").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].record.attempts, outcome.attempts);
    assert_eq!(trail[0].record.fallback_level, outcome.level);
}

#[tokio::test]
async fn generator_is_called_at_most_the_class_limit() {
    // Directive phrasing fails every generated attempt.
    let generator = Scripted::new("You really should just quit. My advice is to leave today.");
    let pipeline = pipeline_with(&CovenantConfig::default(), generator.clone());

    let outcome = pipeline
        .process_turn("limit", "Should I take the job offer or stay where I am?")
        .await
        .unwrap();

    assert!(generator.calls() <= RuntimeClass::Open.max_generation_calls());
    assert!(outcome.level >= FallbackLevel::Medium);
    assert!(!outcome.text.to_lowercase().contains("my advice"));
}

#[tokio::test]
async fn remote_gate_can_raise_the_signal() {
    let generator = Scripted::new("Sounds like a long day. What stood out?");
    let pipeline = pipeline_with(&CovenantConfig::default(), generator.clone())
        .with_gate(Arc::new(FixedGate(GateSignal::D1)));

    let outcome = pipeline
        .process_turn("gated", "I had a long day at work.")
        .await
        .unwrap();

    assert_eq!(outcome.signal_source, SignalSource::Remote);
    assert_eq!(outcome.runtime_class, RuntimeClass::Templated);
    assert!(outcome.text.contains("crisis line"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn exhausted_budget_closes_the_session() {
    let mut config = CovenantConfig::default();
    config.runtime.turn_budget = 2;
    let pipeline = pipeline_with(
        &config,
        Scripted::new("I hear you. What would you like to look at?"),
    );

    let first = pipeline.process_turn("budget", "Hello.").await.unwrap();
    assert!(!first.session_closed);
    let second = pipeline.process_turn("budget", "Still here.").await.unwrap();
    assert!(second.kernel_rules.contains(&"MK-BUDGET-EXHAUSTED".to_string()));
    assert!(second.session_closed);

    let third = pipeline.process_turn("budget", "Anything else?").await.unwrap();
    assert_eq!(third.level, FallbackLevel::Presence);
    assert!(third.kernel_rules.contains(&"MK-SESSION-CLOSED".to_string()));
    assert!(pipeline.verify_trail("budget").await.unwrap().valid);
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialised() {
    let generator = Scripted::new("I'm here with you. What feels most present?");
    let pipeline = Arc::new(pipeline_with(&CovenantConfig::default(), generator));

    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline
                .process_turn("shared", &format!("Thinking about my family again, take {i}."))
                .await
        }));
    }
    let mut turns = Vec::new();
    for handle in handles {
        turns.push(handle.await.unwrap().unwrap().turn_number);
    }
    turns.sort_unstable();
    assert_eq!(turns, (0..8).collect::<Vec<u32>>());

    let session = pipeline.session("shared").await.unwrap().unwrap();
    assert_eq!(session.turn_count, 8);
    let trail = pipeline.verify_trail("shared").await.unwrap();
    assert!(trail.valid);
    assert_eq!(trail.total_entries, 8);
}

#[tokio::test]
async fn sessions_do_not_share_chains() {
    let pipeline = pipeline_with(
        &CovenantConfig::default(),
        Scripted::new("I hear you. What matters most here?"),
    );
    pipeline.process_turn("a", "Hello.").await.unwrap();
    pipeline.process_turn("b", "Hello.").await.unwrap();
    pipeline.process_turn("a", "Again.").await.unwrap();

    assert_eq!(pipeline.audit_trail("a").await.unwrap().len(), 2);
    assert_eq!(pipeline.audit_trail("b").await.unwrap().len(), 1);
    assert!(pipeline.verify_trail("a").await.unwrap().valid);
    assert!(pipeline.verify_trail("b").await.unwrap().valid);
}

#[tokio::test]
async fn file_backend_persists_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let mut config = CovenantConfig::default();
    config.audit.backend = AuditBackend::File;
    config.audit.path = path.clone();

    let pipeline = Pipeline::from_config(
        &config,
        Scripted::new("I hear you. What would help most right now?"),
    )
    .await
    .unwrap();
    pipeline.process_turn("durable", "My week was rough.").await.unwrap();
    pipeline.process_turn("durable", "Mostly work.").await.unwrap();
    drop(pipeline);

    let reopened = FileAuditSink::open(&path).await.unwrap();
    let entries = reopened.read_all().await.unwrap();
    assert_eq!(entries.len(), 2);
    let check = verify_chain(&entries, &covenant_audit::genesis_hash("durable"));
    assert!(check.valid, "{:?}", check.error_message);
}

#[tokio::test]
async fn session_id_matching_a_field_flag_is_not_a_leak() {
    let pipeline = pipeline_with(
        &CovenantConfig::default(),
        Scripted::new("That sounds like a real question for you. What draws you to it?"),
    );

    let outcome = pipeline
        .process_turn("normative_framing", "Hypothetically, should I quit?")
        .await
        .unwrap();

    assert!(!outcome
        .violations
        .iter()
        .any(|v| v.validator == ValidatorId::ContextIntegrity));
    let trail = pipeline.audit_trail("normative_framing").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].entry_hash, outcome.entry_hash);
    assert!(trail[0].record.context_hash.is_some());
    assert!(pipeline.verify_trail("normative_framing").await.unwrap().valid);
}

#[tokio::test]
async fn uncompilable_context_stops_and_is_audited() {
    // A rule id that equals a field flag lands in the constraints the
    // generator would see, so the context cannot be sealed.
    let mut rules = RuleSet::constitutional_defaults();
    rules
        .push(DomainRule {
            id: "normative_framing".into(),
            description: "Rule named after a field flag".into(),
            precedence: Precedence::Domain,
            condition: RuleCondition::Always,
            effect: RuleEffect::default(),
        })
        .unwrap();
    let generator = Scripted::new("Here is what I think you should do.");
    let pipeline =
        pipeline_with(&CovenantConfig::default(), generator.clone()).with_rules(rules);

    let outcome = pipeline
        .process_turn("sealed", "Hypothetically, should I quit?")
        .await
        .unwrap();

    assert_eq!(outcome.level, FallbackLevel::Stop);
    assert_eq!(outcome.action, ActionTaken::Stop);
    assert!(!outcome.passed);
    assert_eq!(outcome.text, "I'm going to pause here for now.");
    assert_eq!(outcome.attempts, 0);
    assert_eq!(outcome.violations.len(), 1);
    let violation = &outcome.violations[0];
    assert_eq!(violation.validator, ValidatorId::ContextIntegrity);
    assert_eq!(violation.category, ViolationCategory::Integrity);
    assert!(violation.is_critical());
    assert_eq!(generator.calls(), 0);

    let trail = pipeline.audit_trail("sealed").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].record.action, ActionTaken::Stop);
    assert!(trail[0].record.context_hash.is_none());
    assert_eq!(trail[0].entry_hash, outcome.entry_hash);

    // The chain continues from the stopped turn.
    let next = pipeline.process_turn("sealed", "I had a long day.").await.unwrap();
    assert_eq!(next.turn_number, 1);
    let check = pipeline.verify_trail("sealed").await.unwrap();
    assert!(check.valid);
    assert_eq!(check.total_entries, 2);
}
