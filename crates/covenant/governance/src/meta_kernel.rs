//! Meta-kernel: the session-level power governor.
//!
//! ```text
//! IDLE ──first turn──► ACTIVE ◄──answer──► HANDSHAKE_PENDING
//!                        │  ▲
//!        loop/delegation │  │ countdown reaches zero
//!                        ▼  │
//!                      RECOVERY
//!
//! any phase ──end_session──► CLOSED
//! ```
//!
//! [`MetaKernel::apply`] is a pure function of
//! `(session telemetry, turn telemetry, state)`. It never raises the depth
//! ceiling on its own; only an accepted handshake does that.

use std::collections::BTreeSet;

use covenant_types::{
    ComputedTelemetry, ContinuationPolicy, Depth, HorizontalDomain, KernelPhase, KnobChange,
    KnobSettings, MetaKernelResult, MetaKernelState, Pacing, PowerEnvelope, SessionTelemetry,
    TurnTelemetry,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::telemetry;

/// Question put to the user before deep mode unlocks.
pub const HANDSHAKE_PROMPT: &str =
    "This could go deeper. Do you want to continue at a deeper level? (yes / no)";

/// Meta-kernel tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaKernelConfig {
    /// Telemetry entries retained in state
    pub history_limit: usize,
    /// Entries the windowed signals look at
    pub window: usize,
    /// Forced turns once recovery is entered
    pub recovery_turns: u32,
    /// Ceiling held during recovery
    pub recovery_ceiling: Depth,
    /// Window entries required before recovery can trigger
    pub recovery_min_history: usize,
    pub recovery_loop_threshold: f64,
    pub recovery_delegation_threshold: f64,
    /// Ceiling before any handshake
    pub default_max_depth: Depth,
    /// Minimum agency signal for a handshake to be offered
    pub handshake_min_agency: f64,
}

impl Default for MetaKernelConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            window: 5,
            recovery_turns: 5,
            recovery_ceiling: Depth::Surface,
            recovery_min_history: 3,
            recovery_loop_threshold: 0.75,
            recovery_delegation_threshold: 0.5,
            default_max_depth: Depth::Medium,
            handshake_min_agency: 0.4,
        }
    }
}

/// Condition over computed telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KernelCondition {
    TurnsRemainingAtMost(u32),
    TimeRemainingAtMost(u64),
    DepthVelocityAbove(f64),
    DomainSpreadAbove(f64),
    AgencyBelow(f64),
    Any(Vec<KernelCondition>),
    All(Vec<KernelCondition>),
}

impl KernelCondition {
    pub fn matches(&self, c: &ComputedTelemetry) -> bool {
        match self {
            KernelCondition::TurnsRemainingAtMost(n) => c.turns_remaining <= *n,
            KernelCondition::TimeRemainingAtMost(s) => c.time_remaining_secs <= *s,
            KernelCondition::DepthVelocityAbove(v) => c.depth_velocity > *v,
            KernelCondition::DomainSpreadAbove(v) => c.domain_spread > *v,
            KernelCondition::AgencyBelow(v) => c.agency_signal < *v,
            KernelCondition::Any(conds) => conds.iter().any(|k| k.matches(c)),
            KernelCondition::All(conds) => conds.iter().all(|k| k.matches(c)),
        }
    }
}

/// Knob adjustments. Every field only tightens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelEffect {
    pub depth_cap: Option<Depth>,
    pub continuation: Option<ContinuationPolicy>,
    pub narrowing: Option<f64>,
    pub pacing: Option<Pacing>,
    /// Restrict enabled dimensions to the current turn's domains
    pub restrict_dimensions: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelRule {
    pub id: String,
    pub condition: KernelCondition,
    pub effect: KernelEffect,
}

impl KernelRule {
    /// Shipped rules, in evaluation order.
    pub fn defaults() -> Vec<KernelRule> {
        vec![
            KernelRule {
                id: "MK-BUDGET-EXHAUSTED".into(),
                condition: KernelCondition::Any(vec![
                    KernelCondition::TurnsRemainingAtMost(0),
                    KernelCondition::TimeRemainingAtMost(0),
                ]),
                effect: KernelEffect {
                    depth_cap: Some(Depth::Surface),
                    continuation: Some(ContinuationPolicy::Close),
                    narrowing: Some(0.25),
                    pacing: Some(Pacing::Slow),
                    restrict_dimensions: false,
                },
            },
            KernelRule {
                id: "MK-BUDGET-LOW".into(),
                condition: KernelCondition::Any(vec![
                    KernelCondition::TurnsRemainingAtMost(3),
                    KernelCondition::TimeRemainingAtMost(300),
                ]),
                effect: KernelEffect {
                    depth_cap: Some(Depth::Medium),
                    continuation: Some(ContinuationPolicy::WindDown),
                    narrowing: Some(0.5),
                    ..Default::default()
                },
            },
            KernelRule {
                id: "MK-DEPTH-VELOCITY".into(),
                condition: KernelCondition::DepthVelocityAbove(1.0),
                effect: KernelEffect {
                    depth_cap: Some(Depth::Medium),
                    pacing: Some(Pacing::Conservative),
                    ..Default::default()
                },
            },
            KernelRule {
                id: "MK-DOMAIN-SPREAD".into(),
                condition: KernelCondition::DomainSpreadAbove(0.5),
                effect: KernelEffect {
                    narrowing: Some(0.75),
                    restrict_dimensions: true,
                    ..Default::default()
                },
            },
            KernelRule {
                id: "MK-AGENCY-LOW".into(),
                condition: KernelCondition::AgencyBelow(0.3),
                effect: KernelEffect {
                    depth_cap: Some(Depth::Medium),
                    narrowing: Some(0.75),
                    pacing: Some(Pacing::Conservative),
                    ..Default::default()
                },
            },
        ]
    }
}

#[derive(Clone, Debug)]
pub struct MetaKernel {
    config: MetaKernelConfig,
    rules: Vec<KernelRule>,
}

impl Default for MetaKernel {
    fn default() -> Self {
        Self::new(MetaKernelConfig::default())
    }
}

impl MetaKernel {
    pub fn new(config: MetaKernelConfig) -> Self {
        Self::with_rules(config, KernelRule::defaults())
    }

    pub fn with_rules(config: MetaKernelConfig, rules: Vec<KernelRule>) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &MetaKernelConfig {
        &self.config
    }

    /// Run one turn.
    pub fn apply(
        &self,
        session: &SessionTelemetry,
        turn: &TurnTelemetry,
        state: &MetaKernelState,
    ) -> MetaKernelResult {
        let mut next = state.clone();
        let mut rules_applied = Vec::new();
        let mut knob_changes = Vec::new();

        if next.is_closed() {
            let computed = telemetry::compute(session, &next, self.config.window);
            let mut knobs = next.knobs.clone();
            knobs.max_depth_allowed = Depth::Surface;
            knobs.continuation = ContinuationPolicy::Close;
            knobs.turns_remaining = 0;
            return MetaKernelResult {
                rules_applied: vec!["MK-SESSION-CLOSED".into()],
                knob_changes,
                power_envelope: envelope(&knobs, &computed),
                prompt_handshake: None,
                computed,
                new_state: next,
            };
        }

        if next.phase == KernelPhase::Idle {
            next.phase = KernelPhase::Active;
            next.session_started_at = Some(session.started_at);
            info!(session_id = %session.session_id, "Meta-kernel activated");
        }

        next.history.push_back(turn.clone());
        while next.history.len() > self.config.history_limit {
            next.history.pop_front();
        }
        next.turns_elapsed = next.turns_elapsed.saturating_add(1);
        let mut computed = telemetry::compute(session, &next, self.config.window);

        // Recovery: exit, hold, or enter.
        let base_depth = if next.deep_mode_active {
            Depth::Deep
        } else {
            self.config.default_max_depth
        };
        let mut ceiling = base_depth;
        if next.recovery_mode {
            if next.recovery_turns_remaining == 0 {
                ceiling = next.pre_recovery_ceiling.take().unwrap_or(base_depth);
                next.recovery_mode = false;
                next.telemetry_epoch = turn.turn_index;
                computed = telemetry::compute(session, &next, self.config.window);
                rules_applied.push("MK-RECOVERY-EXIT".to_string());
                info!(
                    session_id = %session.session_id,
                    restored = ceiling.as_str(),
                    "Recovery finished"
                );
            } else {
                ceiling = self.config.recovery_ceiling;
                rules_applied.push("MK-RECOVERY-HOLD".to_string());
            }
        } else if computed.window_len >= self.config.recovery_min_history
            && (computed.loop_tendency >= self.config.recovery_loop_threshold
                || computed.delegation_rate >= self.config.recovery_delegation_threshold)
        {
            next.recovery_mode = true;
            next.recovery_turns_remaining = self.config.recovery_turns;
            next.pre_recovery_ceiling = Some(base_depth);
            next.handshake_pending = false;
            ceiling = self.config.recovery_ceiling;
            rules_applied.push("MK-RECOVERY-ENTER".to_string());
            info!(
                session_id = %session.session_id,
                loop_tendency = computed.loop_tendency,
                delegation_rate = computed.delegation_rate,
                turns = self.config.recovery_turns,
                "Entering recovery"
            );
        }

        let mut knobs = KnobSettings {
            max_depth_allowed: base_depth,
            enabled_dimensions: HorizontalDomain::ALL.iter().copied().collect(),
            continuation: ContinuationPolicy::Continue,
            narrowing_factor: 1.0,
            deep_mode_handshake_required: !next.deep_mode_active,
            turns_remaining: computed.turns_remaining,
            power_level: 0.0,
            pacing: Pacing::Responsive,
        };
        if ceiling != base_depth {
            let rule = rules_applied.last().cloned().unwrap_or_default();
            record(&mut knob_changes, &rule, "max_depth_allowed", base_depth.as_str(), ceiling.as_str());
            knobs.max_depth_allowed = ceiling;
        }

        for rule in &self.rules {
            if !rule.condition.matches(&computed) {
                continue;
            }
            debug!(rule_id = %rule.id, "Meta-kernel rule matched");
            rules_applied.push(rule.id.clone());
            self.apply_effect(rule, turn, &mut knobs, &mut knob_changes);
        }

        knobs.power_level = (computed.agency_signal * knobs.narrowing_factor).clamp(0.0, 1.0);

        // Deep requests are answered with a handshake, never silently.
        let mut prompt_handshake = None;
        if turn.depth_requested == Depth::Deep
            && knobs.max_depth_allowed < Depth::Deep
            && !next.deep_mode_active
            && !next.recovery_mode
            && !next.handshake_pending
            && knobs.continuation == ContinuationPolicy::Continue
            && computed.agency_signal >= self.config.handshake_min_agency
        {
            next.handshake_pending = true;
            prompt_handshake = Some(HANDSHAKE_PROMPT.to_string());
            rules_applied.push("MK-DEEP-REQUEST".to_string());
            info!(session_id = %session.session_id, "Deep mode handshake requested");
        }

        if next.recovery_mode {
            next.recovery_turns_remaining = next.recovery_turns_remaining.saturating_sub(1);
            next.phase = KernelPhase::Recovery;
        } else if next.handshake_pending {
            next.phase = KernelPhase::HandshakePending;
        } else {
            next.phase = KernelPhase::Active;
        }

        next.previous_depth = turn.depth_requested.min(knobs.max_depth_allowed);
        next.coherence_estimate = computed.continuity_pressure.max(1.0 - computed.domain_spread);
        next.knobs = knobs.clone();

        MetaKernelResult {
            rules_applied,
            knob_changes,
            power_envelope: envelope(&knobs, &computed),
            prompt_handshake,
            computed,
            new_state: next,
        }
    }

    fn apply_effect(
        &self,
        rule: &KernelRule,
        turn: &TurnTelemetry,
        knobs: &mut KnobSettings,
        changes: &mut Vec<KnobChange>,
    ) {
        let e = &rule.effect;
        if let Some(cap) = e.depth_cap {
            if cap < knobs.max_depth_allowed {
                record(changes, &rule.id, "max_depth_allowed", knobs.max_depth_allowed.as_str(), cap.as_str());
                knobs.max_depth_allowed = cap;
            }
        }
        if let Some(continuation) = e.continuation {
            if continuation > knobs.continuation {
                record(
                    changes,
                    &rule.id,
                    "continuation",
                    &format!("{:?}", knobs.continuation),
                    &format!("{continuation:?}"),
                );
                knobs.continuation = continuation;
            }
        }
        if let Some(narrowing) = e.narrowing {
            if narrowing < knobs.narrowing_factor {
                record(
                    changes,
                    &rule.id,
                    "narrowing_factor",
                    &knobs.narrowing_factor.to_string(),
                    &narrowing.to_string(),
                );
                knobs.narrowing_factor = narrowing;
            }
        }
        if let Some(pacing) = e.pacing {
            let merged = knobs.pacing.most_conservative(pacing);
            if merged != knobs.pacing {
                record(changes, &rule.id, "pacing", knobs.pacing.as_str(), merged.as_str());
                knobs.pacing = merged;
            }
        }
        if e.restrict_dimensions && !turn.active_domains.is_empty() {
            let focus: BTreeSet<HorizontalDomain> = turn.active_domains.iter().copied().collect();
            let restricted: BTreeSet<_> =
                knobs.enabled_dimensions.intersection(&focus).copied().collect();
            if restricted != knobs.enabled_dimensions {
                record(
                    changes,
                    &rule.id,
                    "enabled_dimensions",
                    &knobs.enabled_dimensions.len().to_string(),
                    &restricted.len().to_string(),
                );
                knobs.enabled_dimensions = restricted;
            }
        }
    }
}

/// Move the kernel to the terminal phase.
pub fn end_session(state: &MetaKernelState) -> MetaKernelState {
    let mut next = state.clone();
    next.phase = KernelPhase::Closed;
    next.handshake_pending = false;
    next.knobs.continuation = ContinuationPolicy::Close;
    next
}

fn envelope(knobs: &KnobSettings, computed: &ComputedTelemetry) -> PowerEnvelope {
    PowerEnvelope {
        max_depth: knobs.max_depth_allowed,
        enabled_dimensions: knobs.enabled_dimensions.clone(),
        pacing: knobs.pacing,
        continuation: knobs.continuation,
        turns_remaining: knobs.turns_remaining,
        time_remaining_secs: computed.time_remaining_secs,
        power_level: knobs.power_level,
    }
}

fn record(changes: &mut Vec<KnobChange>, rule_id: &str, knob: &str, from: &str, to: &str) {
    changes.push(KnobChange {
        rule_id: rule_id.to_string(),
        knob: knob.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    });
}
