use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::HorizontalDomain;
use crate::protocol::{Depth, Pacing};

/// Per-turn telemetry fed to the meta-kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnTelemetry {
    /// Zero-based turn index within the session
    pub turn_index: u32,
    /// Depth the field state would call for before any ceiling applies
    pub depth_requested: Depth,
    pub active_domains: Vec<HorizontalDomain>,
    pub delegation_attempt: bool,
    pub loop_count: u32,
    /// Count of first-person decision markers ("I decided", "I'll")
    pub decision_markers: u32,
}

/// Session-wide telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionTelemetry {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub turn_budget: u32,
    pub time_budget_secs: u64,
}

/// Derived signals computed from the telemetry window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedTelemetry {
    /// Mean absolute depth change between consecutive turns (0–2)
    pub depth_velocity: f64,
    /// Distinct domains touched in the window, normalised to [0, 1]
    pub domain_spread: f64,
    /// Fraction of window turns that stayed on the same topic
    pub continuity_pressure: f64,
    /// Fraction of window turns with a delegation attempt
    pub delegation_rate: f64,
    /// Latest loop counter, saturated to [0, 1]
    pub loop_tendency: f64,
    pub turns_remaining: u32,
    pub time_remaining_secs: u64,
    /// 0 (user hands everything over) to 1 (user decides independently)
    pub agency_signal: f64,
    /// Number of turns the window covered
    pub window_len: usize,
}

/// What the session should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    Continue,
    WindDown,
    Close,
}

/// Behavioural knobs the meta-kernel controls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnobSettings {
    pub max_depth_allowed: Depth,
    pub enabled_dimensions: BTreeSet<HorizontalDomain>,
    pub continuation: ContinuationPolicy,
    /// 1.0 = no narrowing; lower values narrow response scope
    pub narrowing_factor: f64,
    pub deep_mode_handshake_required: bool,
    pub turns_remaining: u32,
    /// 0.0–1.0
    pub power_level: f64,
    pub pacing: Pacing,
}

impl Default for KnobSettings {
    fn default() -> Self {
        Self {
            max_depth_allowed: Depth::Medium,
            enabled_dimensions: HorizontalDomain::ALL.iter().copied().collect(),
            continuation: ContinuationPolicy::Continue,
            narrowing_factor: 1.0,
            deep_mode_handshake_required: true,
            turns_remaining: 0,
            power_level: 0.5,
            pacing: Pacing::Responsive,
        }
    }
}

/// Meta-kernel lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelPhase {
    Idle,
    Active,
    HandshakePending,
    Recovery,
    /// Terminal
    Closed,
}

/// Session-scoped meta-kernel state.
///
/// Passed into and returned from every kernel call; no other component
/// writes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaKernelState {
    /// Append-only, bounded telemetry window (oldest first)
    pub history: VecDeque<TurnTelemetry>,
    pub knobs: KnobSettings,
    pub session_started_at: Option<DateTime<Utc>>,
    pub turns_elapsed: u32,
    pub deep_mode_active: bool,
    pub handshake_pending: bool,
    pub recovery_mode: bool,
    pub recovery_turns_remaining: u32,
    pub coherence_estimate: f64,
    pub previous_depth: Depth,
    pub phase: KernelPhase,
    /// Ceiling to restore when recovery ends
    pub pre_recovery_ceiling: Option<Depth>,
    /// Telemetry before this turn index is ignored by windowed signals
    pub telemetry_epoch: u32,
}

impl MetaKernelState {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            knobs: KnobSettings::default(),
            session_started_at: None,
            turns_elapsed: 0,
            deep_mode_active: false,
            handshake_pending: false,
            recovery_mode: false,
            recovery_turns_remaining: 0,
            coherence_estimate: 1.0,
            previous_depth: Depth::Surface,
            phase: KernelPhase::Idle,
            pre_recovery_ceiling: None,
            telemetry_epoch: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == KernelPhase::Closed
    }
}

impl Default for MetaKernelState {
    fn default() -> Self {
        Self::new()
    }
}

/// The knob envelope the rest of the turn must respect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerEnvelope {
    pub max_depth: Depth,
    pub enabled_dimensions: BTreeSet<HorizontalDomain>,
    pub pacing: Pacing,
    pub continuation: ContinuationPolicy,
    pub turns_remaining: u32,
    pub time_remaining_secs: u64,
    pub power_level: f64,
}

/// A single knob transition, for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnobChange {
    pub rule_id: String,
    pub knob: String,
    pub from: String,
    pub to: String,
}

/// Output of one meta-kernel turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaKernelResult {
    pub rules_applied: Vec<String>,
    pub knob_changes: Vec<KnobChange>,
    pub power_envelope: PowerEnvelope,
    /// Confirmation question to put to the user before deep mode unlocks
    pub prompt_handshake: Option<String>,
    pub computed: ComputedTelemetry,
    pub new_state: MetaKernelState,
}
