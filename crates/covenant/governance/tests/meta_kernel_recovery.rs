//! Recovery and handshake scenarios for the meta-kernel.

use chrono::{Duration, Utc};
use covenant_governance::{
    end_session, HandshakeInterpreter, HandshakeOutcome, MetaKernel, MetaKernelConfig,
};
use covenant_types::{
    Depth, HorizontalDomain, KernelPhase, MetaKernelState, SessionTelemetry, TurnTelemetry,
};

fn session() -> SessionTelemetry {
    let now = Utc::now();
    SessionTelemetry {
        session_id: "recovery".into(),
        started_at: now - Duration::seconds(30),
        now,
        turn_budget: 100,
        time_budget_secs: 7200,
    }
}

fn turn(index: u32, delegation: bool) -> TurnTelemetry {
    TurnTelemetry {
        turn_index: index,
        depth_requested: Depth::Medium,
        active_domains: vec![HorizontalDomain::Decision],
        delegation_attempt: delegation,
        loop_count: 0,
        decision_markers: if delegation { 0 } else { 2 },
    }
}

#[test]
fn recovery_holds_for_configured_turns_then_restores() {
    let config = MetaKernelConfig {
        recovery_turns: 5,
        ..MetaKernelConfig::default()
    };
    let kernel = MetaKernel::new(config);
    let mut state = MetaKernelState::new();

    // Three delegation turns fill the window and trigger recovery on the third.
    for i in 0..2 {
        let r = kernel.apply(&session(), &turn(i, true), &state);
        assert_eq!(r.power_envelope.max_depth, Depth::Medium);
        state = r.new_state;
    }
    let entered = kernel.apply(&session(), &turn(2, true), &state);
    assert!(entered.rules_applied.contains(&"MK-RECOVERY-ENTER".to_string()));
    assert_eq!(entered.new_state.phase, KernelPhase::Recovery);
    assert_eq!(entered.new_state.pre_recovery_ceiling, Some(Depth::Medium));
    state = entered.new_state;

    // Entry turn plus four held turns: five forced turns in total.
    let mut forced = 1;
    let mut remaining = state.recovery_turns_remaining;
    for i in 3..7 {
        let r = kernel.apply(&session(), &turn(i, false), &state);
        assert_eq!(r.power_envelope.max_depth, Depth::Surface);
        assert!(r.rules_applied.contains(&"MK-RECOVERY-HOLD".to_string()));
        assert!(r.new_state.recovery_turns_remaining < remaining);
        remaining = r.new_state.recovery_turns_remaining;
        forced += 1;
        state = r.new_state;
    }
    assert_eq!(forced, 5);
    assert_eq!(state.recovery_turns_remaining, 0);
    assert!(state.recovery_mode);

    // The turn after the counter reaches zero releases to the old ceiling.
    let released = kernel.apply(&session(), &turn(7, false), &state);
    assert!(released.rules_applied.contains(&"MK-RECOVERY-EXIT".to_string()));
    assert_eq!(released.power_envelope.max_depth, Depth::Medium);
    assert_eq!(released.new_state.phase, KernelPhase::Active);
    assert!(!released.new_state.recovery_mode);
    assert_eq!(released.new_state.pre_recovery_ceiling, None);
}

#[test]
fn recovery_ignores_deep_requests() {
    let kernel = MetaKernel::default();
    let mut state = MetaKernelState::new();
    for i in 0..3 {
        state = kernel.apply(&session(), &turn(i, true), &state).new_state;
    }
    assert!(state.recovery_mode);
    let mut deep = turn(3, false);
    deep.depth_requested = Depth::Deep;
    let r = kernel.apply(&session(), &deep, &state);
    assert!(r.prompt_handshake.is_none());
    assert_eq!(r.power_envelope.max_depth, Depth::Surface);
}

#[test]
fn handshake_round_trip_unlocks_deep() {
    let kernel = MetaKernel::default();
    let handshake = HandshakeInterpreter::new().unwrap();

    let mut deep = turn(0, false);
    deep.depth_requested = Depth::Deep;
    let asked = kernel.apply(&session(), &deep, &MetaKernelState::new());
    assert!(asked.prompt_handshake.is_some());
    assert_eq!(asked.power_envelope.max_depth, Depth::Medium);

    let (outcome, state) = handshake.process_handshake_response("yes", &asked.new_state);
    assert_eq!(outcome, HandshakeOutcome::Accepted);

    let mut next = turn(1, false);
    next.depth_requested = Depth::Deep;
    let unlocked = kernel.apply(&session(), &next, &state);
    assert_eq!(unlocked.power_envelope.max_depth, Depth::Deep);
    assert!(unlocked.prompt_handshake.is_none());

    // Later turns keep the unlocked ceiling.
    let later = kernel.apply(&session(), &turn(2, false), &unlocked.new_state);
    assert_eq!(later.power_envelope.max_depth, Depth::Deep);
}

#[test]
fn ended_session_is_terminal() {
    let kernel = MetaKernel::default();
    let state = kernel
        .apply(&session(), &turn(0, false), &MetaKernelState::new())
        .new_state;
    let closed = end_session(&state);
    assert_eq!(closed.phase, KernelPhase::Closed);
    let r = kernel.apply(&session(), &turn(1, false), &closed);
    assert_eq!(r.new_state.phase, KernelPhase::Closed);
    assert_eq!(r.power_envelope.max_depth, Depth::Surface);
}
