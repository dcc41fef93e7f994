//! Windowed telemetry signals for the meta-kernel.

use std::collections::BTreeSet;

use covenant_types::{ComputedTelemetry, MetaKernelState, SessionTelemetry, TurnTelemetry};

/// Number of loop repetitions at which loop tendency saturates.
const LOOP_SATURATION: f64 = 4.0;

/// Decision markers per turn at which the agency contribution saturates.
const MARKER_SATURATION: f64 = 2.0;

/// The telemetry entries the windowed signals look at: at most `window`
/// of the most recent turns at or after the state's telemetry epoch.
pub fn window<'a>(state: &'a MetaKernelState, window: usize) -> Vec<&'a TurnTelemetry> {
    let eligible: Vec<&TurnTelemetry> = state
        .history
        .iter()
        .filter(|t| t.turn_index >= state.telemetry_epoch)
        .collect();
    let skip = eligible.len().saturating_sub(window);
    eligible.into_iter().skip(skip).collect()
}

/// Derive the computed signals from session and windowed turn telemetry.
pub fn compute(
    session: &SessionTelemetry,
    state: &MetaKernelState,
    window_size: usize,
) -> ComputedTelemetry {
    let turns = window(state, window_size);
    let n = turns.len();

    let depth_velocity = if n < 2 {
        0.0
    } else {
        let total: u32 = turns
            .windows(2)
            .map(|w| {
                (w[1].depth_requested.ordinal() as i32 - w[0].depth_requested.ordinal() as i32)
                    .unsigned_abs()
            })
            .sum();
        total as f64 / (n - 1) as f64
    };

    let distinct: BTreeSet<_> = turns
        .iter()
        .flat_map(|t| t.active_domains.iter().copied())
        .collect();
    let domain_spread = distinct.len() as f64 / covenant_types::HorizontalDomain::ALL.len() as f64;

    let continuity_pressure = if n < 2 {
        0.0
    } else {
        let continuing = turns
            .windows(2)
            .filter(|w| w[1].active_domains.iter().any(|d| w[0].active_domains.contains(d)))
            .count();
        continuing as f64 / (n - 1) as f64
    };

    let delegation_rate = if n == 0 {
        0.0
    } else {
        turns.iter().filter(|t| t.delegation_attempt).count() as f64 / n as f64
    };

    let loop_tendency = turns
        .last()
        .map(|t| (t.loop_count as f64 / LOOP_SATURATION).min(1.0))
        .unwrap_or(0.0);

    let marker_mean = if n == 0 {
        0.0
    } else {
        turns
            .iter()
            .map(|t| (t.decision_markers as f64 / MARKER_SATURATION).min(1.0))
            .sum::<f64>()
            / n as f64
    };
    let agency_signal = (0.5 + 0.5 * marker_mean - 0.5 * delegation_rate).clamp(0.0, 1.0);

    let started = state.session_started_at.unwrap_or(session.started_at);
    let elapsed = (session.now - started).num_seconds().max(0) as u64;

    ComputedTelemetry {
        depth_velocity,
        domain_spread,
        continuity_pressure,
        delegation_rate,
        loop_tendency,
        turns_remaining: session.turn_budget.saturating_sub(state.turns_elapsed),
        time_remaining_secs: session.time_budget_secs.saturating_sub(elapsed),
        agency_signal,
        window_len: n,
    }
}
