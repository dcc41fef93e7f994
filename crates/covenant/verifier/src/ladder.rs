//! The fallback ladder as a finite-state machine.
//!
//! States are [`FallbackLevel`]s. A failed attempt either retries the same
//! level, while its cap allows, or moves strictly down the ladder. Nothing
//! ever moves back up within a turn.

use covenant_types::{FallbackLevel, FallbackSpec, RuntimeClass, Severity};
use serde::{Deserialize, Serialize};

/// Why an attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// Check violations; carries the most severe one
    Severity(Severity),
    /// Context or chain integrity; the turn stops
    Integrity,
}

/// Transition after a failed attempt at `level`.
///
/// `attempts_at_level` counts attempts already made at `level`, including
/// the one that just failed. A critical failure never retries the same
/// level. Levels whose cap is zero are skipped.
pub fn next(
    level: FallbackLevel,
    failure: Failure,
    attempts_at_level: u32,
    spec: &FallbackSpec,
) -> FallbackLevel {
    if level.is_terminal() || failure == Failure::Integrity {
        return FallbackLevel::Stop;
    }
    let retryable = failure != Failure::Severity(Severity::Critical);
    if retryable && level != FallbackLevel::Initial && attempts_at_level < spec.cap(level) {
        return level;
    }
    descend(level, spec)
}

/// First level strictly below `level` with a nonzero cap, or `Stop`.
pub fn descend(level: FallbackLevel, spec: &FallbackSpec) -> FallbackLevel {
    let mut candidate = level.next();
    while !candidate.is_terminal() && spec.cap(candidate) == 0 {
        candidate = candidate.next();
    }
    candidate
}

/// Where a turn starts.
///
/// Templated contexts skip generation and begin at the first template
/// level. Closed sessions only ever get a presence statement.
pub fn starting_level(class: RuntimeClass, closed: bool, spec: &FallbackSpec) -> FallbackLevel {
    if closed {
        if spec.cap(FallbackLevel::Presence) > 0 {
            FallbackLevel::Presence
        } else {
            FallbackLevel::Stop
        }
    } else if class.templated_only() {
        descend(FallbackLevel::Regenerate, spec)
    } else {
        FallbackLevel::Initial
    }
}

/// Position on the ladder during one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderState {
    pub level: FallbackLevel,
    pub attempts_at_level: u32,
    pub total_attempts: u32,
    pub starting_level: FallbackLevel,
}

impl LadderState {
    pub fn start(level: FallbackLevel) -> Self {
        Self {
            level,
            attempts_at_level: 0,
            total_attempts: 0,
            starting_level: level,
        }
    }

    /// Count an attempt at the current level.
    pub fn record_attempt(&mut self) {
        self.attempts_at_level += 1;
        self.total_attempts += 1;
    }

    /// Apply a failure; returns the new level.
    pub fn fail(&mut self, failure: Failure, spec: &FallbackSpec) -> FallbackLevel {
        let target = next(self.level, failure, self.attempts_at_level, spec);
        if target != self.level {
            self.level = target;
            self.attempts_at_level = 0;
        }
        target
    }

    /// Move to `level` if it is below the current one; never moves up.
    pub fn advance_to(&mut self, level: FallbackLevel) {
        if level > self.level {
            self.level = level;
            self.attempts_at_level = 0;
        }
    }
}
