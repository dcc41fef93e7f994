//! Deep-mode handshake.
//!
//! While a handshake is pending, the user's next message is read as the
//! answer. In every other state the text is ignored here and the state is
//! returned unchanged.

use covenant_types::{Depth, KernelPhase, MetaKernelState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GovernanceError;

const ACCEPT_PATTERN: &str =
    r"(?i)^\s*(yes|yeah|yep|ok|okay|sure|ready|please do|let'?s go( deeper)?|go deeper|i'?m ready)\b";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeOutcome {
    /// Deep mode unlocked for the rest of the session
    Accepted,
    /// Pending handshake cleared; ceiling unchanged
    Declined,
    /// No handshake was pending
    Ignored,
}

#[derive(Clone, Debug)]
pub struct HandshakeInterpreter {
    accept: Regex,
}

impl HandshakeInterpreter {
    pub fn new() -> Result<Self, GovernanceError> {
        Ok(Self {
            accept: Regex::new(ACCEPT_PATTERN)?,
        })
    }

    /// Consume a handshake answer.
    pub fn process_handshake_response(
        &self,
        text: &str,
        state: &MetaKernelState,
    ) -> (HandshakeOutcome, MetaKernelState) {
        if !state.handshake_pending || state.is_closed() {
            return (HandshakeOutcome::Ignored, state.clone());
        }
        let mut next = state.clone();
        next.handshake_pending = false;
        next.phase = KernelPhase::Active;

        let curly_folded = text.replace('\u{2019}', "'");
        if self.accept.is_match(&curly_folded) {
            next.deep_mode_active = true;
            next.knobs.max_depth_allowed = Depth::Deep;
            next.knobs.deep_mode_handshake_required = false;
            info!("Deep mode handshake accepted");
            (HandshakeOutcome::Accepted, next)
        } else {
            info!("Deep mode handshake declined");
            (HandshakeOutcome::Declined, next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> MetaKernelState {
        let mut state = MetaKernelState::new();
        state.phase = KernelPhase::HandshakePending;
        state.handshake_pending = true;
        state
    }

    #[test]
    fn accepts_affirmative_answers() {
        let hs = HandshakeInterpreter::new().unwrap();
        for answer in ["yes", "Yeah, let's do it", "  ok", "I\u{2019}m ready", "go deeper please"] {
            let (outcome, next) = hs.process_handshake_response(answer, &pending());
            assert_eq!(outcome, HandshakeOutcome::Accepted, "{answer}");
            assert!(next.deep_mode_active);
            assert_eq!(next.knobs.max_depth_allowed, Depth::Deep);
            assert!(!next.handshake_pending);
            assert_eq!(next.phase, KernelPhase::Active);
        }
    }

    #[test]
    fn anything_else_declines() {
        let hs = HandshakeInterpreter::new().unwrap();
        let (outcome, next) = hs.process_handshake_response("not now, maybe later", &pending());
        assert_eq!(outcome, HandshakeOutcome::Declined);
        assert!(!next.deep_mode_active);
        assert!(!next.handshake_pending);
        assert_eq!(next.knobs.max_depth_allowed, Depth::Medium);
    }

    #[test]
    fn ignored_without_pending_handshake() {
        let hs = HandshakeInterpreter::new().unwrap();
        let state = MetaKernelState::new();
        let (outcome, next) = hs.process_handshake_response("yes", &state);
        assert_eq!(outcome, HandshakeOutcome::Ignored);
        assert_eq!(next, state);
    }
}
