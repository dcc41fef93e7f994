use covenant_audit::AuditError;
use covenant_governance::GovernanceError;
use covenant_perception::PerceptionError;
use covenant_verifier::VerifierError;
use thiserror::Error;

/// Failures a caller of the runtime can see.
///
/// Bad input, generation failures, context compile failures and
/// constitutional violations never end up here; they are handled inside
/// the turn.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("tracing setup failed: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Perception(#[from] PerceptionError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Verifier(#[from] VerifierError),

    #[error("audit sink error: {0}")]
    Audit(#[from] AuditError),

    #[error("gate client error: {0}")]
    Gate(#[from] crate::gate::GateError),

    #[error("session store error for {session_id}: {reason}")]
    Store { session_id: String, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
