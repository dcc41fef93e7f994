use covenant_audit::AuditError;
use thiserror::Error;

/// Errors raised by the verifier itself, as opposed to violations it finds.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("invalid check pattern {id}: {source}")]
    InvalidPattern {
        id: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("audit sealing failed: {0}")]
    Audit(#[from] AuditError),
}
