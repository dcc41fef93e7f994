use covenant_types::{ContentHash, TypesError};
use thiserror::Error;

/// Errors raised by audit sealing and sinks.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit chain mismatch for session {session_id}: head is {expected}, entry links to {found}")]
    ChainMismatch {
        session_id: String,
        expected: ContentHash,
        found: ContentHash,
    },

    #[error("entry {turn_number} of session {session_id} does not match its own hash")]
    InvalidEntryHash { session_id: String, turn_number: u32 },

    #[error("corrupt audit log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("hashing error: {0}")]
    Hash(#[from] TypesError),
}

pub type Result<T> = std::result::Result<T, AuditError>;
