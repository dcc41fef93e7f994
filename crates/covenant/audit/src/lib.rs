//! # covenant-audit
//!
//! Tamper-evident audit trail. Each turn produces one [`AuditRecord`],
//! sealed against the previous entry's hash into an [`AuditEntry`]. Chains
//! are anchored per session at [`genesis_hash`] and can be checked end to
//! end with [`verify_chain`].

pub mod entry;
pub mod error;
pub mod integrity;
pub mod sink;

pub use entry::{
    genesis_hash, ActionTaken, AuditEntry, AuditRecord, FieldSummary, SelectionSummary,
    VerificationRecord,
};
pub use error::{AuditError, Result};
pub use integrity::{verify_chain, verify_entry, ChainVerification};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};
