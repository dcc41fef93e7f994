//! Chain verification.

use covenant_types::ContentHash;
use serde::{Deserialize, Serialize};

use crate::entry::AuditEntry;

/// Result of verifying a session's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    /// Entries before the first invalid one
    pub verified_entries: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

/// Whether an entry's stored hash matches its contents.
pub fn verify_entry(entry: &AuditEntry) -> bool {
    entry
        .recompute_hash()
        .map(|h| h == entry.entry_hash)
        .unwrap_or(false)
}

/// Verify a chain end to end.
///
/// Entry 0 must link to `genesis`; every later entry must link to its
/// predecessor's hash. The first broken entry invalidates everything after
/// it, so verification stops there.
pub fn verify_chain(entries: &[AuditEntry], genesis: &ContentHash) -> ChainVerification {
    let mut result = ChainVerification {
        valid: true,
        total_entries: entries.len(),
        verified_entries: 0,
        first_invalid_index: None,
        error_message: None,
    };

    let mut expected_prev = genesis;
    for (i, entry) in entries.iter().enumerate() {
        if &entry.previous_hash != expected_prev {
            result.valid = false;
            result.first_invalid_index = Some(i);
            result.error_message = Some(format!(
                "entry {i} has broken chain link (expected prev: {expected_prev}, got: {})",
                entry.previous_hash
            ));
            return result;
        }
        if !verify_entry(entry) {
            result.valid = false;
            result.first_invalid_index = Some(i);
            result.error_message = Some(format!("entry {i} has invalid hash"));
            return result;
        }
        result.verified_entries = i + 1;
        expected_prev = &entry.entry_hash;
    }

    result
}
