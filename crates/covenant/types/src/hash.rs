use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TypesError;

/// Hex-encoded SHA-256 digest.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Hash raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentHash(hex::encode(hasher.finalize()))
}

/// Hash the canonical JSON form of a value.
///
/// Canonical here means serde's declaration-order output; every map that
/// flows through this function is a `BTreeMap` so key order is stable.
pub fn hash_json<T: Serialize>(value: &T) -> Result<ContentHash, TypesError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hash_bytes(&bytes))
}
