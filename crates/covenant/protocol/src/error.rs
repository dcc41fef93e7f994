use covenant_types::TypesError;
use thiserror::Error;

/// Errors raised while compiling an execution context.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("context exposes field internals at {path}: {detail}")]
    Leak { path: String, detail: String },

    #[error("allowed dimension {0} is not enabled by the meta-kernel")]
    DimensionNotEnabled(String),

    #[error("constraint {field} disagrees with the selection: {detail}")]
    Inconsistent { field: &'static str, detail: String },

    #[error("context hashing failed: {0}")]
    Hash(#[from] TypesError),

    #[error("context serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
