use thiserror::Error;

/// Errors raised while handling shared pipeline types.
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value out of range: {field} = {value}")]
    OutOfRange { field: &'static str, value: f64 },
}
