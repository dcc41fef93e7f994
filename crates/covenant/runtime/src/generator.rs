//! The external generator seam.

use std::time::Duration;

use async_trait::async_trait;
use covenant_types::{ExecutionContext, GeneratedOutput};
use thiserror::Error;
use tracing::warn;

/// Why a generation attempt produced nothing usable.
///
/// These never reach the caller; the turn treats them as a failed attempt
/// and moves down the fallback ladder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0} ms")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider returned no text")]
    Empty,
}

/// Produces response text under an execution context.
///
/// The generator sees the user's message and the sealed constraints, never
/// the field state behind them.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        context: &ExecutionContext,
        message: &str,
    ) -> Result<GeneratedOutput, GenerationError>;
}

/// Call the generator under the context's latency limit.
pub async fn generate_within(
    generator: &dyn Generator,
    context: &ExecutionContext,
    message: &str,
) -> Result<GeneratedOutput, GenerationError> {
    let limit = context.resources.max_latency_ms;
    let output = tokio::time::timeout(
        Duration::from_millis(limit),
        generator.generate(context, message),
    )
    .await
    .map_err(|_| {
        warn!(context_id = %context.context_id, limit_ms = limit, "Generation timed out");
        GenerationError::Timeout(limit)
    })??;
    if output.text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(output)
}
