//! Optional remote boundary gate.
//!
//! The gate is consulted before the core pipeline. It never blocks a turn:
//! on timeout, transport failure or a malformed answer the local
//! classifier's signal is used instead, and the outcome records which
//! source decided.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_perception::{Classification, ReasonCode};
use covenant_types::{ContentHash, GateSignal};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Request body sent to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRequest {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub input_hash: ContentHash,
    pub input_text: String,
    pub marker_version: String,
    pub context_scope_id: String,
}

/// Gate answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResponse {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub signal: GateSignal,
    /// Always true on the wire; the gate never lets a turn through on its own
    pub halt: bool,
    pub marker_hash: String,
    pub reason_code: String,
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("gate timed out")]
    Timeout,

    #[error("gate returned status {0}")]
    Status(u16),

    #[error("gate protocol error: {0}")]
    Protocol(String),

    #[error("gate transport error: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait GateService: Send + Sync {
    async fn check(&self, request: &GateRequest) -> Result<GateResponse, GateError>;
}

/// HTTP client for a remote gate.
pub struct HttpGateClient {
    client: Client,
    endpoint: String,
}

impl HttpGateClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GateError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GateService for HttpGateClient {
    async fn check(&self, request: &GateRequest) -> Result<GateResponse, GateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GateError::Timeout
                } else {
                    GateError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Status(status.as_u16()));
        }

        let body: GateResponse = response
            .json()
            .await
            .map_err(|e| GateError::Protocol(e.to_string()))?;
        if body.request_id != request.request_id {
            return Err(GateError::Protocol(format!(
                "response for {} answered request {}",
                body.request_id, request.request_id
            )));
        }
        Ok(body)
    }
}

/// Which component decided the signal for the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Local classifier only; no gate configured
    Local,
    /// Gate answered
    Remote,
    /// Gate configured but unavailable; local classifier used
    LocalFallback,
}

/// The classification the turn proceeds with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSignal {
    pub classification: Classification,
    pub source: SignalSource,
}

/// Lower is more severe; `NULL` is least severe.
fn severity_rank(signal: GateSignal) -> u8 {
    match signal {
        GateSignal::D1 => 0,
        GateSignal::D2 => 1,
        GateSignal::D3 => 2,
        GateSignal::D4 => 3,
        GateSignal::Null => 4,
    }
}

/// Combine the local classification with the gate, if any.
///
/// When the gate answers, the more severe of the two signals wins.
pub async fn resolve_signal(
    gate: Option<&dyn GateService>,
    request: &GateRequest,
    local: Classification,
) -> ResolvedSignal {
    let Some(gate) = gate else {
        return ResolvedSignal {
            classification: local,
            source: SignalSource::Local,
        };
    };

    match gate.check(request).await {
        Ok(response) => {
            debug!(
                request_id = %request.request_id,
                remote = ?response.signal,
                local = ?local.signal,
                reason_code = %response.reason_code,
                "Gate answered"
            );
            let mut classification = local;
            if severity_rank(response.signal) < severity_rank(classification.signal) {
                if let Some(domain) = response.signal.domain() {
                    classification.signal = response.signal;
                    classification.reason_code = ReasonCode::for_domain(domain);
                    classification
                        .evidence
                        .push(format!("gate.{}", response.reason_code.to_lowercase()));
                }
            }
            ResolvedSignal {
                classification,
                source: SignalSource::Remote,
            }
        }
        Err(e) => {
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Gate unavailable, using local classifier"
            );
            ResolvedSignal {
                classification: local,
                source: SignalSource::LocalFallback,
            }
        }
    }
}
