//! Configuration for the covenant runtime

use std::path::PathBuf;

use covenant_governance::MetaKernelConfig;
use covenant_perception::{ClassifierConfig, DetectorConfig};
use covenant_protocol::CompilerConfig;
use covenant_verifier::VerifierConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CovenantConfig {
    /// Boundary classifier thresholds and counter-signal damping
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub kernel: MetaKernelConfig,

    /// Execution-context limits
    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CovenantConfig {
    /// Layer defaults, an optional TOML file and `COVENANT_*` environment
    /// variables, in that order.
    ///
    /// Nested keys use a double underscore:
    /// `COVENANT_RUNTIME__TURN_BUDGET=20`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&CovenantConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COVENANT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

/// Session budgets and the optional remote gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Turns per session before the kernel winds down and closes
    pub turn_budget: u32,

    /// Wall-clock budget per session in seconds
    pub time_budget_secs: u64,

    pub gate: GateConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            turn_budget: 50,
            time_budget_secs: 3_600,
            gate: GateConfig::default(),
        }
    }
}

/// Remote gate. Disabled when `endpoint` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub endpoint: Option<String>,

    /// Fixed timeout for each gate call
    pub timeout_ms: u64,

    /// Sent with every request so responses can be matched to a lexicon
    pub marker_version: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 500,
            marker_version: "covenant-markers/1".to_string(),
        }
    }
}

/// Where audit entries go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,

    /// JSON Lines file, used by the `file` backend
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Memory,
            path: PathBuf::from("data/audit/covenant.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
