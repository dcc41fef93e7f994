//! # covenant-runtime
//!
//! Wires the covenant crates into a per-turn pipeline.
//!
//! - [`pipeline`]: [`Pipeline::process_turn`] runs one user message end to
//!   end and commits one audit entry per turn.
//! - [`generator`] and [`gate`]: the collaborator seams. The generator
//!   produces text under a sealed context; the optional gate can raise the
//!   local signal but never lower it.
//! - [`session`] and [`locks`]: session persistence and per-session
//!   serialisation.
//! - [`config`] and [`telemetry`]: layered configuration and tracing setup.
//!
//! ```no_run
//! use std::sync::Arc;
//! use covenant_runtime::{CovenantConfig, Generator, Pipeline};
//!
//! # async fn run(generator: Arc<dyn Generator>) -> covenant_runtime::Result<()> {
//! let config = CovenantConfig::load(Some("covenant.toml"))?;
//! covenant_runtime::init_tracing(&config.logging)?;
//! let pipeline = Pipeline::from_config(&config, generator).await?;
//! let outcome = pipeline.process_turn("session-1", "I keep going back and forth.").await?;
//! println!("{}", outcome.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod generator;
pub mod locks;
pub mod pipeline;
pub mod session;
pub mod telemetry;

pub use config::{
    AuditBackend, AuditConfig, CovenantConfig, GateConfig, LoggingConfig, RuntimeConfig,
};
pub use error::{Result, RuntimeError};
pub use gate::{
    resolve_signal, GateError, GateRequest, GateResponse, GateService, HttpGateClient,
    ResolvedSignal, SignalSource,
};
pub use generator::{generate_within, GenerationError, Generator};
pub use locks::SessionLocks;
pub use pipeline::{open_audit_sink, Pipeline, TurnOutcome};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use telemetry::init_tracing;
