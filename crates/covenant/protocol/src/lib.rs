//! # covenant-protocol
//!
//! Turns the governed field into a concrete, bounded protocol and then
//! into a sealed execution contract for the generator.
//!
//! - [`select`]: pure `(field, governor result, knobs) -> ProtocolSelection`
//! - [`ContextCompiler`]: freezes the selection into an
//!   [`ExecutionContext`](covenant_types::ExecutionContext), runs the
//!   blindness check and seals it with its hash

pub mod compiler;
pub mod error;
pub mod selector;

pub use compiler::{
    check_blindness, runtime_class, CompiledContext, CompilerConfig, ContextCompiler,
};
pub use error::CompileError;
pub use selector::{active_domains, requested_depth, select, ACTIVE_SALIENCE};
