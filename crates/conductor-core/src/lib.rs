//! Core data model for conductor flows
//!
//! This crate provides the fundamental types that all other components
//! depend on: the node I/O envelope, flow definitions, global configuration,
//! the shared state store, and the execution trace. It has no runtime
//! dependencies.

mod config;
mod envelope;
mod error;
mod flow;
mod state;
mod trace;

pub use config::{
    load_flow, load_global, parse_document, GlobalConfig, LocationKind, RemoteLoggingConfig,
    RepositoryLocation,
};
pub use envelope::{NodeInput, NodeOutput};
pub use error::{ConductorError, ConfigError, NodeError, Result};
pub use flow::{ExecutorKind, FlowDefinition, NodeDefinition, NodeId};
pub use state::SharedState;
pub use trace::{preview, TraceEntry, TraceRecorder, PREVIEW_MAX_LEN};
