//! Flow execution runtime
//!
//! This crate provides the engine that runs conductor flows: the cooperative
//! dispatcher, the three executor strategies (inline, process pool, docker),
//! the callable registry, the remote log sink, and Mermaid rendering of
//! executed paths.

mod builtins;
mod diagram;
mod engine;
mod executors;
mod pool;
mod registry;
mod remote;

pub use builtins::register_builtins;
pub use diagram::{render_mermaid, summarize, summary_json, NodeStats};
pub use engine::{FlowEngine, RunResult};
pub use executors::{DockerExecutor, Executor, InlineExecutor, ProcessExecutor};
pub use pool::WorkerPool;
pub use registry::{CallContext, CallableRegistry, NodeCallable};
pub use remote::{RemoteLogRecord, RemoteLogSink};
