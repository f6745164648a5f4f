mod docker;
mod inline;
mod process;

use async_trait::async_trait;
use conductor_core::{NodeDefinition, NodeError, NodeInput, NodeOutput};

use crate::registry::CallContext;

pub use docker::DockerExecutor;
pub use inline::InlineExecutor;
pub use process::ProcessExecutor;

/// Strategy performing a node's work.
///
/// Implementations return the normalised output; the engine supplies the
/// merged environment through the context and applies the per-invocation
/// timeout around the whole call.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        node: &NodeDefinition,
        input: NodeInput,
        ctx: CallContext,
    ) -> Result<NodeOutput, NodeError>;
}
