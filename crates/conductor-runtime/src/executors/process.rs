use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{NodeDefinition, NodeError, NodeInput, NodeOutput};

use crate::pool::WorkerPool;
use crate::registry::CallContext;

use super::Executor;

/// Dispatches a node's callable to the worker pool.
///
/// The submission future suspends until a worker replies, so the dispatcher
/// keeps driving other invocations while CPU-bound work runs on the pool
/// threads.
pub struct ProcessExecutor {
    pool: Arc<WorkerPool>,
}

impl ProcessExecutor {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        input: NodeInput,
        ctx: CallContext,
    ) -> Result<NodeOutput, NodeError> {
        let value = self.pool.submit(&node.target, input, ctx).await?;
        Ok(NodeOutput::from_value(value))
    }
}
