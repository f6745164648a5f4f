use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{NodeDefinition, NodeError, NodeInput, NodeOutput};

use crate::registry::{CallContext, CallableRegistry};

use super::Executor;

/// Runs a node's callable on the dispatcher's own runtime.
///
/// The target is resolved in the registry (presence is checked before the
/// run starts) and awaited in place; callables that need real parallelism
/// belong on the process executor instead.
pub struct InlineExecutor {
    registry: Arc<CallableRegistry>,
}

impl InlineExecutor {
    pub fn new(registry: Arc<CallableRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Executor for InlineExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        input: NodeInput,
        ctx: CallContext,
    ) -> Result<NodeOutput, NodeError> {
        let callable = self.registry.get(&node.target).ok_or_else(|| {
            NodeError::Callable(format!("no callable registered for '{}'", node.target))
        })?;
        let value = callable.call(input, ctx).await?;
        Ok(NodeOutput::from_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{ExecutorKind, SharedState};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn normalises_loose_return_values() {
        let mut registry = CallableRegistry::new();
        registry.register_fn("answer", |_input, _ctx| Ok(json!(42)));
        registry.register_fn("statused", |_input, _ctx| {
            Ok(json!({"status": "odd", "data": 7}))
        });
        let executor = InlineExecutor::new(Arc::new(registry));
        let node = NodeDefinition::new("n", ExecutorKind::Inline, "answer");
        let ctx = CallContext::new(SharedState::new(), BTreeMap::new());

        let out = executor
            .execute(&node, NodeInput::seed(json!(null)), ctx.clone())
            .await
            .unwrap();
        assert_eq!(out.status, "success");
        assert_eq!(out.data, json!(42));

        let node = NodeDefinition::new("n", ExecutorKind::Inline, "statused");
        let out = executor
            .execute(&node, NodeInput::seed(json!(null)), ctx)
            .await
            .unwrap();
        assert_eq!(out.status, "odd");
        assert_eq!(out.data, json!(7));
    }

    #[tokio::test]
    async fn env_overlay_arrives_through_the_context() {
        let mut registry = CallableRegistry::new();
        registry.register_fn("read-env", |_input, ctx| {
            Ok(json!(ctx.env_var("GREETING").unwrap_or("missing")))
        });
        let executor = InlineExecutor::new(Arc::new(registry));
        let node = NodeDefinition::new("n", ExecutorKind::Inline, "read-env");
        let env = [("GREETING".to_string(), "hello".to_string())]
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        let ctx = CallContext::new(SharedState::new(), env);

        let out = executor
            .execute(&node, NodeInput::seed(json!(null)), ctx)
            .await
            .unwrap();
        assert_eq!(out.data, json!("hello"));
    }
}
