use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{NodeError, NodeInput, SharedState};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Context handed to a callable for one invocation.
///
/// The environment overlay (global env merged with the node's env) travels
/// here instead of being written into the process environment, so
/// overlapping inline nodes can never observe each other's overlay. The
/// cancellation token fires when the invocation times out; long-running
/// callables may observe it cooperatively.
#[derive(Clone)]
pub struct CallContext {
    pub state: SharedState,
    pub env: BTreeMap<String, String>,
    pub cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(state: SharedState, env: BTreeMap<String, String>) -> Self {
        Self {
            state,
            env,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}

/// Executable unit behind an inline or process node.
///
/// The returned value is normalised by the executor, so callables may return
/// a full output object, a partial one, or any bare JSON value.
#[async_trait]
pub trait NodeCallable: Send + Sync {
    async fn call(&self, input: NodeInput, ctx: CallContext) -> Result<Value, NodeError>;
}

struct FnCallable<F> {
    f: F,
}

#[async_trait]
impl<F> NodeCallable for FnCallable<F>
where
    F: Fn(NodeInput, CallContext) -> Result<Value, NodeError> + Send + Sync,
{
    async fn call(&self, input: NodeInput, ctx: CallContext) -> Result<Value, NodeError> {
        (self.f)(input, ctx)
    }
}

struct AsyncFnCallable<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> NodeCallable for AsyncFnCallable<F>
where
    F: Fn(NodeInput, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    async fn call(&self, input: NodeInput, ctx: CallContext) -> Result<Value, NodeError> {
        (self.f)(input, ctx).await
    }
}

/// Registry mapping a node's `target` string to its callable.
///
/// Flows register callables at start-up; the engine resolves every
/// inline/process target here before any node executes.
#[derive(Default)]
pub struct CallableRegistry {
    callables: BTreeMap<String, Arc<dyn NodeCallable>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable under `target`. Later registrations replace
    /// earlier ones.
    pub fn register(&mut self, target: impl Into<String>, callable: Arc<dyn NodeCallable>) {
        let target = target.into();
        tracing::debug!(target_key = %target, "registering callable");
        self.callables.insert(target, callable);
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(&mut self, target: impl Into<String>, f: F)
    where
        F: Fn(NodeInput, CallContext) -> Result<Value, NodeError> + Send + Sync + 'static,
    {
        self.register(target, Arc::new(FnCallable { f }));
    }

    /// Register an async closure.
    pub fn register_async<F, Fut>(&mut self, target: impl Into<String>, f: F)
    where
        F: Fn(NodeInput, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        self.register(target, Arc::new(AsyncFnCallable { f }));
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn NodeCallable>> {
        self.callables.get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.callables.contains_key(target)
    }

    pub fn targets(&self) -> Vec<String> {
        self.callables.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> CallContext {
        CallContext::new(SharedState::new(), BTreeMap::new())
    }

    #[tokio::test]
    async fn sync_and_async_registration() {
        let mut registry = CallableRegistry::new();
        registry.register_fn("double", |input, _ctx| {
            let n = input.payload.as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });
        registry.register_async("triple", |input, _ctx| async move {
            let n = input.payload.as_i64().unwrap_or(0);
            Ok(json!(n * 3))
        });

        let double = registry.get("double").expect("registered");
        let result = double.call(NodeInput::seed(json!(21)), context()).await;
        assert_eq!(result.unwrap(), json!(42));

        let triple = registry.get("triple").expect("registered");
        let result = triple.call(NodeInput::seed(json!(3)), context()).await;
        assert_eq!(result.unwrap(), json!(9));
    }

    #[test]
    fn lookup_and_listing() {
        let mut registry = CallableRegistry::new();
        registry.register_fn("noop", |input, _ctx| Ok(input.payload));
        assert!(registry.contains("noop"));
        assert!(!registry.contains("missing"));
        assert_eq!(registry.targets(), vec!["noop".to_string()]);
    }
}
