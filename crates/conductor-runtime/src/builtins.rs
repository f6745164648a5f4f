use std::time::Duration;

use conductor_core::NodeError;
use serde_json::{json, Value};

use crate::registry::CallableRegistry;

/// Register the stock callables shipped with the runtime.
///
/// Flows that only need plumbing (pass a payload through, pace a branch,
/// count visits, branch on parity) can reference these without registering
/// anything of their own.
pub fn register_builtins(registry: &mut CallableRegistry) {
    registry.register_fn("echo", |input, _ctx| Ok(input.payload));

    registry.register_async("delay", |input, ctx| async move {
        let millis = ctx
            .env_var("DELAY_MS")
            .and_then(|raw| raw.parse::<u64>().ok())
            .or_else(|| input.payload.get("delay_ms").and_then(Value::as_u64))
            .unwrap_or(0);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(input.payload),
        }
    });

    registry.register_fn("counter", |input, ctx| {
        let key = ctx.env_var("COUNTER_KEY").unwrap_or("counter").to_string();
        let count = ctx.state.update(key, |current| {
            json!(current.and_then(Value::as_i64).unwrap_or(0) + 1)
        });
        Ok(json!({"data": input.payload, "metadata": {"count": count}}))
    });

    registry.register_fn("parity", |input, _ctx| {
        let number = input.payload.get("number").and_then(Value::as_i64).unwrap_or(0);
        let status = if number % 2 == 0 { "even" } else { "odd" };
        Ok(json!({"status": status, "data": input.payload}))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CallContext;
    use conductor_core::{NodeInput, SharedState};
    use std::collections::BTreeMap;

    fn context() -> CallContext {
        CallContext::new(SharedState::new(), BTreeMap::new())
    }

    #[tokio::test]
    async fn echo_passes_the_payload_through() {
        let mut registry = CallableRegistry::new();
        register_builtins(&mut registry);
        let echo = registry.get("echo").unwrap();
        let result = echo
            .call(NodeInput::seed(json!({"keep": true})), context())
            .await
            .unwrap();
        assert_eq!(result, json!({"keep": true}));
    }

    #[tokio::test]
    async fn parity_reports_even_and_odd() {
        let mut registry = CallableRegistry::new();
        register_builtins(&mut registry);
        let parity = registry.get("parity").unwrap();

        let even = parity
            .call(NodeInput::seed(json!({"number": 6})), context())
            .await
            .unwrap();
        assert_eq!(even["status"], json!("even"));

        let odd = parity
            .call(NodeInput::seed(json!({"number": 7})), context())
            .await
            .unwrap();
        assert_eq!(odd["status"], json!("odd"));
    }

    #[tokio::test]
    async fn counter_increments_shared_state() {
        let mut registry = CallableRegistry::new();
        register_builtins(&mut registry);
        let counter = registry.get("counter").unwrap();
        let state = SharedState::new();

        for _ in 0..3 {
            let ctx = CallContext::new(state.clone(), BTreeMap::new());
            counter
                .call(NodeInput::seed(Value::Null), ctx)
                .await
                .unwrap();
        }
        assert_eq!(state.get("counter", Value::Null), json!(3));
    }

    #[tokio::test]
    async fn delay_honours_env_override() {
        let mut registry = CallableRegistry::new();
        register_builtins(&mut registry);
        let delay = registry.get("delay").unwrap();
        let env = [("DELAY_MS".to_string(), "10".to_string())]
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        let ctx = CallContext::new(SharedState::new(), env);

        let started = std::time::Instant::now();
        let result = delay
            .call(NodeInput::seed(json!({"x": 1})), ctx)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(result, json!({"x": 1}));
    }
}
