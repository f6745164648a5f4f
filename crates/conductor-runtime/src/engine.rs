use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conductor_core::{
    ConductorError, ConfigError, ExecutorKind, FlowDefinition, GlobalConfig, NodeDefinition,
    NodeError, NodeId, NodeInput, NodeOutput, SharedState, TraceEntry, TraceRecorder,
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::executors::{DockerExecutor, Executor, InlineExecutor, ProcessExecutor};
use crate::pool::WorkerPool;
use crate::registry::{CallContext, CallableRegistry};
use crate::remote::RemoteLogSink;

/// Everything a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Output of every node whose status resolved to no successors, keyed by
    /// node id. Revisited terminals keep their last output.
    pub terminal_outputs: BTreeMap<NodeId, NodeOutput>,
    /// All invocations in completion order.
    pub trace: Vec<TraceEntry>,
    /// Snapshot of the shared state at run end.
    pub shared_state: Map<String, Value>,
}

struct Invocation {
    node_id: NodeId,
    input: NodeInput,
}

struct Completed {
    node_id: NodeId,
    sequence: u64,
    input: NodeInput,
    output: NodeOutput,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    error: Option<String>,
}

/// Coordinates the execution of nodes according to the flow definition.
///
/// The engine drives a cooperative dispatcher: a pending queue of scheduled
/// invocations and an in-flight set capped at `max_concurrency`. Each
/// completion records a trace entry, resolves successors from the finished
/// status, and either schedules them or records a terminal output. The
/// engine never aborts on a node failure; only configuration errors raised
/// before any node executes are fatal.
pub struct FlowEngine {
    flow: Arc<FlowDefinition>,
    config: Arc<GlobalConfig>,
    registry: Arc<CallableRegistry>,
    state: SharedState,
    remote: Option<RemoteLogSink>,
}

impl FlowEngine {
    pub fn new(flow: FlowDefinition, config: GlobalConfig, registry: CallableRegistry) -> Self {
        let state = SharedState::with_initial(config.shared_state.clone());
        Self {
            flow: Arc::new(flow),
            config: Arc::new(config),
            registry: Arc::new(registry),
            state,
            remote: None,
        }
    }

    /// Reuse an existing state handle so shared state survives across
    /// consecutive runs in the same process.
    pub fn with_shared_state(mut self, state: SharedState) -> Self {
        self.state = state;
        self
    }

    /// Ship a record per completed invocation to the remote target.
    pub fn with_remote_sink(mut self, sink: RemoteLogSink) -> Self {
        self.remote = Some(sink);
        self
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    /// Check everything that must hold before any node executes: flow
    /// structure and a registered callable behind every inline/process
    /// target.
    fn preflight(&self) -> Result<(), ConfigError> {
        self.flow.validate()?;
        for node in self.flow.nodes.values() {
            match node.executor {
                ExecutorKind::Inline | ExecutorKind::Process => {
                    if !self.registry.contains(&node.target) {
                        return Err(ConfigError::UnknownCallable {
                            node: node.id.clone(),
                            target: node.target.clone(),
                        });
                    }
                }
                ExecutorKind::Docker => {}
            }
        }
        Ok(())
    }

    /// Execute the flow with `seed` as the payload of every start node.
    pub async fn run(&self, seed: Value) -> Result<RunResult, ConductorError> {
        self.preflight()?;

        let run_id = Uuid::new_v4();
        let max_concurrency = self.config.max_concurrency.max(1);
        tracing::info!(
            %run_id,
            flow = %self.flow.name,
            max_concurrency,
            "starting flow run"
        );

        let inline: Arc<InlineExecutor> = Arc::new(InlineExecutor::new(self.registry.clone()));
        let docker: Arc<DockerExecutor> = Arc::new(DockerExecutor::new(self.config.clone()));
        let process: Option<Arc<ProcessExecutor>> = self
            .flow
            .nodes
            .values()
            .any(|node| node.executor == ExecutorKind::Process)
            .then(|| {
                let pool = WorkerPool::new(self.config.process_pool_size, self.registry.clone());
                Arc::new(ProcessExecutor::new(Arc::new(pool)))
            });

        let mut pending: VecDeque<Invocation> = self
            .flow
            .start
            .iter()
            .map(|node_id| Invocation {
                node_id: node_id.clone(),
                input: NodeInput::seed(seed.clone()),
            })
            .collect();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Completed>> =
            FuturesUnordered::new();
        let mut sequence: u64 = 0;
        let mut terminal_outputs: BTreeMap<NodeId, NodeOutput> = BTreeMap::new();
        let trace = TraceRecorder::new();

        loop {
            while in_flight.len() < max_concurrency {
                let Some(invocation) = pending.pop_front() else {
                    break;
                };
                let node = self
                    .flow
                    .get_node(&invocation.node_id)
                    .cloned()
                    .ok_or_else(|| {
                        ConfigError::InvalidFlow(format!(
                            "scheduled unknown node '{}'",
                            invocation.node_id
                        ))
                    })?;
                let executor: Arc<dyn Executor> = match node.executor {
                    ExecutorKind::Inline => inline.clone(),
                    ExecutorKind::Docker => docker.clone(),
                    ExecutorKind::Process => process
                        .clone()
                        .ok_or_else(|| NodeError::Worker("worker pool not running".into()))?,
                };
                in_flight.push(self.spawn_invocation(invocation, node, sequence, executor));
                sequence += 1;
            }

            let Some(completed) = in_flight.next().await else {
                break;
            };

            let scheduled = self
                .flow
                .next_nodes(&completed.node_id, &completed.output.status);
            let error = completed.error.clone().or_else(|| {
                matches!(completed.output.status.as_str(), "error" | "timeout")
                    .then(|| {
                        completed
                            .output
                            .metadata
                            .get("error")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .flatten()
            });

            if let Some(message) = &error {
                tracing::warn!(
                    node = %completed.node_id,
                    status = %completed.output.status,
                    error = %message,
                    "node finished with failure status"
                );
            } else {
                tracing::info!(
                    node = %completed.node_id,
                    status = %completed.output.status,
                    duration_ms = completed.duration_ms,
                    "node completed"
                );
            }
            if let Some(sink) = &self.remote {
                let level = match completed.output.status.as_str() {
                    "error" | "timeout" => "error",
                    _ => "info",
                };
                let mut context = Map::new();
                context.insert("run_id".into(), json!(run_id.to_string()));
                context.insert("flow".into(), json!(self.flow.name));
                context.insert("node_id".into(), json!(completed.node_id));
                context.insert("status".into(), json!(completed.output.status));
                context.insert("sequence".into(), json!(completed.sequence));
                context.insert("duration_ms".into(), json!(completed.duration_ms));
                sink.emit(
                    level,
                    format!(
                        "node '{}' finished with status '{}'",
                        completed.node_id, completed.output.status
                    ),
                    context,
                );
            }

            trace.append(TraceEntry {
                node_id: completed.node_id.clone(),
                sequence: completed.sequence,
                started_at: completed.started_at,
                finished_at: completed.finished_at,
                duration_ms: completed.duration_ms,
                input: completed.input,
                status: completed.output.status.clone(),
                scheduled: scheduled.clone(),
                error,
                output: completed.output.clone(),
            });

            if scheduled.is_empty() {
                terminal_outputs.insert(completed.node_id, completed.output);
            } else {
                // Fan-out: every listed successor becomes an independent
                // invocation, once per listing, in declaration order.
                for successor in scheduled {
                    pending.push_back(Invocation {
                        node_id: successor,
                        input: NodeInput::from_output(&completed.output, &completed.node_id),
                    });
                }
            }

            if pending.is_empty() && in_flight.is_empty() {
                break;
            }
        }

        tracing::info!(
            %run_id,
            invocations = trace.len(),
            terminals = terminal_outputs.len(),
            "flow run finished"
        );

        Ok(RunResult {
            terminal_outputs,
            trace: trace.into_entries(),
            shared_state: self.state.snapshot(),
        })
    }

    fn spawn_invocation(
        &self,
        invocation: Invocation,
        node: NodeDefinition,
        sequence: u64,
        executor: Arc<dyn Executor>,
    ) -> BoxFuture<'static, Completed> {
        let mut env = self.config.env.clone();
        env.extend(node.env.clone());
        let ctx = CallContext::new(self.state.clone(), env);
        let cancellation = ctx.cancellation.clone();
        let timeout = node.timeout.or(self.config.default_timeout);

        let node_id = invocation.node_id.clone();
        let input = invocation.input;
        let input_for_trace = input.clone();

        tracing::debug!(node = %node_id, sequence, executor = %node.executor, "dispatching node");

        let handle = tokio::spawn(async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            let work = executor.execute(&node, input, ctx);
            let result = match timeout {
                Some(seconds) => {
                    let deadline = Duration::from_secs_f64(seconds.max(0.0));
                    match tokio::time::timeout(deadline, work).await {
                        Ok(result) => result,
                        Err(_) => {
                            cancellation.cancel();
                            Err(NodeError::Timeout { seconds })
                        }
                    }
                }
                None => work.await,
            };
            let finished_at = Utc::now();
            let duration_ms = clock.elapsed().as_millis() as u64;
            let (output, error) = match result {
                Ok(output) => (output, None),
                Err(NodeError::Timeout { seconds }) => {
                    let message = format!("timeout after {seconds}s");
                    (NodeOutput::timeout(seconds), Some(message))
                }
                Err(err) => {
                    let message = err.to_string();
                    (NodeOutput::error(message.clone()), Some(message))
                }
            };
            (started_at, finished_at, duration_ms, output, error)
        });

        Box::pin(async move {
            match handle.await {
                Ok((started_at, finished_at, duration_ms, output, error)) => Completed {
                    node_id,
                    sequence,
                    input: input_for_trace,
                    output,
                    started_at,
                    finished_at,
                    duration_ms,
                    error,
                },
                Err(err) => {
                    // The invocation task itself died (a panicking callable).
                    let message = format!("invocation failed: {err}");
                    let now = Utc::now();
                    Completed {
                        node_id,
                        sequence,
                        input: input_for_trace,
                        output: NodeOutput::error(message.clone()),
                        started_at: now,
                        finished_at: now,
                        duration_ms: 0,
                        error: Some(message),
                    }
                }
            }
        })
    }
}
