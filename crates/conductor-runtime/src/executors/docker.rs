use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{GlobalConfig, NodeDefinition, NodeError, NodeInput, NodeOutput};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::registry::CallContext;

use super::Executor;

/// Runs a node inside a container via `docker run --rm -i`.
///
/// The invocation's `NodeInput` is written to the container's stdin as JSON
/// and stdin is closed; stdout is read to EOF and normalised as the node's
/// output. Docker nodes never receive the shared state. The child is killed
/// when the invocation future is dropped, which is how timeouts terminate
/// the container.
pub struct DockerExecutor {
    config: Arc<GlobalConfig>,
}

impl DockerExecutor {
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        input: NodeInput,
        ctx: CallContext,
    ) -> Result<NodeOutput, NodeError> {
        let image = self.config.resolve_image(&node.target);

        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--rm").arg("-i");
        for (key, value) in &ctx.env {
            cmd.arg("--env").arg(format!("{key}={value}"));
        }
        if let Some(workdir) = &node.workdir {
            cmd.arg("-w").arg(workdir);
        }
        cmd.arg(&image);
        cmd.args(&node.command);
        cmd.args(&node.args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(node = %node.id, %image, "starting container");
        let mut child = cmd
            .spawn()
            .map_err(|err| NodeError::ContainerSpawn(err.to_string()))?;

        let payload = serde_json::to_vec(&input)
            .map_err(|err| NodeError::ContainerSpawn(format!("failed to encode input: {err}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Closing stdin signals the handler to produce its output.
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            tracing::warn!(node = %node.id, exit_code, "container exited with failure");
            let mut out = NodeOutput::with_status("error", Value::Null);
            out.insert_metadata("stdout", json!(stdout));
            out.insert_metadata("stderr", json!(stderr));
            out.insert_metadata("exit_code", json!(exit_code));
            return Ok(out);
        }

        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(NodeOutput::success(Value::Null));
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Ok(NodeOutput::from_value(value)),
            Err(_) => {
                let mut out = NodeOutput::with_status("error", Value::Null);
                out.insert_metadata("stdout", json!(stdout));
                out.insert_metadata("stderr", json!(stderr));
                out.insert_metadata("error", json!("invalid json"));
                Ok(out)
            }
        }
    }
}
