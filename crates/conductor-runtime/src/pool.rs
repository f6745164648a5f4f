use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use conductor_core::{NodeError, NodeInput};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::registry::{CallContext, CallableRegistry};

struct Job {
    target: String,
    input: NodeInput,
    ctx: CallContext,
    reply: oneshot::Sender<Result<Value, NodeError>>,
}

/// Fixed-size pool of dedicated worker threads for process-executor nodes.
///
/// Jobs are drained FIFO from a single shared channel, so queueing order is
/// dispatch order. Workers share the parent's callable registry and receive
/// the parent's shared-state handle through the job context; every state
/// access goes through the same mutex the inline executor uses, giving
/// concurrent pool nodes a serialised view. Each worker drives callables on
/// its own current-thread runtime, keeping the dispatcher free for I/O-bound
/// work. The pool lives for one engine run: dropping it closes the channel
/// and the workers exit after finishing their current job.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, registry: Arc<CallableRegistry>) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let registry = Arc::clone(&registry);
            std::thread::Builder::new()
                .name(format!("conductor-worker-{index}"))
                .spawn(move || worker_loop(index, receiver, registry))
                .expect("failed to spawn pool worker");
        }

        Self { sender, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit a job and await its reply.
    ///
    /// A timed-out caller drops the receiving half; the worker's eventual
    /// reply is discarded and the worker moves on to the next job.
    pub async fn submit(
        &self,
        target: &str,
        input: NodeInput,
        ctx: CallContext,
    ) -> Result<Value, NodeError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job {
                target: target.to_string(),
                input,
                ctx,
                reply,
            })
            .map_err(|_| NodeError::Worker("worker pool has shut down".to_string()))?;
        match response.await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Worker(
                "worker exited before replying".to_string(),
            )),
        }
    }
}

fn worker_loop(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    registry: Arc<CallableRegistry>,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker runtime");

    loop {
        let job = {
            let guard = receiver.lock().expect("pool queue poisoned");
            guard.recv()
        };
        let Ok(job) = job else {
            tracing::debug!(worker = index, "pool channel closed, worker exiting");
            break;
        };

        let result = match registry.get(&job.target) {
            Some(callable) => runtime.block_on(callable.call(job.input, job.ctx)),
            None => Err(NodeError::Callable(format!(
                "no callable registered for '{}'",
                job.target
            ))),
        };
        // Receiver may be gone if the invocation timed out.
        let _ = job.reply.send(result);
    }
}
