// src/exec/executor_loop.rs

//! Main executor loop that manages running task workers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::exec::collaborator::Collaborator;
use crate::exec::secrets::SecretBag;
use crate::exec::task_runner::run_task;
use crate::types::TaskName;

/// Shared, read-only state every worker needs.
pub struct WorkerContext {
    pub collaborator: Arc<dyn Collaborator>,
    pub store: Arc<dyn ArtifactStore>,
    pub params: BTreeMap<String, String>,
    pub secrets: SecretBag,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("store", &self.store)
            .field("params", &self.params)
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}

/// Messages understood by the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ScheduledTask),
    CancelAll,
}

/// Internal handle for a currently-running worker.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each scheduled task is executed in its own Tokio task. The loop keeps a
/// cancel handle per running task so `CancelAll` can reach every worker.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    context: Arc<WorkerContext>,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<TaskName, ActiveTask> = HashMap::new();

        while let Some(message) = rx.recv().await {
            active.retain(|_, task| !task.handle.is_finished());
            match message {
                ExecutorMessage::Run(task) => {
                    handle_scheduled_task(task, &mut active, &runtime_tx, &context);
                }
                ExecutorMessage::CancelAll => cancel_all(&mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskName, ActiveTask>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    context: &Arc<WorkerContext>,
) {
    let name = task.name.clone();
    if active.contains_key(&name) {
        // The scheduler dispatches each task once per run.
        warn!(task = %name, run_id = %task.run_id, "task already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let ctx = Arc::clone(context);
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        run_task(task, ctx, rt_tx, cancel_rx).await;
        debug!(task = %spawn_name, "task worker finished");
    });

    active.insert(
        name,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_all(active: &mut HashMap<TaskName, ActiveTask>) {
    info!(running = active.len(), "cancelling running tasks");
    for (name, task) in active.iter_mut() {
        if let Some(cancel) = task.cancel.take()
            && cancel.send(()).is_err()
        {
            debug!(task = %name, "worker already finished while cancelling");
        }
    }
}
