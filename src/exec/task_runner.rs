// src/exec/task_runner.rs

//! Worker for a single dispatched task.
//!
//! A worker fetches the task's inputs, expands its command, drives the
//! collaborator (retrying infrastructure errors), checks and publishes the
//! declared outputs, and reports exactly one event back to the runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifacts::{Artifact, ArtifactRef, ArtifactStore};
use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskExecution, TaskOutcome};
use crate::errors::{ArtifactError, InfrastructureError};
use crate::exec::collaborator::{Execution, Invocation};
use crate::exec::executor_loop::WorkerContext;
use crate::exec::template;

/// Run one task to completion (or cancellation) and report the result.
pub async fn run_task(
    task: ScheduledTask,
    context: Arc<WorkerContext>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let attempts = AtomicU32::new(0);

    info!(
        task = %task.name,
        run_id = %task.run_id,
        cmd = %task.cmd,
        "starting task"
    );

    let event = tokio::select! {
        // A dropped sender just means nobody will cancel us.
        Ok(()) = &mut cancel_rx => {
            info!(task = %task.name, run_id = %task.run_id, "task cancelled");
            RuntimeEvent::TaskCompleted {
                task: task.name.clone(),
                outcome: TaskOutcome::Cancelled,
                execution: TaskExecution {
                    attempts: attempts.load(Ordering::SeqCst),
                    duration: started.elapsed(),
                    ..TaskExecution::default()
                },
            }
        }
        event = execute_task(&task, &context, &attempts, started) => event,
    };

    if runtime_tx.send(event).await.is_err() {
        error!(task = %task.name, run_id = %task.run_id, "runtime is gone; dropping task result");
    }
}

/// Why an attempt did not produce an outcome.
enum AttemptError {
    /// Fatal to the run: a contract violation, or a publish that failed.
    Artifact(ArtifactError),
    /// Retried when the task has a retry policy.
    Infrastructure(InfrastructureError),
}

struct Attempt {
    outcome: TaskOutcome,
    published: Vec<ArtifactRef>,
    logs: Vec<String>,
}

async fn execute_task(
    task: &ScheduledTask,
    context: &Arc<WorkerContext>,
    attempts: &AtomicU32,
    started: Instant,
) -> RuntimeEvent {
    let max_attempts = task.retries.saturating_add(1);
    let mut logs = Vec::new();

    let (outcome, published) = loop {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match run_attempt(task, context, attempt).await {
            Ok(result) => {
                logs.extend(result.logs);
                break (result.outcome, result.published);
            }
            Err(AttemptError::Artifact(fault)) => {
                return RuntimeEvent::ArtifactFault {
                    task: task.name.clone(),
                    error: fault,
                    execution: TaskExecution {
                        attempts: attempt,
                        duration: started.elapsed(),
                        published: Vec::new(),
                        logs,
                    },
                };
            }
            Err(AttemptError::Infrastructure(err)) if attempt < max_attempts => {
                warn!(
                    task = %task.name,
                    run_id = %task.run_id,
                    attempt,
                    max_attempts,
                    error = %err,
                    "infrastructure error; retrying"
                );
                logs.push(format!("attempt {attempt} failed: {err}"));
            }
            Err(AttemptError::Infrastructure(err)) => {
                error!(
                    task = %task.name,
                    run_id = %task.run_id,
                    attempt,
                    error = %err,
                    "infrastructure error; giving up"
                );
                break (
                    TaskOutcome::Failed {
                        exit_code: None,
                        reason: err.to_string(),
                    },
                    Vec::new(),
                );
            }
        }
    };

    RuntimeEvent::TaskCompleted {
        task: task.name.clone(),
        outcome,
        execution: TaskExecution {
            attempts: attempts.load(Ordering::SeqCst),
            duration: started.elapsed(),
            published,
            logs,
        },
    }
}

async fn run_attempt(
    task: &ScheduledTask,
    context: &Arc<WorkerContext>,
    attempt: u32,
) -> Result<Attempt, AttemptError> {
    let inputs = fetch_inputs(task, &context.store).await?;

    let command = match template::expand(&task.name, &task.cmd, &context.params, &context.secrets) {
        Ok(command) => command,
        Err(err) => return Ok(failed(None, err.to_string(), Vec::new())),
    };

    let invocation = Invocation {
        run_id: task.run_id,
        task: task.name.clone(),
        command,
        inputs,
        outputs: task.outputs.clone(),
        parameters: context.params.clone(),
        secrets: context.secrets.clone(),
        attempt,
    };

    debug!(task = %task.name, attempt, "invoking collaborator");
    let collaborator = Arc::clone(&context.collaborator);
    let mut worker = AbortOnDrop(tokio::spawn(async move {
        collaborator.execute(invocation).await
    }));

    let joined = match task.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut worker.0).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(task = %task.name, attempt, timeout = ?limit, "task timed out");
                return Ok(failed(
                    None,
                    format!("timed out after {}", humanize(limit)),
                    Vec::new(),
                ));
            }
        },
        None => (&mut worker.0).await,
    };

    let execution = match joined {
        Ok(Ok(execution)) => execution,
        Ok(Err(err)) => return Err(AttemptError::Infrastructure(err)),
        Err(join_err) => {
            return Err(AttemptError::Infrastructure(InfrastructureError::WorkerCrashed {
                task: task.name.clone(),
                message: join_err.to_string(),
            }));
        }
    };

    let logs: Vec<String> = execution
        .logs
        .iter()
        .map(|line| context.secrets.redact(line))
        .collect();

    if !execution.succeeded() {
        let reason = match execution.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        info!(task = %task.name, attempt, exit_code = ?execution.exit_code, "task failed");
        return Ok(failed(execution.exit_code, reason, logs));
    }

    let missing = missing_outputs(task, &execution);
    if !missing.is_empty() {
        warn!(task = %task.name, missing = ?missing, "declared outputs were not produced");
        return Ok(failed(
            execution.exit_code,
            format!("missing declared output(s): {}", missing.join(", ")),
            logs,
        ));
    }

    // Earlier outputs may already be visible to other tasks, so a failed
    // publish cannot be reported as a plain task failure or retried.
    let published = publish_outputs(task, &context.store, execution)
        .await
        .map_err(AttemptError::Artifact)?;

    info!(
        task = %task.name,
        run_id = %task.run_id,
        attempt,
        published = published.len(),
        "task succeeded"
    );

    Ok(Attempt {
        outcome: TaskOutcome::Success,
        published,
        logs,
    })
}

fn failed(exit_code: Option<i32>, reason: String, logs: Vec<String>) -> Attempt {
    Attempt {
        outcome: TaskOutcome::Failed { exit_code, reason },
        published: Vec::new(),
        logs,
    }
}

fn missing_outputs(task: &ScheduledTask, execution: &Execution) -> Vec<String> {
    task.outputs
        .iter()
        .filter(|name| !execution.outputs.iter().any(|(n, _)| n == *name))
        .cloned()
        .collect()
}

async fn fetch_inputs(
    task: &ScheduledTask,
    store: &Arc<dyn ArtifactStore>,
) -> Result<Vec<Artifact>, AttemptError> {
    let mut inputs = Vec::with_capacity(task.inputs.len());
    for name in &task.inputs {
        let store = Arc::clone(store);
        let run_id = task.run_id;
        let artifact = name.clone();
        let fetched = blocking(move || store.fetch(run_id, &artifact)).await;
        match fetched {
            Ok(artifact) => inputs.push(artifact),
            Err(err) if err.is_contract_violation() => return Err(AttemptError::Artifact(err)),
            Err(err) => {
                return Err(AttemptError::Infrastructure(InfrastructureError::Store {
                    task: task.name.clone(),
                    source: err,
                }));
            }
        }
    }
    Ok(inputs)
}

async fn publish_outputs(
    task: &ScheduledTask,
    store: &Arc<dyn ArtifactStore>,
    execution: Execution,
) -> Result<Vec<ArtifactRef>, ArtifactError> {
    let mut published = Vec::with_capacity(task.outputs.len());
    let mut produced = execution.outputs;

    // Publish in declaration order; undeclared outputs are dropped.
    for name in &task.outputs {
        let Some(pos) = produced.iter().position(|(n, _)| n == name) else {
            continue;
        };
        let (artifact, payload) = produced.swap_remove(pos);
        let store = Arc::clone(store);
        let run_id = task.run_id;
        let producer = task.name.clone();
        let reference =
            blocking(move || store.publish(run_id, &producer, &artifact, payload)).await?;
        published.push(reference);
    }

    for (name, _) in produced {
        debug!(task = %task.name, artifact = %name, "ignoring undeclared output");
    }
    Ok(published)
}

/// Run a store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ArtifactError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ArtifactError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArtifactError::Storage(format!("store call panicked: {e}")))?
}

fn humanize(d: std::time::Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Aborts the collaborator task if the worker is dropped (cancellation,
/// timeout), which drops the collaborator's future and kills its process.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
