use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;
use pipedag::dag::ScheduledTask;
use pipedag::engine::{RuntimeEvent, TaskExecution, TaskOutcome};
use pipedag::errors::Result;
use pipedag::exec::ExecutorBackend;

/// A fake executor that:
/// - records which tasks were "run", in dispatch order
/// - immediately reports `TaskCompleted` for each scheduled task, with
///   `Success` unless an outcome was scripted for it.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outcomes: HashMap<String, TaskOutcome>,
    cancel_requests: Arc<Mutex<usize>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
            cancel_requests: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_outcome(mut self, task: &str, outcome: TaskOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    /// Failure with the given exit code.
    pub fn failing(self, task: &str, exit_code: i32) -> Self {
        self.with_outcome(
            task,
            TaskOutcome::Failed {
                exit_code: Some(exit_code),
                reason: format!("exit code {exit_code}"),
            },
        )
    }

    pub fn cancel_requests(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.cancel_requests)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes = self.outcomes.clone();

        Box::pin(async move {
            for t in tasks {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(t.name.clone());
                }

                let outcome = outcomes
                    .get(&t.name)
                    .cloned()
                    .unwrap_or(TaskOutcome::Success);

                tx.send(RuntimeEvent::TaskCompleted {
                    task: t.name.clone(),
                    outcome,
                    execution: TaskExecution {
                        attempts: 1,
                        ..TaskExecution::default()
                    },
                })
                .await
                .map_err(|_| anyhow!("runtime channel closed"))?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let counter = Arc::clone(&self.cancel_requests);
        Box::pin(async move {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
    }
}
