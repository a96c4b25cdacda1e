// src/run/ledger.rs

//! Per-run bookkeeping that the scheduler does not care about: timestamps,
//! attempts, exit codes and log tails.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::artifacts::ArtifactRef;
use crate::dag::ScheduledTask;
use crate::engine::{TaskExecution, TaskOutcome};
use crate::types::{ArtifactName, RunId, TaskName};

/// Number of captured log lines kept per task.
pub const LOG_TAIL_LINES: usize = 20;

/// What the ledger knows about one task.
#[derive(Debug, Clone, Default)]
pub struct TaskRecord {
    pub dispatched_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub duration: Option<Duration>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    /// Inputs the task ran without because their producer never published.
    pub unavailable_inputs: Vec<ArtifactName>,
    pub log_tail: Vec<String>,
}

/// Pure record of one run, fed by the core runtime.
#[derive(Debug, Clone)]
pub struct RunLedger {
    run_id: RunId,
    pipeline: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    cancelled: bool,
    fatal_error: Option<String>,
    tasks: HashMap<TaskName, TaskRecord>,
}

impl RunLedger {
    pub fn new(run_id: RunId, pipeline: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at: None,
            finished_at: None,
            cancelled: false,
            fatal_error: None,
            tasks: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// First fatal error recorded for the run, if any.
    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal_error.as_deref()
    }

    pub fn task(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.get(name)
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn record_dispatch(&mut self, task: &ScheduledTask) {
        let record = self.tasks.entry(task.name.clone()).or_default();
        record.dispatched_at = Some(Utc::now());
        record.unavailable_inputs = task.unavailable_inputs.clone();
    }

    pub fn record_completion(&mut self, task: &str, outcome: &TaskOutcome, execution: TaskExecution) {
        let record = self.tasks.entry(task.to_string()).or_default();
        record.attempts = execution.attempts;
        record.duration = Some(execution.duration);
        record.artifacts = execution.published;

        let skip = execution.logs.len().saturating_sub(LOG_TAIL_LINES);
        record.log_tail = execution.logs.into_iter().skip(skip).collect();

        match outcome {
            TaskOutcome::Success => {
                record.exit_code = Some(0);
                record.error = None;
            }
            TaskOutcome::Failed { exit_code, reason } => {
                record.exit_code = *exit_code;
                record.error = Some(reason.clone());
            }
            TaskOutcome::Cancelled => {
                record.exit_code = None;
                record.error = Some("cancelled".to_string());
            }
        }
    }

    /// Keep the first fatal error; later ones are usually consequences.
    pub fn record_fatal(&mut self, message: String) {
        if self.fatal_error.is_none() {
            self.fatal_error = Some(message);
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_keeps_only_the_log_tail() {
        let mut ledger = RunLedger::new(RunId::new_v4(), "ci");
        ledger.start();
        ledger.record_dispatch(&ScheduledTask {
            name: "build".into(),
            cmd: "make".into(),
            inputs: Vec::new(),
            unavailable_inputs: vec!["cache.tar".into()],
            outputs: Vec::new(),
            retries: 0,
            timeout: None,
            run_id: ledger.run_id(),
        });

        let logs: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        ledger.record_completion(
            "build",
            &TaskOutcome::Failed {
                exit_code: Some(3),
                reason: "exit code 3".into(),
            },
            TaskExecution {
                attempts: 2,
                logs,
                ..TaskExecution::default()
            },
        );

        let record = ledger.task("build").unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.exit_code, Some(3));
        assert_eq!(record.error.as_deref(), Some("exit code 3"));
        assert_eq!(record.log_tail.len(), LOG_TAIL_LINES);
        assert_eq!(record.log_tail.last().map(String::as_str), Some("line 49"));
        assert!(record.dispatched_at.is_some());
        assert_eq!(record.unavailable_inputs, vec!["cache.tar".to_string()]);
    }

    #[test]
    fn first_fatal_error_wins() {
        let mut ledger = RunLedger::new(RunId::new_v4(), "ci");
        ledger.record_fatal("first".into());
        ledger.record_fatal("second".into());
        assert_eq!(ledger.fatal_error(), Some("first"));
    }
}
