// src/engine/mod.rs

//! Orchestration engine for one pipeline run.
//!
//! This module ties together:
//! - the DAG scheduler
//! - the run ledger (timings, attempts, errors per task)
//! - the runtime event loop that reacts to:
//!   - task completion events from workers
//!   - artifact contract violations
//!   - cancellation requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::artifacts::ArtifactRef;
use crate::errors::ArtifactError;
use crate::types::TaskName;

/// Outcome of a task for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// The collaborator failed: non-zero exit, missing declared output,
    /// timeout, or infrastructure errors that outlasted the retry policy.
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
    /// Killed because the run was cancelled.
    Cancelled,
}

/// What a worker observed while executing a task.
#[derive(Debug, Clone, Default)]
pub struct TaskExecution {
    /// Number of collaborator invocations (1 unless retried).
    pub attempts: u32,
    pub duration: Duration,
    /// Artifacts published by this task.
    pub published: Vec<ArtifactRef>,
    /// Collaborator log lines, with secrets redacted.
    pub logs: Vec<String>,
}

/// Events flowing into the runtime from workers and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched task finished.
    TaskCompleted {
        task: TaskName,
        outcome: TaskOutcome,
        execution: TaskExecution,
    },
    /// A worker hit an artifact contract violation; fatal to the run.
    ArtifactFault {
        task: TaskName,
        error: ArtifactError,
        execution: TaskExecution,
    },
    /// Run-level cancellation (e.g. Ctrl-C).
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use self::event_handlers::{CoreCommand, CoreStep};
pub use self::runtime::Runtime;
