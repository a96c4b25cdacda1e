use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Name of an artifact, unique within one run.
pub type ArtifactName = String;

/// Identifier of one pipeline run.
pub type RunId = uuid::Uuid;

/// Why a task was skipped instead of executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// `task` failed (directly or through its own upstream) and this task is
    /// not marked `always`.
    UpstreamFailed { task: TaskName },
    /// `task` was skipped by its gate condition.
    UpstreamGated { task: TaskName },
    /// This task's own `when` condition did not hold.
    Gated { condition: String },
    /// The run was cancelled before the task was dispatched.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed { task } => write!(f, "upstream '{task}' failed"),
            SkipReason::UpstreamGated { task } => write!(f, "upstream '{task}' was gated"),
            SkipReason::Gated { condition } => write!(f, "gate not satisfied: {condition}"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Status of a single task inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied; waiting for a free worker slot.
    Ready,
    /// Dispatched to a worker.
    Running,
    Succeeded,
    /// A best-effort task whose collaborator failed. Dependents still run.
    SucceededWithWarnings,
    Failed,
    Skipped { reason: SkipReason },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::SucceededWithWarnings
                | TaskStatus::Failed
                | TaskStatus::Skipped { .. }
        )
    }

    /// Whether dependents may run after this (terminal) status.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::SucceededWithWarnings)
    }

    /// Whether this status makes the run fail.
    ///
    /// Gated skips are a policy decision, not a failure.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed
                | TaskStatus::Skipped {
                    reason: SkipReason::UpstreamFailed { .. } | SkipReason::Cancelled
                }
        )
    }

    /// Skip reason handed to a dependent of a task that ended in this
    /// status, or `None` if dependents may run.
    pub fn skip_reason_for_dependents(&self, task: &str) -> Option<SkipReason> {
        match self {
            TaskStatus::Failed => Some(SkipReason::UpstreamFailed {
                task: task.to_string(),
            }),
            TaskStatus::Skipped { reason } => Some(match reason {
                SkipReason::UpstreamFailed { task } => SkipReason::UpstreamFailed { task: task.clone() },
                SkipReason::UpstreamGated { task } => SkipReason::UpstreamGated { task: task.clone() },
                SkipReason::Gated { .. } => SkipReason::UpstreamGated {
                    task: task.to_string(),
                },
                SkipReason::Cancelled => SkipReason::Cancelled,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::SucceededWithWarnings => write!(f, "succeeded with warnings"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happens to a run's artifacts once it reaches a terminal status.
///
/// - `Always` (default): keep them for inspection.
/// - `OnFailure`: keep them only if the run failed.
/// - `Never`: discard them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RetentionPolicy {
    pub fn keeps(self, run_succeeded: bool) -> bool {
        match self {
            RetentionPolicy::Always => true,
            RetentionPolicy::OnFailure => !run_succeeded,
            RetentionPolicy::Never => false,
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(RetentionPolicy::Always),
            "on_failure" | "on-failure" => Ok(RetentionPolicy::OnFailure),
            "never" => Ok(RetentionPolicy::Never),
            other => Err(format!(
                "invalid retain_artifacts: {other} (expected \"always\", \"on_failure\" or \"never\")"
            )),
        }
    }
}
