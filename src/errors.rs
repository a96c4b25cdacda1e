// src/errors.rs

//! Crate-wide error types.
//!
//! The taxonomy follows how far a failure reaches:
//! - [`DefinitionError`]: the pipeline definition is unusable; nothing runs.
//! - [`ArtifactError`]: the artifact hand-off contract was violated; fatal to
//!   the run.
//! - [`InfrastructureError`]: the worker could not drive its collaborator;
//!   retried when the task has a retry policy.
//!
//! A collaborator that runs and reports failure is *not* an error here; that
//! is a task outcome recorded by the scheduler.

use thiserror::Error;

use crate::types::{ArtifactName, RunId, TaskName};

/// Problems with the pipeline definition, detected before any task executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("duplicate task name '{0}'")]
    DuplicateName(TaskName),

    #[error("cycle detected in task graph involving task '{0}'")]
    Cycle(TaskName),

    #[error("task '{task}' needs unknown task '{dependency}'")]
    DanglingDependency {
        task: TaskName,
        dependency: TaskName,
    },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskName),

    #[error("artifact '{artifact}' is declared as an output of both '{first}' and '{second}'")]
    DuplicateOutput {
        artifact: ArtifactName,
        first: TaskName,
        second: TaskName,
    },

    #[error("task '{task}' reads artifact '{artifact}' which none of its upstream tasks produce")]
    UnreachableInput {
        task: TaskName,
        artifact: ArtifactName,
    },

    #[error("task '{task}' references unknown {scope} key '{key}' in its command")]
    UnknownTemplateKey {
        task: TaskName,
        scope: String,
        key: String,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Violations of the artifact store contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact '{artifact}' was already published in run {run_id} by task '{producer}'")]
    DuplicatePublish {
        run_id: RunId,
        artifact: ArtifactName,
        producer: TaskName,
    },

    #[error("artifact '{artifact}' not found in run {run_id}")]
    NotFound {
        run_id: RunId,
        artifact: ArtifactName,
    },

    /// Backing storage failed (disk, lock poisoning, corrupt blob).
    #[error("artifact storage failure: {0}")]
    Storage(String),
}

impl ArtifactError {
    /// Contract violations are fatal to the run; storage failures are
    /// infrastructure problems and may be retried.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, ArtifactError::Storage(_))
    }
}

/// Failures to drive an external collaborator.
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("failed to launch collaborator for task '{task}': {source}")]
    Spawn {
        task: TaskName,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure while running task '{task}': {source}")]
    Io {
        task: TaskName,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for task '{task}' crashed: {message}")]
    WorkerCrashed { task: TaskName, message: String },

    #[error("artifact store unavailable for task '{task}': {source}")]
    Store {
        task: TaskName,
        #[source]
        source: ArtifactError,
    },
}

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfrastructureError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    pub fn is_definition_error(&self) -> bool {
        matches!(self, PipedagError::Definition(_) | PipedagError::TomlError(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
