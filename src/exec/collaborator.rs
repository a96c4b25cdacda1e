// src/exec/collaborator.rs

//! Uniform interface to the external tools that do a task's real work.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::artifacts::Artifact;
use crate::errors::InfrastructureError;
use crate::exec::secrets::SecretBag;
use crate::types::{ArtifactName, RunId, TaskName};

/// Everything a collaborator needs for one attempt of one task.
#[derive(Clone)]
pub struct Invocation {
    pub run_id: RunId,
    pub task: TaskName,
    /// Command with placeholders already expanded. May contain secrets.
    pub command: String,
    pub inputs: Vec<Artifact>,
    /// Artifacts the collaborator is expected to produce.
    pub outputs: Vec<ArtifactName>,
    pub parameters: BTreeMap<String, String>,
    pub secrets: SecretBag,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("run_id", &self.run_id)
            .field("task", &self.task)
            .field("command", &self.secrets.redact(&self.command))
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("parameters", &self.parameters)
            .field("secrets", &self.secrets)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// What the collaborator reported back.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Process exit code; `None` if terminated by a signal.
    pub exit_code: Option<i32>,
    /// Produced payloads, by artifact name.
    pub outputs: Vec<(ArtifactName, Vec<u8>)>,
    pub logs: Vec<String>,
}

impl Execution {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, name: impl Into<ArtifactName>, payload: impl Into<Vec<u8>>) -> Self {
        self.outputs.push((name.into(), payload.into()));
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes task commands.
///
/// A returned `Err` means the collaborator could not be driven at all
/// (spawn failure, scratch IO); the worker may retry it. A command that ran
/// and failed is an `Ok` with a non-zero exit code.
///
/// Dropping the returned future must stop the underlying work.
pub trait Collaborator: Send + Sync {
    fn execute(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<Execution, InfrastructureError>> + Send + '_>>;
}
