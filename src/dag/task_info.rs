// src/dag/task_info.rs

//! Task metadata and per-run state.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::model::{PipelineFile, TaskConfig};
use crate::types::{ArtifactName, RunId, TaskName, TaskStatus};

/// Static task information derived from the pipeline definition, plus its
/// state in the current run.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: TaskName,
    pub cmd: String,
    /// Direct dependencies (names in `needs`).
    pub deps: Vec<TaskName>,
    /// Effective inputs, each with the task that produces it.
    pub inputs: Vec<(ArtifactName, TaskName)>,
    pub outputs: Vec<ArtifactName>,
    pub best_effort: bool,
    pub always: bool,
    pub when: BTreeMap<String, Vec<String>>,
    pub retries: u32,
    pub timeout: Option<Duration>,

    pub status: TaskStatus,

    /// Dependencies that have not reached a terminal status yet.
    pub pending_deps: usize,
}

impl TaskInfo {
    pub fn from_config(name: TaskName, cfg: &TaskConfig, pipeline: &PipelineFile) -> Self {
        let deps = pipeline.graph().dependencies_of(&name).to_vec();
        Self {
            inputs: pipeline
                .inputs_of(&name)
                .into_iter()
                .filter_map(|artifact| {
                    let producer = pipeline.producer_of(&artifact)?.clone();
                    Some((artifact, producer))
                })
                .collect(),
            cmd: cfg.cmd.clone(),
            pending_deps: deps.len(),
            deps,
            outputs: cfg.outputs.clone(),
            best_effort: cfg.best_effort,
            always: cfg.always,
            when: cfg.when.clone(),
            retries: cfg.retries,
            // Validated when the pipeline was loaded.
            timeout: cfg.timeout_duration().ok().flatten(),
            status: TaskStatus::Pending,
            name,
        }
    }

    /// Evaluate the `when` gate against the parameter bag.
    ///
    /// Returns a description of the first unmet condition, or `None` if the
    /// task may run.
    pub fn unmet_gate(&self, params: &BTreeMap<String, String>) -> Option<String> {
        for (key, allowed) in &self.when {
            match params.get(key) {
                Some(value) if allowed.iter().any(|a| a == value) => {}
                Some(value) => {
                    return Some(format!(
                        "{key} = '{value}' (allowed: {})",
                        allowed.join(", ")
                    ));
                }
                None => return Some(format!("{key} is not set")),
            }
        }
        None
    }
}

/// Description of a task that the scheduler wants a worker to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: TaskName,
    /// Unexpanded command template.
    pub cmd: String,
    /// Inputs whose producer succeeded; these are guaranteed published.
    pub inputs: Vec<ArtifactName>,
    /// Inputs whose producer did not publish them (a failed best-effort
    /// task, or a skipped upstream of an `always` task).
    pub unavailable_inputs: Vec<ArtifactName>,
    pub outputs: Vec<ArtifactName>,
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub run_id: RunId,
}

impl ScheduledTask {
    /// Build the dispatch description, resolving which inputs exist from the
    /// producers' statuses in `tasks`.
    pub fn from_task_info(info: &TaskInfo, tasks: &HashMap<TaskName, TaskInfo>, run_id: RunId) -> Self {
        let (available, unavailable): (Vec<_>, Vec<_>) =
            info.inputs.iter().partition(|(_, producer)| {
                tasks
                    .get(producer)
                    .is_some_and(|p| p.status == TaskStatus::Succeeded)
            });

        Self {
            name: info.name.clone(),
            cmd: info.cmd.clone(),
            inputs: available.into_iter().map(|(a, _)| a.clone()).collect(),
            unavailable_inputs: unavailable.into_iter().map(|(a, _)| a.clone()).collect(),
            outputs: info.outputs.clone(),
            retries: info.retries,
            timeout: info.timeout,
            run_id,
        }
    }
}
