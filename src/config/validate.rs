// src/config/validate.rs

use std::collections::HashMap;

use crate::artifacts::check_name;
use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::dag::DagGraph;
use crate::errors::DefinitionError;
use crate::types::TaskName;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = DefinitionError;

    fn try_from(raw: RawPipelineFile) -> Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_pipeline_section(&raw)?;
        validate_task_fields(&raw)?;
        let graph = build_graph(&raw)?;
        validate_outputs(&raw)?;

        let pipeline = PipelineFile::new_unchecked(raw.pipeline, raw.params, raw.task, graph);
        validate_inputs(&pipeline)?;
        Ok(pipeline)
    }
}

fn ensure_has_tasks(cfg: &RawPipelineFile) -> Result<(), DefinitionError> {
    if cfg.task.is_empty() {
        return Err(DefinitionError::Invalid(
            "pipeline must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawPipelineFile) -> Result<(), DefinitionError> {
    if cfg.pipeline.name.trim().is_empty() {
        return Err(DefinitionError::Invalid(
            "[pipeline].name must not be empty".to_string(),
        ));
    }

    if cfg.pipeline.max_parallelism == Some(0) {
        return Err(DefinitionError::Invalid(
            "[pipeline].max_parallelism must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_task_fields(cfg: &RawPipelineFile) -> Result<(), DefinitionError> {
    for (name, task) in cfg.task.iter() {
        if check_name(name).is_err() {
            return Err(DefinitionError::Invalid(format!(
                "invalid task name '{}' (allowed: letters, digits, '.', '_', '-')",
                name
            )));
        }

        if task.cmd.trim().is_empty() {
            return Err(DefinitionError::Invalid(format!(
                "task '{}' has an empty `cmd`",
                name
            )));
        }

        if let Err(e) = task.timeout_duration() {
            return Err(DefinitionError::Invalid(format!(
                "task '{}' has an invalid `timeout`: {}",
                name, e
            )));
        }

        for artifact in task.outputs.iter().chain(task.inputs.iter().flatten()) {
            if check_name(artifact).is_err() {
                return Err(DefinitionError::Invalid(format!(
                    "task '{}' uses invalid artifact name '{}' (allowed: letters, digits, '.', '_', '-')",
                    name, artifact
                )));
            }
        }

        for (key, allowed) in task.when.iter() {
            if allowed.is_empty() {
                return Err(DefinitionError::Invalid(format!(
                    "task '{}' has an empty value list for `when.{}`",
                    name, key
                )));
            }
        }
    }
    Ok(())
}

fn build_graph(cfg: &RawPipelineFile) -> Result<DagGraph, DefinitionError> {
    let mut graph = DagGraph::new();
    for (name, task) in cfg.task.iter() {
        graph.add_task(name, task.needs.iter().cloned())?;
    }
    // Surfaces `needs` entries that never resolved to a task.
    graph.topological_batches()?;
    Ok(graph)
}

fn validate_outputs(cfg: &RawPipelineFile) -> Result<(), DefinitionError> {
    let mut producers: HashMap<&str, &TaskName> = HashMap::new();
    for (name, task) in cfg.task.iter() {
        for artifact in task.outputs.iter() {
            if let Some(first) = producers.insert(artifact.as_str(), name) {
                return Err(DefinitionError::DuplicateOutput {
                    artifact: artifact.clone(),
                    first: first.clone(),
                    second: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Every input must be published by a transitive dependency, so the
/// scheduler's producer-before-consumer ordering guarantees it exists when
/// the consumer starts.
fn validate_inputs(pipeline: &PipelineFile) -> Result<(), DefinitionError> {
    for (name, _) in pipeline.tasks() {
        let ancestors = pipeline.graph().ancestors_of(name);
        for artifact in pipeline.inputs_of(name) {
            let produced_upstream = ancestors.iter().any(|ancestor| {
                pipeline
                    .task(ancestor)
                    .is_some_and(|t| t.outputs.contains(&artifact))
            });
            if !produced_upstream {
                return Err(DefinitionError::UnreachableInput {
                    task: name.clone(),
                    artifact,
                });
            }
        }
    }
    Ok(())
}
