#![allow(dead_code)]

use std::collections::BTreeMap;

use indexmap::IndexMap;
use pipedag::config::{PipelineFile, PipelineSection, RawPipelineFile, TaskConfig};
use pipedag::errors::DefinitionError;
use pipedag::types::RetentionPolicy;

/// Builder for `PipelineFile` to simplify test setup.
///
/// Tasks keep the order in which they are added.
pub struct PipelineBuilder {
    raw: RawPipelineFile,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPipelineFile {
                pipeline: PipelineSection::default(),
                params: BTreeMap::new(),
                task: IndexMap::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.pipeline.name = name.to_string();
        self
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.raw.pipeline.max_parallelism = Some(n);
        self
    }

    pub fn retain_artifacts(mut self, policy: RetentionPolicy) -> Self {
        self.raw.pipeline.retain_artifacts = policy;
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.raw.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.raw.task.insert(name.to_string(), task);
        self
    }

    pub fn try_build(self) -> Result<PipelineFile, DefinitionError> {
        PipelineFile::try_from(self.raw)
    }

    pub fn build(self) -> PipelineFile {
        self.try_build()
            .expect("Failed to build valid pipeline from builder")
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                needs: vec![],
                outputs: vec![],
                inputs: None,
                best_effort: false,
                always: false,
                when: BTreeMap::new(),
                retries: 0,
                timeout: None,
            },
        }
    }

    pub fn needs(mut self, dep: &str) -> Self {
        self.task.needs.push(dep.to_string());
        self
    }

    pub fn output(mut self, artifact: &str) -> Self {
        self.task.outputs.push(artifact.to_string());
        self
    }

    pub fn input(mut self, artifact: &str) -> Self {
        self.task
            .inputs
            .get_or_insert_with(Vec::new)
            .push(artifact.to_string());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.task.best_effort = true;
        self
    }

    pub fn always(mut self) -> Self {
        self.task.always = true;
        self
    }

    pub fn when(mut self, key: &str, allowed: &[&str]) -> Self {
        self.task.when.insert(
            key.to_string(),
            allowed.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.task.retries = n;
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.task.timeout = Some(duration.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// The CI pipeline used across tests:
///
/// ```text
/// build -> {test, lint (best effort), coverage} -> publish -> deploy (branch = main)
///                                                          -> notify (always)
/// ```
pub fn ci_pipeline() -> PipelineBuilder {
    PipelineBuilder::new()
        .name("ci")
        .param("branch", "main")
        .with_task("build", TaskConfigBuilder::new("build").output("image.tar").build())
        .with_task("test", TaskConfigBuilder::new("test").needs("build").build())
        .with_task(
            "lint",
            TaskConfigBuilder::new("lint").needs("build").best_effort().build(),
        )
        .with_task(
            "coverage",
            TaskConfigBuilder::new("coverage")
                .needs("build")
                .output("coverage.xml")
                .build(),
        )
        .with_task(
            "publish",
            TaskConfigBuilder::new("publish")
                .needs("test")
                .needs("lint")
                .needs("coverage")
                .input("image.tar")
                .output("release.json")
                .build(),
        )
        .with_task(
            "deploy",
            TaskConfigBuilder::new("deploy")
                .needs("publish")
                .when("branch", &["main"])
                .build(),
        )
        .with_task(
            "notify",
            TaskConfigBuilder::new("notify").needs("publish").always().build(),
        )
}
