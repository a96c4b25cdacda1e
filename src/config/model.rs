use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::dag::DagGraph;
use crate::types::{ArtifactName, RetentionPolicy, TaskName};

/// Pipeline definition exactly as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// name = "ci"
/// max_parallelism = 3
///
/// [params]
/// image = "registry.example.com/app"
///
/// [task.build]
/// cmd = "docker build -t ${{ params.image }} ."
/// outputs = ["image.tar"]
///
/// [task.test]
/// cmd = "cargo test"
/// needs = ["build"]
/// ```
///
/// Nothing has been checked yet; convert to [`PipelineFile`] with
/// `PipelineFile::try_from` to validate it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Default parameter bag. Parameters given on the command line override
    /// these.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// All tasks from `[task.<name>]`, in declaration order.
    #[serde(default)]
    pub task: IndexMap<TaskName, TaskConfig>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Maximum number of tasks in flight. Defaults to the number of tasks.
    #[serde(default)]
    pub max_parallelism: Option<usize>,

    #[serde(default)]
    pub retain_artifacts: RetentionPolicy,

    /// Keep artifacts on disk under this directory (relative to the config
    /// file) instead of in memory.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            max_parallelism: None,
            retain_artifacts: RetentionPolicy::default(),
            artifact_dir: None,
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Command template handed to the collaborator. May contain
    /// `${{ params.<key> }}` and `${{ secrets.<key> }}` placeholders.
    pub cmd: String,

    /// Tasks that must finish before this one starts.
    #[serde(default, alias = "after")]
    pub needs: Vec<TaskName>,

    /// Artifacts this task publishes when it succeeds.
    #[serde(default)]
    pub outputs: Vec<ArtifactName>,

    /// Artifacts this task reads. If omitted, the outputs of its direct
    /// dependencies.
    #[serde(default)]
    pub inputs: Option<Vec<ArtifactName>>,

    /// A failure of this task is recorded as a warning and does not block
    /// dependents.
    #[serde(default)]
    pub best_effort: bool,

    /// Run once all dependencies are finished, whatever their outcome.
    #[serde(default)]
    pub always: bool,

    /// Gate condition: every key must be present in the parameter bag with
    /// one of the listed values, e.g. `when = { branch = ["main"] }`.
    #[serde(default)]
    pub when: BTreeMap<String, Vec<String>>,

    /// How many times to retry after an infrastructure error.
    #[serde(default)]
    pub retries: u32,

    /// Duration string like `"90s"` or `"10m"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl TaskConfig {
    /// Parsed `timeout`, if any.
    pub fn timeout_duration(&self) -> Result<Option<Duration>, String> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// A validated pipeline definition.
///
/// Only obtainable through `PipelineFile::try_from(RawPipelineFile)` (see
/// `config::validate`), so holders can rely on:
/// - at least one task, no dangling `needs`, no cycles
/// - output artifact names unique across the pipeline
/// - every input produced by a transitive dependency
/// - parseable timeouts
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pipeline: PipelineSection,
    params: BTreeMap<String, String>,
    task: IndexMap<TaskName, TaskConfig>,
    graph: DagGraph,
}

impl PipelineFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        params: BTreeMap<String, String>,
        task: IndexMap<TaskName, TaskConfig>,
        graph: DagGraph,
    ) -> Self {
        Self {
            pipeline,
            params,
            task,
            graph,
        }
    }

    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    pub fn section(&self) -> &PipelineSection {
        &self.pipeline
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = (&TaskName, &TaskConfig)> {
        self.task.iter()
    }

    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.task.get(name)
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Default parallelism: everything may run at once.
    pub fn max_parallelism(&self) -> usize {
        self.pipeline
            .max_parallelism
            .unwrap_or(self.task.len())
            .max(1)
    }

    /// Task that declares `artifact` among its outputs.
    pub fn producer_of(&self, artifact: &str) -> Option<&TaskName> {
        self.task
            .iter()
            .find(|(_, task)| task.outputs.iter().any(|o| o == artifact))
            .map(|(name, _)| name)
    }

    /// Effective inputs of a task: its declared `inputs`, or else the
    /// outputs of its direct dependencies.
    pub fn inputs_of(&self, name: &str) -> Vec<ArtifactName> {
        let Some(task) = self.task.get(name) else {
            return Vec::new();
        };
        match &task.inputs {
            Some(inputs) => inputs.clone(),
            None => task
                .needs
                .iter()
                .filter_map(|dep| self.task.get(dep))
                .flat_map(|dep| dep.outputs.iter().cloned())
                .collect(),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = parse_duration("9999999999999999999h").unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn deserializes_task_tables_in_declaration_order() {
        let raw: RawPipelineFile = toml::from_str(
            r#"
[task.zeta]
cmd = "echo z"

[task.alpha]
cmd = "echo a"
after = ["zeta"]
best_effort = true
when = { branch = ["main", "release"] }
"#,
        )
        .unwrap();

        let names: Vec<&str> = raw.task.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let alpha = &raw.task["alpha"];
        assert_eq!(alpha.needs, vec!["zeta".to_string()]);
        assert!(alpha.best_effort);
        assert_eq!(alpha.when["branch"], vec!["main", "release"]);
        assert_eq!(raw.pipeline.name, "pipeline");
        assert_eq!(raw.pipeline.retain_artifacts, RetentionPolicy::Always);
    }
}
