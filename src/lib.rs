// src/lib.rs

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod run;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::artifacts::FileArtifactStore;
use crate::cli::CliArgs;
use crate::config::{PipelineFile, load_and_validate};
use crate::errors::PipedagError;
use crate::exec::{SecretBag, ShellCollaborator};
use crate::run::Run;

pub use crate::run::RunReport;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - definition loading and validation
/// - the artifact store
/// - the run and its shell collaborator
/// - Ctrl-C handling
/// - the report
///
/// Returns the process exit code for the run's verdict.
pub async fn run(args: CliArgs) -> Result<u8> {
    let config_path = PathBuf::from(&args.config);
    let pipeline = load_and_validate(&config_path)
        .with_context(|| format!("loading pipeline definition {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&pipeline)?;
        return Ok(0);
    }

    let root_dir = config_root_dir(&config_path);
    let params: BTreeMap<String, String> = args.params.iter().cloned().collect();
    let secrets = collect_secrets(&args)?;

    let artifact_dir = pipeline
        .section()
        .artifact_dir
        .as_ref()
        .map(|dir| root_dir.join(dir));

    let mut run = Run::new(pipeline, params, secrets).map_err(PipedagError::from)?;
    if let Some(dir) = artifact_dir {
        info!(path = %dir.display(), "using on-disk artifact store");
        run = run.with_store(Arc::new(FileArtifactStore::new(dir)));
    }
    if let Some(n) = args.max_parallelism {
        run = run.with_max_parallelism(n);
    }
    if let Some(policy) = args.retain_artifacts {
        run = run.with_retention(policy);
    }

    // Ctrl-C → cancel the run.
    {
        let cancel = run.cancel_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            cancel.cancel().await;
        });
    }

    let collaborator = Arc::new(ShellCollaborator::new().with_workdir(root_dir));
    let report = run.execute(collaborator).await?;

    print!("{}", report.summary());

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        info!(path = %path.display(), "wrote run report");
    }

    Ok(report.exit_code())
}

/// Merge `--secret` and `--secret-env` into a secret bag.
fn collect_secrets(args: &CliArgs) -> Result<SecretBag> {
    let mut secrets: SecretBag = args.secrets.iter().cloned().collect();
    for key in &args.secret_env {
        let value = std::env::var(key)
            .map_err(|_| anyhow!("secret environment variable {key} is not set"))?;
        secrets.insert(key.clone(), value);
    }
    Ok(secrets)
}

/// Directory relative paths in the definition are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "ci/Pipeline.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Pipeline.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Dry-run output: tasks grouped into the batches they would run in.
fn print_dry_run(pipeline: &PipelineFile) -> Result<()> {
    let batches = pipeline
        .graph()
        .topological_batches()
        .map_err(PipedagError::from)?;

    println!("pipedag dry-run: pipeline '{}'", pipeline.name());
    println!("  max_parallelism = {}", pipeline.max_parallelism());
    println!("  retain_artifacts = {:?}", pipeline.section().retain_artifacts);
    if !pipeline.params().is_empty() {
        println!("  params:");
        for (key, value) in pipeline.params() {
            println!("    {key} = {value}");
        }
    }
    println!();

    for (i, batch) in batches.iter().enumerate() {
        println!("batch {}:", i + 1);
        for name in batch {
            let Some(task) = pipeline.task(name) else {
                continue;
            };
            println!("  - {name}");
            println!("      cmd: {}", task.cmd);
            if !task.needs.is_empty() {
                println!("      needs: {:?}", task.needs);
            }
            let inputs = pipeline.inputs_of(name);
            if !inputs.is_empty() {
                println!("      inputs: {inputs:?}");
            }
            if !task.outputs.is_empty() {
                println!("      outputs: {:?}", task.outputs);
            }
            if task.best_effort {
                println!("      best_effort: true");
            }
            if task.always {
                println!("      always: true");
            }
            if !task.when.is_empty() {
                println!("      when: {:?}", task.when);
            }
            if task.retries > 0 {
                println!("      retries: {}", task.retries);
            }
            if let Some(timeout) = &task.timeout {
                println!("      timeout: {timeout}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
