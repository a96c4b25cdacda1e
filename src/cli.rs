// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::RetentionPolicy;

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Run a build pipeline defined as a DAG of tasks, once.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline definition (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Set a parameter, overriding `[params]` (repeatable).
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Provide a secret value (repeatable). Prefer `--secret-env`.
    #[arg(long = "secret", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub secrets: Vec<(String, String)>,

    /// Read the secret `KEY` from the environment variable of the same name.
    #[arg(long = "secret-env", value_name = "KEY")]
    pub secret_env: Vec<String>,

    /// Upper bound on concurrently running tasks.
    #[arg(long, value_name = "N", value_parser = parse_parallelism)]
    pub max_parallelism: Option<usize>,

    /// Override `retain_artifacts` (always, on_failure, never).
    #[arg(long, value_name = "POLICY")]
    pub retain_artifacts: Option<RetentionPolicy>,

    /// Write the run report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution batches, but don't execute
    /// any commands.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_parallelism(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("max-parallelism must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid max-parallelism '{s}': {e}")),
    }
}
