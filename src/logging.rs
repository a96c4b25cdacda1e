// src/logging.rs

//! Diagnostic output of a pipeline run.
//!
//! Every engine event is a structured `tracing` record. Task-level records
//! carry `task` and `run_id`, and worker records add `attempt`, `exit_code`
//! or `error` where they apply, so one run can be followed with a plain grep
//! on its id. Commands are logged as unexpanded templates and captured task
//! output is redacted before it reaches a record, so secret values never
//! appear here.
//!
//! Records go to stderr. Stdout is reserved for the run summary.
//!
//! `--log-level` wins. Otherwise `PIPEDAG_LOG` is read as a filter directive,
//! so `PIPEDAG_LOG=info,pipedag::exec=debug` turns up worker detail only.
//! The fallback is `info`.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Filter directive consulted when `--log-level` is absent.
pub const LOG_ENV_VAR: &str = "PIPEDAG_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(directive_for(level)),
        None => std::env::var(LOG_ENV_VAR)
            .ok()
            .and_then(|raw| filter_from_env(&raw))
            .unwrap_or_else(|| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

fn directive_for(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// `None` for blank or unparsable directives, which fall back to `info`.
fn filter_from_env(raw: &str) -> Option<EnvFilter> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    EnvFilter::try_new(raw.to_lowercase()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_accept_levels_and_per_module_targets() {
        assert!(filter_from_env(" DEBUG ").is_some());
        assert!(filter_from_env("info,pipedag::exec=debug").is_some());
        assert!(filter_from_env("   ").is_none());
        assert!(filter_from_env("pipedag=loud").is_none());
    }

    #[test]
    fn cli_levels_map_to_plain_directives() {
        assert_eq!(directive_for(LogLevel::Warn), "warn");
        assert_eq!(directive_for(LogLevel::Trace), "trace");
    }
}
