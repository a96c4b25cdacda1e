// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::errors::Result;

/// Load a pipeline definition from a given path and return the raw
/// `RawPipelineFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Parse a pipeline definition from TOML text without validating it.
pub fn parse_str(contents: &str) -> Result<RawPipelineFile> {
    let config: RawPipelineFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a pipeline definition from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `needs` references and cycles,
///   - duplicate output artifacts,
///   - inputs that no upstream task produces,
///   - basic `[pipeline]` sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let raw = load_from_path(&path)?;
    let pipeline = PipelineFile::try_from(raw)?;
    Ok(pipeline)
}

/// File name looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "Pipeline.toml";
