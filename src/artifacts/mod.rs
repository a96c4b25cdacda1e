// src/artifacts/mod.rs

//! Run-scoped, name-addressable artifact storage.
//!
//! Every artifact is published exactly once per run by its producing task
//! and is immutable afterwards. Downstream tasks fetch it by name. Stores
//! serialise their own writers, so the engine never needs to lock around
//! them.
//!
//! - [`memory`] keeps payloads in process memory (default).
//! - [`file`] persists payloads under a directory so they survive the run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ArtifactError;
use crate::types::{ArtifactName, RetentionPolicy, RunId, TaskName};

pub mod file;
pub mod memory;

pub use file::FileArtifactStore;
pub use memory::MemoryArtifactStore;

/// Content descriptor recorded at publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// BLAKE3 digest of the payload, hex encoded.
    pub digest: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
}

impl ContentDescriptor {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            digest: digest(payload),
            size_bytes: payload.len() as u64,
            published_at: Utc::now(),
        }
    }
}

/// Reference to a published artifact. Tasks and reports hold these; the
/// store owns the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub name: ArtifactName,
    pub producer: TaskName,
    pub descriptor: ContentDescriptor,
}

/// A published artifact together with its payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: ArtifactName,
    pub producer: TaskName,
    pub payload: Vec<u8>,
    pub descriptor: ContentDescriptor,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("producer", &self.producer)
            .field("size_bytes", &self.descriptor.size_bytes)
            .field("digest", &self.descriptor.digest)
            .finish()
    }
}

impl Artifact {
    pub fn to_ref(&self, run_id: RunId) -> ArtifactRef {
        ArtifactRef {
            run_id,
            name: self.name.clone(),
            producer: self.producer.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

/// Storage for the artifacts of pipeline runs.
///
/// Calls are synchronous; async callers should use `spawn_blocking` for
/// stores that touch the disk.
pub trait ArtifactStore: Send + Sync + fmt::Debug {
    /// Publish `payload` as `artifact`, produced by `producer`.
    ///
    /// Fails with [`ArtifactError::DuplicatePublish`] if the name was already
    /// published in this run.
    fn publish(
        &self,
        run_id: RunId,
        producer: &str,
        artifact: &str,
        payload: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError>;

    /// Fetch a published artifact, byte for byte.
    fn fetch(&self, run_id: RunId, artifact: &str) -> Result<Artifact, ArtifactError>;

    /// Every artifact published in the run, in publication order.
    fn list(&self, run_id: RunId) -> Result<Vec<ArtifactRef>, ArtifactError>;

    /// Apply the retention policy once the run is terminal.
    fn finish_run(
        &self,
        run_id: RunId,
        succeeded: bool,
        retention: RetentionPolicy,
    ) -> Result<(), ArtifactError>;
}

/// BLAKE3 digest of a payload, hex encoded.
pub fn digest(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Reject names that could escape a store's namespace.
pub(crate) fn check_name(artifact: &str) -> Result<(), ArtifactError> {
    let valid = !artifact.is_empty()
        && artifact != "."
        && artifact != ".."
        && artifact
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ArtifactError::Storage(format!(
            "invalid artifact name '{artifact}'"
        )))
    }
}
