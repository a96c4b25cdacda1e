// src/artifacts/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::{debug, info};

use crate::artifacts::{Artifact, ArtifactRef, ArtifactStore, ContentDescriptor, check_name};
use crate::errors::ArtifactError;
use crate::types::{ArtifactName, RetentionPolicy, RunId};

/// Keeps artifacts in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    runs: Mutex<HashMap<RunId, IndexMap<ArtifactName, Artifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RunId, IndexMap<ArtifactName, Artifact>>>, ArtifactError> {
        self.runs
            .lock()
            .map_err(|_| ArtifactError::Storage("memory store lock poisoned".to_string()))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn publish(
        &self,
        run_id: RunId,
        producer: &str,
        artifact: &str,
        payload: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError> {
        check_name(artifact)?;
        let mut runs = self.lock()?;
        let run = runs.entry(run_id).or_default();

        match run.entry(artifact.to_string()) {
            Entry::Occupied(existing) => Err(ArtifactError::DuplicatePublish {
                run_id,
                artifact: artifact.to_string(),
                producer: existing.get().producer.clone(),
            }),
            Entry::Vacant(slot) => {
                let stored = slot.insert(Artifact {
                    name: artifact.to_string(),
                    producer: producer.to_string(),
                    descriptor: ContentDescriptor::for_payload(&payload),
                    payload,
                });
                debug!(
                    run_id = %run_id,
                    artifact,
                    producer,
                    size_bytes = stored.descriptor.size_bytes,
                    "published artifact (memory)"
                );
                Ok(stored.to_ref(run_id))
            }
        }
    }

    fn fetch(&self, run_id: RunId, artifact: &str) -> Result<Artifact, ArtifactError> {
        let runs = self.lock()?;
        runs.get(&run_id)
            .and_then(|run| run.get(artifact))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                run_id,
                artifact: artifact.to_string(),
            })
    }

    fn list(&self, run_id: RunId) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let runs = self.lock()?;
        Ok(runs
            .get(&run_id)
            .map(|run| run.values().map(|a| a.to_ref(run_id)).collect())
            .unwrap_or_default())
    }

    fn finish_run(
        &self,
        run_id: RunId,
        succeeded: bool,
        retention: RetentionPolicy,
    ) -> Result<(), ArtifactError> {
        if retention.keeps(succeeded) {
            return Ok(());
        }
        if let Some(run) = self.lock()?.remove(&run_id) {
            info!(run_id = %run_id, discarded = run.len(), "discarded run artifacts (memory)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_before_publish_is_not_found() {
        let store = MemoryArtifactStore::new();
        let run = RunId::new_v4();
        let err = store.fetch(run, "image.tar").unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));

        store.publish(run, "build", "image.tar", vec![0, 1, 2, 255]).unwrap();
        let artifact = store.fetch(run, "image.tar").unwrap();
        assert_eq!(artifact.payload, vec![0, 1, 2, 255]);
        assert_eq!(artifact.producer, "build");
    }

    #[test]
    fn second_publish_is_rejected_and_first_payload_kept() {
        let store = MemoryArtifactStore::new();
        let run = RunId::new_v4();
        store.publish(run, "build", "out", b"first".to_vec()).unwrap();

        let err = store.publish(run, "other", "out", b"second".to_vec()).unwrap_err();
        assert_eq!(
            err,
            ArtifactError::DuplicatePublish {
                run_id: run,
                artifact: "out".into(),
                producer: "build".into(),
            }
        );
        assert_eq!(store.fetch(run, "out").unwrap().payload, b"first");
    }

    #[test]
    fn runs_are_isolated() {
        let store = MemoryArtifactStore::new();
        let (a, b) = (RunId::new_v4(), RunId::new_v4());
        store.publish(a, "build", "out", b"x".to_vec()).unwrap();
        assert!(store.fetch(b, "out").is_err());
        assert!(store.publish(b, "build", "out", b"y".to_vec()).is_ok());
    }

    #[test]
    fn list_is_in_publication_order() {
        let store = MemoryArtifactStore::new();
        let run = RunId::new_v4();
        store.publish(run, "b", "zeta", Vec::new()).unwrap();
        store.publish(run, "a", "alpha", Vec::new()).unwrap();
        let names: Vec<_> = store.list(run).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn retention_on_failure_discards_successful_runs() {
        let store = MemoryArtifactStore::new();
        let (ok, bad) = (RunId::new_v4(), RunId::new_v4());
        store.publish(ok, "t", "out", b"1".to_vec()).unwrap();
        store.publish(bad, "t", "out", b"2".to_vec()).unwrap();

        store.finish_run(ok, true, RetentionPolicy::OnFailure).unwrap();
        store.finish_run(bad, false, RetentionPolicy::OnFailure).unwrap();

        assert!(store.list(ok).unwrap().is_empty());
        assert_eq!(store.list(bad).unwrap().len(), 1);
    }
}
