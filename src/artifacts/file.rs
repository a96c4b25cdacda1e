// src/artifacts/file.rs

//! Artifact store backed by a directory.
//!
//! Layout:
//!
//! ```text
//! <root>/<run_id>/blobs/<artifact>
//! <root>/<run_id>/index/<artifact>.json   (ArtifactRef)
//! ```
//!
//! Publishing claims the index entry first (`create_new`), moves the payload
//! into `blobs/` from `staging/`, then fills in the index entry. An empty
//! index entry is a publish in progress and is not yet visible. Payload
//! digests are verified on fetch.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::artifacts::{
    Artifact, ArtifactRef, ArtifactStore, ContentDescriptor, check_name, digest,
};
use crate::errors::ArtifactError;
use crate::types::{RetentionPolicy, RunId};

const BLOB_DIR: &str = "blobs";
const INDEX_DIR: &str = "index";
const STAGING_DIR: &str = "staging";

#[derive(Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
    /// Serialises writers within this process.
    write_lock: Mutex<()>,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything published in `run_id`.
    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn blob_path(&self, run_id: RunId, artifact: &str) -> PathBuf {
        self.run_dir(run_id).join(BLOB_DIR).join(artifact)
    }

    fn index_path(&self, run_id: RunId, artifact: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(INDEX_DIR)
            .join(format!("{artifact}.json"))
    }

    fn read_ref(&self, run_id: RunId, artifact: &str) -> Result<Option<ArtifactRef>, ArtifactError> {
        let path = self.index_path(run_id, artifact);
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| storage(&path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage(&path, e)),
        }
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Storage(format!("{}: {err}", path.display()))
}

impl ArtifactStore for FileArtifactStore {
    fn publish(
        &self,
        run_id: RunId,
        producer: &str,
        artifact: &str,
        payload: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError> {
        check_name(artifact)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ArtifactError::Storage("file store lock poisoned".to_string()))?;

        let blob = self.blob_path(run_id, artifact);
        let staging = self.run_dir(run_id).join(STAGING_DIR).join(artifact);
        let index = self.index_path(run_id, artifact);
        for dir in [blob.parent(), staging.parent(), index.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).map_err(|e| storage(dir, e))?;
        }

        // Claim the name before touching the blob. `create_new` also guards
        // against another process racing us.
        let file = match OpenOptions::new().write(true).create_new(true).open(&index) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let producer = self
                    .read_ref(run_id, artifact)
                    .ok()
                    .flatten()
                    .map_or_else(|| "<publishing>".to_string(), |existing| existing.producer);
                return Err(ArtifactError::DuplicatePublish {
                    run_id,
                    artifact: artifact.to_string(),
                    producer,
                });
            }
            Err(e) => return Err(storage(&index, e)),
        };

        let reference = ArtifactRef {
            run_id,
            name: artifact.to_string(),
            producer: producer.to_string(),
            descriptor: ContentDescriptor::for_payload(&payload),
        };

        let written = fs::write(&staging, &payload)
            .and_then(|()| fs::rename(&staging, &blob))
            .map_err(|e| storage(&blob, e))
            .and_then(|()| {
                let mut writer = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, &reference)
                    .map_err(|e| storage(&index, e))?;
                writer.flush().map_err(|e| storage(&index, e))
            });
        if let Err(err) = written {
            // Release the claim; an empty index entry would block the name.
            let _ = fs::remove_file(&staging);
            let _ = fs::remove_file(&index);
            return Err(err);
        }

        debug!(
            run_id = %run_id,
            artifact,
            producer,
            size_bytes = reference.descriptor.size_bytes,
            path = %blob.display(),
            "published artifact (file)"
        );
        Ok(reference)
    }

    fn fetch(&self, run_id: RunId, artifact: &str) -> Result<Artifact, ArtifactError> {
        check_name(artifact)?;
        let Some(reference) = self.read_ref(run_id, artifact)? else {
            return Err(ArtifactError::NotFound {
                run_id,
                artifact: artifact.to_string(),
            });
        };

        let blob = self.blob_path(run_id, artifact);
        let payload = fs::read(&blob).map_err(|e| storage(&blob, e))?;
        if digest(&payload) != reference.descriptor.digest {
            return Err(storage(&blob, "payload digest does not match its descriptor"));
        }

        Ok(Artifact {
            name: reference.name,
            producer: reference.producer,
            payload,
            descriptor: reference.descriptor,
        })
    }

    fn list(&self, run_id: RunId) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let dir = self.run_dir(run_id).join(INDEX_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage(&dir, e)),
        };

        let mut refs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| storage(&dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| storage(&path, e))?;
            if bytes.is_empty() {
                continue;
            }
            let reference: ArtifactRef =
                serde_json::from_slice(&bytes).map_err(|e| storage(&path, e))?;
            refs.push(reference);
        }

        refs.sort_by(|a, b| {
            a.descriptor
                .published_at
                .cmp(&b.descriptor.published_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(refs)
    }

    fn finish_run(
        &self,
        run_id: RunId,
        succeeded: bool,
        retention: RetentionPolicy,
    ) -> Result<(), ArtifactError> {
        let dir = self.run_dir(run_id);
        if retention.keeps(succeeded) {
            info!(run_id = %run_id, path = %dir.display(), "retaining run artifacts");
            return Ok(());
        }

        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(run_id = %run_id, path = %dir.display(), "discarded run artifacts");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to discard run artifacts");
                Err(storage(&dir, e))
            }
        }
    }
}
