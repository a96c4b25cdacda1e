// tests/artifact_handoff.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pipedag::artifacts::{
    Artifact, ArtifactRef, ArtifactStore, FileArtifactStore, MemoryArtifactStore,
};
use pipedag::errors::ArtifactError;
use pipedag::exec::SecretBag;
use pipedag::run::Run;
use pipedag::types::{RetentionPolicy, RunId, RunStatus, SkipReason, TaskStatus};
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder, ci_pipeline};
use pipedag_test_utils::fake_collaborator::{Script, ScriptedCollaborator};
use pipedag_test_utils::{init_tracing, with_timeout};

#[tokio::test]
async fn consumers_receive_exact_bytes() {
    init_tracing();

    let payload: Vec<u8> = (0..=255u8).rev().chain([0, 0, 10, 13]).collect();
    let collaborator = ScriptedCollaborator::new().script(
        "build",
        Script::ok()
            .output("image.tar", &payload)
            .output("coverage-base.txt", b"unused"),
    );
    let pipeline = PipelineBuilder::new()
        .with_task("build", TaskConfigBuilder::new("build").output("image.tar").build())
        .with_task("push", TaskConfigBuilder::new("push").needs("build").build())
        .build();
    let run = Run::new(pipeline, BTreeMap::new(), SecretBag::new()).unwrap();
    let store = run.store();
    let run_id = run.id();

    let report = with_timeout(run.execute(Arc::new(collaborator.clone())))
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let push = collaborator
        .invocations()
        .into_iter()
        .find(|inv| inv.task == "push")
        .unwrap();
    assert_eq!(push.inputs, vec![("image.tar".to_string(), payload.clone())]);

    // Undeclared outputs are not published.
    let names: Vec<_> = store.list(run_id).unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["image.tar"]);
    assert_eq!(store.fetch(run_id, "image.tar").unwrap().payload, payload);

    let build = report.task("build").unwrap();
    assert_eq!(build.artifacts.len(), 1);
    assert_eq!(build.artifacts[0].descriptor.size_bytes, payload.len() as u64);
}

#[tokio::test]
async fn final_artifact_set_is_union_of_successful_outputs() {
    init_tracing();

    let collaborator = ScriptedCollaborator::new()
        .script("c", Script::exit(1))
        .default_delay_ms(20);
    let pipeline = PipelineBuilder::new()
        .with_task("a", TaskConfigBuilder::new("a").output("a.bin").build())
        .with_task("b", TaskConfigBuilder::new("b").output("b.bin").build())
        .with_task("c", TaskConfigBuilder::new("c").output("c.bin").build())
        .with_task("d", TaskConfigBuilder::new("d").needs("a").output("d.bin").build())
        .build();
    let run = Run::new(pipeline, BTreeMap::new(), SecretBag::new()).unwrap();

    let report = with_timeout(run.execute(Arc::new(collaborator)))
        .await
        .unwrap();

    let names: BTreeSet<_> = report.artifacts.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, BTreeSet::from(["a.bin", "b.bin", "d.bin"]));
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_tasks, vec!["c".to_string()]);
}

#[tokio::test]
async fn missing_declared_output_fails_the_producer() {
    init_tracing();

    let collaborator = ScriptedCollaborator::new().script("build", Script::ok().no_outputs());
    let run = Run::new(ci_pipeline().build(), BTreeMap::new(), SecretBag::new()).unwrap();

    let report = with_timeout(run.execute(Arc::new(collaborator)))
        .await
        .unwrap();

    let build = report.task("build").unwrap();
    assert_eq!(build.status, TaskStatus::Failed);
    assert_eq!(build.exit_code, Some(0));
    assert!(build.error.as_deref().unwrap().contains("image.tar"));
    assert!(report.artifacts.is_empty());
    assert_eq!(report.status, RunStatus::Failed);
}

#[tokio::test]
async fn duplicate_publish_is_fatal_to_the_run() {
    init_tracing();

    let pipeline = PipelineBuilder::new()
        .with_task("build", TaskConfigBuilder::new("build").output("image.tar").build())
        .with_task("test", TaskConfigBuilder::new("test").needs("build").build())
        .build();
    let run = Run::new(pipeline, BTreeMap::new(), SecretBag::new()).unwrap();

    // Someone else already published the name in this run.
    run.store()
        .publish(run.id(), "intruder", "image.tar", b"stale".to_vec())
        .unwrap();

    let collaborator = ScriptedCollaborator::new();
    let report = with_timeout(run.execute(Arc::new(collaborator.clone())))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let fatal = report.fatal_error.as_deref().unwrap();
    assert!(fatal.contains("already published"), "{fatal}");
    assert!(fatal.contains("intruder"), "{fatal}");
    assert_eq!(report.status_of("build"), Some(&TaskStatus::Failed));
    assert_eq!(
        report.status_of("test"),
        Some(&TaskStatus::Skipped {
            reason: SkipReason::Cancelled
        })
    );
    assert_eq!(collaborator.invoked_tasks(), vec!["build"]);
}

#[tokio::test]
async fn file_store_retains_artifacts_of_failed_runs_only() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ArtifactStore> = Arc::new(FileArtifactStore::new(dir.path()));

    let pipeline = || {
        PipelineBuilder::new()
            .retain_artifacts(RetentionPolicy::OnFailure)
            .with_task("build", TaskConfigBuilder::new("build").output("image.tar").build())
            .with_task("test", TaskConfigBuilder::new("test").needs("build").build())
            .build()
    };

    let ok_run = Run::new(pipeline(), BTreeMap::new(), SecretBag::new())
        .unwrap()
        .with_store(Arc::clone(&store));
    let ok_id = ok_run.id();
    let report = with_timeout(ok_run.execute(Arc::new(ScriptedCollaborator::new())))
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.artifacts.len(), 1);
    assert!(!dir.path().join(ok_id.to_string()).exists());

    let failing = ScriptedCollaborator::new().script("test", Script::exit(1));
    let bad_run = Run::new(pipeline(), BTreeMap::new(), SecretBag::new())
        .unwrap()
        .with_store(Arc::clone(&store));
    let bad_id = bad_run.id();
    let report = with_timeout(bad_run.execute(Arc::new(failing)))
        .await
        .unwrap();
    assert!(!report.succeeded());
    assert_eq!(store.fetch(bad_id, "image.tar").unwrap().payload, b"build:image.tar");
}

#[tokio::test]
async fn memory_store_is_shared_across_runs_but_scoped_by_id() {
    init_tracing();

    let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let pipeline = PipelineBuilder::new()
        .with_task("build", TaskConfigBuilder::new("build").output("out").build())
        .build();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let run = Run::new(pipeline.clone(), BTreeMap::new(), SecretBag::new())
            .unwrap()
            .with_store(Arc::clone(&store));
        ids.push(run.id());
        let report = with_timeout(run.execute(Arc::new(ScriptedCollaborator::new())))
            .await
            .unwrap();
        assert!(report.succeeded());
    }

    assert_ne!(ids[0], ids[1]);
    for id in ids {
        assert_eq!(store.list(id).unwrap().len(), 1);
    }
}

/// Memory store whose n-th publish fails with a storage error.
#[derive(Debug)]
struct FlakyPublishStore {
    inner: MemoryArtifactStore,
    fail_on: usize,
    publishes: AtomicUsize,
}

impl ArtifactStore for FlakyPublishStore {
    fn publish(
        &self,
        run_id: RunId,
        producer: &str,
        artifact: &str,
        payload: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError> {
        if self.publishes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(ArtifactError::Storage("disk full".into()));
        }
        self.inner.publish(run_id, producer, artifact, payload)
    }

    fn fetch(&self, run_id: RunId, artifact: &str) -> Result<Artifact, ArtifactError> {
        self.inner.fetch(run_id, artifact)
    }

    fn list(&self, run_id: RunId) -> Result<Vec<ArtifactRef>, ArtifactError> {
        self.inner.list(run_id)
    }

    fn finish_run(
        &self,
        run_id: RunId,
        succeeded: bool,
        retention: RetentionPolicy,
    ) -> Result<(), ArtifactError> {
        self.inner.finish_run(run_id, succeeded, retention)
    }
}

#[tokio::test]
async fn storage_failure_midway_through_publishing_is_fatal_to_the_run() {
    init_tracing();

    let store = Arc::new(FlakyPublishStore {
        inner: MemoryArtifactStore::new(),
        fail_on: 2,
        publishes: AtomicUsize::new(0),
    });
    let pipeline = PipelineBuilder::new()
        .with_task(
            "build",
            TaskConfigBuilder::new("build")
                .output("image.tar")
                .output("sbom.json")
                .retries(3)
                .build(),
        )
        .with_task("test", TaskConfigBuilder::new("test").needs("build").build())
        .build();
    let run = Run::new(pipeline, BTreeMap::new(), SecretBag::new())
        .unwrap()
        .with_store(store.clone());
    let run_id = run.id();

    let collaborator = ScriptedCollaborator::new();
    let report = with_timeout(run.execute(Arc::new(collaborator.clone())))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let fatal = report.fatal_error.as_deref().unwrap();
    assert!(fatal.contains("disk full"), "{fatal}");
    assert_eq!(report.status_of("build"), Some(&TaskStatus::Failed));
    assert_eq!(
        report.status_of("test"),
        Some(&TaskStatus::Skipped {
            reason: SkipReason::Cancelled
        })
    );
    // Not retried, so the half-published output is never republished.
    assert_eq!(collaborator.attempts("build"), 1);
    assert_eq!(collaborator.invoked_tasks(), vec!["build"]);

    let names: Vec<_> = store.list(run_id).unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["image.tar"]);
}
