// tests/retry_policy.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use pipedag::exec::SecretBag;
use pipedag::run::{Run, RunReport};
use pipedag::types::TaskStatus;
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};
use pipedag_test_utils::fake_collaborator::{Script, ScriptedCollaborator};
use pipedag_test_utils::{init_tracing, with_timeout};

async fn run_single(task: TaskConfigBuilder, script: Script) -> (RunReport, ScriptedCollaborator) {
    init_tracing();

    let collaborator = ScriptedCollaborator::new().script("job", script);
    let pipeline = PipelineBuilder::new().with_task("job", task.build()).build();
    let run = Run::new(pipeline, BTreeMap::new(), SecretBag::new()).unwrap();
    let report = with_timeout(run.execute(Arc::new(collaborator.clone())))
        .await
        .unwrap();
    (report, collaborator)
}

#[tokio::test]
async fn infrastructure_errors_are_retried_until_success() {
    let (report, collaborator) =
        run_single(TaskConfigBuilder::new("job").retries(2), Script::ok().infra_failures(2)).await;

    let job = report.task("job").unwrap();
    assert_eq!(job.status, TaskStatus::Succeeded);
    assert_eq!(job.attempts, 3);
    assert_eq!(collaborator.attempts("job"), 3);
    assert!(report.succeeded());
}

#[tokio::test]
async fn exhausted_retries_fail_the_task() {
    let (report, collaborator) =
        run_single(TaskConfigBuilder::new("job").retries(1), Script::ok().infra_failures(5)).await;

    let job = report.task("job").unwrap();
    assert_eq!(job.status, TaskStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.exit_code, None);
    assert!(job.error.as_deref().unwrap().contains("scripted infrastructure failure"));
    assert_eq!(collaborator.attempts("job"), 2);
}

#[tokio::test]
async fn non_zero_exit_is_not_retried() {
    let (report, collaborator) =
        run_single(TaskConfigBuilder::new("job").retries(3), Script::exit(7)).await;

    let job = report.task("job").unwrap();
    assert_eq!(job.status, TaskStatus::Failed);
    assert_eq!(job.exit_code, Some(7));
    assert_eq!(job.attempts, 1);
    assert_eq!(collaborator.attempts("job"), 1);
}

#[tokio::test]
async fn crashed_worker_counts_as_infrastructure_error() {
    let (report, collaborator) =
        run_single(TaskConfigBuilder::new("job").retries(1), Script::ok().panics()).await;

    let job = report.task("job").unwrap();
    assert_eq!(job.status, TaskStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("crashed"));
    assert_eq!(collaborator.attempts("job"), 2);
}

#[tokio::test]
async fn timeout_fails_without_retry() {
    let (report, collaborator) = run_single(
        TaskConfigBuilder::new("job").retries(2).timeout("100ms"),
        Script::ok().delay_ms(5_000),
    )
    .await;

    let job = report.task("job").unwrap();
    assert_eq!(job.status, TaskStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(collaborator.attempts("job"), 1);
    assert!(collaborator.completed().is_empty());
}
