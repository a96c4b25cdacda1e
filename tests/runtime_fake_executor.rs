// tests/runtime_fake_executor.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use pipedag::config::PipelineFile;
use pipedag::dag::Scheduler;
use pipedag::engine::{CoreRuntime, Runtime, RuntimeEvent};
use pipedag::run::RunLedger;
use pipedag::types::{RunId, RunStatus, SkipReason, TaskStatus};
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};
use pipedag_test_utils::fake_executor::FakeExecutor;
use pipedag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// A -> B, plus an independent C.
fn simple_chain_pipeline() -> PipelineFile {
    PipelineBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .with_task("B", TaskConfigBuilder::new("echo B").needs("A").build())
        .with_task("C", TaskConfigBuilder::new("echo C").build())
        .build()
}

fn core_for(pipeline: &PipelineFile, max_parallelism: usize) -> CoreRuntime {
    let run_id = RunId::new_v4();
    let scheduler = Scheduler::from_pipeline(pipeline, run_id, &BTreeMap::new(), max_parallelism);
    CoreRuntime::new(scheduler, RunLedger::new(run_id, pipeline.name()))
}

#[tokio::test]
async fn runtime_with_fake_executor_runs_simple_chain() -> TestResult {
    init_tracing();

    let pipeline = simple_chain_pipeline();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone());

    let runtime = Runtime::new(core_for(&pipeline, 4), rt_rx, executor);

    let core = match timeout(Duration::from_secs(3), runtime.run()).await {
        Ok(result) => result?,
        Err(_) => panic!("runtime did not finish within 3 seconds"),
    };

    let tasks_run = executed.lock().unwrap().clone();
    assert_eq!(tasks_run, vec!["A", "C", "B"]);

    let report = core.into_report(Vec::new());
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);

    Ok(())
}

#[tokio::test]
async fn runtime_with_fake_executor_skips_dependents_of_failure() -> TestResult {
    init_tracing();

    let pipeline = simple_chain_pipeline();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone()).failing("A", 2);
    let cancels = executor.cancel_requests();

    let runtime = Runtime::new(core_for(&pipeline, 1), rt_rx, executor);
    let core = timeout(Duration::from_secs(3), runtime.run()).await??;

    assert_eq!(executed.lock().unwrap().clone(), vec!["A", "C"]);
    assert_eq!(*cancels.lock().unwrap(), 0);

    let report = core.into_report(Vec::new());
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.task("A").unwrap().exit_code, Some(2));
    assert_eq!(
        report.status_of("B"),
        Some(&TaskStatus::Skipped {
            reason: SkipReason::UpstreamFailed { task: "A".into() }
        })
    );
    assert_eq!(report.failed_tasks, vec!["A"]);

    Ok(())
}

#[tokio::test]
async fn runtime_propagates_executor_errors() {
    init_tracing();

    let pipeline = simple_chain_pipeline();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    // Reporting into a closed channel makes every dispatch fail.
    let (dead_tx, _) = mpsc::channel::<RuntimeEvent>(16);
    let executor = FakeExecutor::new(dead_tx, executed);
    drop(rt_tx);

    let runtime = Runtime::new(core_for(&pipeline, 4), rt_rx, executor);
    let result = timeout(Duration::from_secs(3), runtime.run()).await;

    assert!(matches!(result, Ok(Err(_))));
}
