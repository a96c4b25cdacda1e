//! Shared fixtures for the `pipedag` test suites: pipeline builders, a
//! scripted collaborator and a fake executor backend.

pub mod builders;
pub mod fake_collaborator;
pub mod fake_executor;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Route engine records (task, run_id, attempt) into the test harness
/// output, once per test binary.
///
/// Records are captured with the test, so they show up next to a failing
/// assertion. `PIPEDAG_TEST_LOG=pipedag::engine=debug` narrows them.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("PIPEDAG_TEST_LOG")
            .unwrap_or_else(|_| EnvFilter::new("pipedag=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Bound a run so a scheduling bug fails the test instead of hanging it.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("run did not finish within 5 seconds")
}
