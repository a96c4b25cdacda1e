// tests/secrets_redaction.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use pipedag::exec::SecretBag;
use pipedag::run::Run;
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};
use pipedag_test_utils::fake_collaborator::{Script, ScriptedCollaborator};
use pipedag_test_utils::{init_tracing, with_timeout};

const TOKEN: &str = "tok-7f3a9c";

fn secrets() -> SecretBag {
    let mut secrets = SecretBag::new();
    secrets.insert("DEPLOY_TOKEN", TOKEN);
    secrets
}

fn pipeline() -> pipedag::config::PipelineFile {
    PipelineBuilder::new()
        .param("env", "staging")
        .with_task(
            "deploy",
            TaskConfigBuilder::new("deploy --env ${{ params.env }} --token ${{ secrets.DEPLOY_TOKEN }}")
                .build(),
        )
        .build()
}

#[tokio::test]
async fn collaborator_sees_real_values_but_logs_are_redacted() {
    init_tracing();

    let collaborator = ScriptedCollaborator::new().script(
        "deploy",
        Script::ok()
            .log(&format!("authenticating with {TOKEN}"))
            .log("deployed"),
    );
    let run = Run::new(pipeline(), BTreeMap::new(), secrets()).unwrap();

    let report = with_timeout(run.execute(Arc::new(collaborator.clone())))
        .await
        .unwrap();
    assert!(report.succeeded());

    let invocation = &collaborator.invocations()[0];
    assert_eq!(
        invocation.command,
        format!("deploy --env staging --token {TOKEN}")
    );
    assert_eq!(invocation.secret_keys, vec!["DEPLOY_TOKEN"]);

    let deploy = report.task("deploy").unwrap();
    assert_eq!(deploy.log_tail, vec!["authenticating with ***", "deployed"]);

    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains(TOKEN));
}

#[tokio::test]
async fn failing_task_logs_are_redacted_too() {
    init_tracing();

    let collaborator = ScriptedCollaborator::new().script(
        "deploy",
        Script::exit(1).log(&format!("401 for token {TOKEN}")),
    );
    let run = Run::new(pipeline(), BTreeMap::new(), secrets()).unwrap();

    let report = with_timeout(run.execute(Arc::new(collaborator)))
        .await
        .unwrap();

    assert!(!report.succeeded());
    let deploy = report.task("deploy").unwrap();
    assert_eq!(deploy.log_tail, vec!["401 for token ***"]);
    assert!(!report.summary().contains(TOKEN));
}

#[test]
fn run_debug_output_hides_secret_values() {
    let run = Run::new(pipeline(), BTreeMap::new(), secrets()).unwrap();
    let debug = format!("{run:?}");
    assert!(!debug.contains(TOKEN));
    assert!(debug.contains("DEPLOY_TOKEN"));
}

#[test]
fn params_cannot_stand_in_for_secrets() {
    let mut params = BTreeMap::new();
    params.insert("DEPLOY_TOKEN".to_string(), TOKEN.to_string());

    let err = Run::new(pipeline(), params, SecretBag::new()).unwrap_err();
    assert!(err.to_string().contains("DEPLOY_TOKEN"));
}
