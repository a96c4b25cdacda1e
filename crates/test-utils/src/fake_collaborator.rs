#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipedag::errors::InfrastructureError;
use pipedag::exec::{Collaborator, Execution, Invocation};

/// Scripted behaviour of one task.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    /// `None`: produce every declared output as `"<task>:<artifact>"`.
    pub outputs: Option<Vec<(String, Vec<u8>)>>,
    pub logs: Vec<String>,
    pub delay: Option<Duration>,
    /// Fail this many attempts with an infrastructure error first.
    pub infra_failures: u32,
    pub panic: bool,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn output(mut self, name: &str, payload: &[u8]) -> Self {
        self.outputs
            .get_or_insert_with(Vec::new)
            .push((name.to_string(), payload.to_vec()));
        self
    }

    pub fn no_outputs(mut self) -> Self {
        self.outputs = Some(Vec::new());
        self
    }

    pub fn log(mut self, line: &str) -> Self {
        self.logs.push(line.to_string());
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn infra_failures(mut self, n: u32) -> Self {
        self.infra_failures = n;
        self
    }

    pub fn panics(mut self) -> Self {
        self.panic = true;
        self
    }
}

/// One recorded collaborator call.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub task: String,
    pub command: String,
    pub attempt: u32,
    pub inputs: Vec<(String, Vec<u8>)>,
    pub secret_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    invocations: Vec<Recorded>,
    completed: Vec<String>,
    running: usize,
    peak: usize,
}

/// A collaborator whose behaviour per task is scripted up front.
///
/// Unscripted tasks succeed immediately and produce their declared outputs.
/// Tracks invocations, completions and peak concurrency.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCollaborator {
    scripts: HashMap<String, Script>,
    default_delay: Option<Duration>,
    state: Arc<Mutex<State>>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, task: &str, script: Script) -> Self {
        self.scripts.insert(task.to_string(), script);
        self
    }

    /// Delay applied to tasks without a scripted delay.
    pub fn default_delay_ms(mut self, ms: u64) -> Self {
        self.default_delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn invocations(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// Tasks invoked at least once, in first-invocation order.
    pub fn invoked_tasks(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for inv in self.invocations() {
            if !seen.contains(&inv.task) {
                seen.push(inv.task);
            }
        }
        seen
    }

    pub fn attempts(&self, task: &str) -> u32 {
        self.invocations()
            .iter()
            .filter(|inv| inv.task == task)
            .count() as u32
    }

    /// Tasks whose collaborator call ran to the end (not cancelled).
    pub fn completed(&self) -> Vec<String> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.lock().unwrap().peak
    }
}

/// Decrements the running counter even when the call is dropped.
struct RunningGuard(Arc<Mutex<State>>);

impl RunningGuard {
    fn enter(state: Arc<Mutex<State>>) -> Self {
        {
            let mut s = state.lock().unwrap();
            s.running += 1;
            s.peak = s.peak.max(s.running);
        }
        Self(state)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut s) = self.0.lock() {
            s.running -= 1;
        }
    }
}

impl Collaborator for ScriptedCollaborator {
    fn execute(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<Execution, InfrastructureError>> + Send + '_>> {
        let script = self.scripts.get(&invocation.task).cloned().unwrap_or_default();
        let delay = script.delay.or(self.default_delay);
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            state.lock().unwrap().invocations.push(Recorded {
                task: invocation.task.clone(),
                command: invocation.command.clone(),
                attempt: invocation.attempt,
                inputs: invocation
                    .inputs
                    .iter()
                    .map(|a| (a.name.clone(), a.payload.clone()))
                    .collect(),
                secret_keys: invocation.secrets.keys().map(str::to_string).collect(),
            });
            let _running = RunningGuard::enter(Arc::clone(&state));

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if invocation.attempt <= script.infra_failures {
                return Err(InfrastructureError::Spawn {
                    task: invocation.task.clone(),
                    source: std::io::Error::other("scripted infrastructure failure"),
                });
            }
            if script.panic {
                panic!("scripted panic in task {}", invocation.task);
            }

            let outputs = match script.outputs {
                Some(outputs) => outputs,
                None if script.exit_code == 0 => invocation
                    .outputs
                    .iter()
                    .map(|name| (name.clone(), format!("{}:{name}", invocation.task).into_bytes()))
                    .collect(),
                None => Vec::new(),
            };

            state.lock().unwrap().completed.push(invocation.task.clone());

            Ok(Execution {
                exit_code: Some(script.exit_code),
                outputs,
                logs: script.logs,
            })
        })
    }
}
