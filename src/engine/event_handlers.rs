// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{error, info};

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{TaskExecution, TaskOutcome};
use crate::errors::ArtifactError;
use crate::run::RunLedger;
use crate::types::TaskName;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Ask the executor to terminate every running task.
    CancelRunning,
    /// Every task is terminal; the run is over.
    Finish,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
pub fn commands_for(step: SchedulerStep, ledger: &mut RunLedger) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_scheduled.is_empty() {
        for task in &step.newly_scheduled {
            ledger.record_dispatch(task);
        }
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }

    let keep_running = !step.run_just_finished;
    if step.run_just_finished {
        ledger.finish();
        commands.push(CoreCommand::Finish);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Handle the start of the run: dispatch the first wave.
pub fn handle_start(scheduler: &mut Scheduler, ledger: &mut RunLedger) -> CoreStep {
    ledger.start();
    let step = scheduler.start();
    commands_for(step, ledger)
}

/// Handle a task completion event.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    ledger: &mut RunLedger,
    task: TaskName,
    outcome: TaskOutcome,
    execution: TaskExecution,
) -> CoreStep {
    ledger.record_completion(&task, &outcome, execution);
    let step = scheduler.handle_completion(&task, &outcome);
    commands_for(step, ledger)
}

/// Handle an artifact contract violation: the offending task fails and the
/// rest of the run is cancelled.
pub fn handle_artifact_fault(
    scheduler: &mut Scheduler,
    ledger: &mut RunLedger,
    task: TaskName,
    fault: ArtifactError,
    execution: TaskExecution,
) -> CoreStep {
    error!(task = %task, error = %fault, "artifact fault; aborting run");

    let outcome = TaskOutcome::Failed {
        exit_code: None,
        reason: fault.to_string(),
    };
    ledger.record_fatal(fault.to_string());
    ledger.record_completion(&task, &outcome, execution);

    // Stop dispatch first so the failure cannot release new work.
    scheduler.cancel();
    let step = scheduler.handle_completion(&task, &outcome);

    let mut commands = Vec::new();
    if scheduler.running_count() > 0 {
        commands.push(CoreCommand::CancelRunning);
    }
    let mut rest = commands_for(step, ledger);
    commands.append(&mut rest.commands);

    CoreStep {
        commands,
        keep_running: rest.keep_running,
    }
}

/// Handle a run-level cancellation request.
pub fn handle_cancel(scheduler: &mut Scheduler, ledger: &mut RunLedger) -> CoreStep {
    if scheduler.is_finished() {
        return CoreStep {
            commands: Vec::new(),
            keep_running: false,
        };
    }

    info!(run_id = %scheduler.run_id(), "cancellation requested");
    ledger.mark_cancelled();
    let step = scheduler.cancel();

    let mut commands = Vec::new();
    if scheduler.running_count() > 0 {
        commands.push(CoreCommand::CancelRunning);
    }

    let mut rest = commands_for(step, ledger);
    commands.append(&mut rest.commands);

    CoreStep {
        commands,
        keep_running: rest.keep_running,
    }
}
