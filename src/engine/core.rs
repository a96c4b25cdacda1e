// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - forwarding cancellation to running workers
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use crate::artifacts::ArtifactRef;
use crate::dag::Scheduler;
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_artifact_fault, handle_cancel, handle_start, handle_task_completion,
};
use crate::run::{RunLedger, RunReport};
use crate::types::RunId;

/// Pure core runtime state.
///
/// This owns:
/// - the DAG scheduler (task statuses, ready-queue)
/// - the run ledger (timings, attempts, errors)
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    ledger: RunLedger,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, ledger: RunLedger) -> Self {
        Self { scheduler, ledger }
    }

    pub fn run_id(&self) -> RunId {
        self.scheduler.run_id()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Whether every task is terminal.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Dispatch the first wave.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler, &mut self.ledger)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskCompleted {
                task,
                outcome,
                execution,
            } => handle_task_completion(
                &mut self.scheduler,
                &mut self.ledger,
                task,
                outcome,
                execution,
            ),
            RuntimeEvent::ArtifactFault {
                task,
                error,
                execution,
            } => handle_artifact_fault(
                &mut self.scheduler,
                &mut self.ledger,
                task,
                error,
                execution,
            ),
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler, &mut self.ledger),
        }
    }

    /// Build the structured report for the run.
    pub fn into_report(self, artifacts: Vec<ArtifactRef>) -> RunReport {
        RunReport::build(&self.scheduler, self.ledger, artifacts)
    }
}
