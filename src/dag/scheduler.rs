use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::config::model::PipelineFile;
use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{Settled, StateManager, deps_satisfied};
use crate::dag::task_info::{ScheduledTask, TaskInfo};
use crate::engine::TaskOutcome;
use crate::types::{RunId, RunStatus, TaskName, TaskStatus};

/// Scheduler holds the immutable DAG plus the mutable state of one run.
///
/// It is responsible for:
/// - keeping the ready-queue and deciding when a task is ready
///   (dependencies terminal and satisfied, gate condition met)
/// - dispatching at most `max_parallelism` tasks at a time
/// - recording outcomes and skipping dependents of failures
/// - stopping dispatch on cancellation
///
/// It does no IO and is driven by a single owner, which makes it the only
/// place the ready-queue and status table are mutated.
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    tasks: HashMap<TaskName, TaskInfo>,
    /// Parameter bag used to evaluate gate conditions.
    params: BTreeMap<String, String>,
    run_id: RunId,
    ready: VecDeque<TaskName>,
    running: usize,
    max_parallelism: usize,
    started: bool,
    cancelled: bool,
}

impl Scheduler {
    /// Construct a scheduler for one run of a validated pipeline.
    pub fn from_pipeline(
        pipeline: &PipelineFile,
        run_id: RunId,
        params: &BTreeMap<String, String>,
        max_parallelism: usize,
    ) -> Self {
        let tasks = pipeline
            .tasks()
            .map(|(name, cfg)| (name.clone(), TaskInfo::from_config(name.clone(), cfg, pipeline)))
            .collect();

        Self {
            graph: pipeline.graph().clone(),
            tasks,
            params: params.clone(),
            run_id,
            ready: VecDeque::new(),
            running: 0,
            max_parallelism: max_parallelism.max(1),
            started: false,
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Number of tasks currently dispatched to workers.
    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Task names in declaration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.graph.tasks()
    }

    pub fn status_of(&self, task: &str) -> Option<&TaskStatus> {
        self.tasks.get(task).map(|info| &info.status)
    }

    /// Every task's status, in declaration order.
    pub fn statuses(&self) -> Vec<(TaskName, TaskStatus)> {
        self.graph
            .tasks()
            .filter_map(|name| {
                self.tasks
                    .get(name)
                    .map(|info| (info.name.clone(), info.status.clone()))
            })
            .collect()
    }

    /// Whether the dependencies of `task` currently allow it to run.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let info = self.tasks.get(task)?;
        Some(deps_satisfied(info, &self.tasks))
    }

    /// Started and every task terminal.
    pub fn is_finished(&self) -> bool {
        self.started && self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn run_status(&self) -> RunStatus {
        if !self.started {
            RunStatus::Pending
        } else if !self.is_finished() {
            RunStatus::Running
        } else if self.tasks.values().any(|t| t.status.counts_as_failure()) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Tasks whose own execution failed, in declaration order.
    pub fn failed_tasks(&self) -> Vec<TaskName> {
        self.statuses()
            .into_iter()
            .filter(|(_, status)| *status == TaskStatus::Failed)
            .map(|(name, _)| name)
            .collect()
    }

    /// Seed the ready-queue with tasks that have no dependencies and
    /// dispatch the first wave.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(run_id = %self.run_id, "start called twice; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;
        info!(
            run_id = %self.run_id,
            tasks = self.tasks.len(),
            max_parallelism = self.max_parallelism,
            "scheduler: starting run"
        );

        let settled = self.manager().seed_roots();
        self.finish_step(settled)
    }

    /// Record the outcome of a running task and dispatch whatever became
    /// ready.
    pub fn handle_completion(&mut self, task: &str, outcome: &TaskOutcome) -> SchedulerStep {
        let best_effort = match self.tasks.get_mut(task) {
            Some(info) if info.status == TaskStatus::Running => {
                info.status = match outcome {
                    TaskOutcome::Success => TaskStatus::Succeeded,
                    TaskOutcome::Failed { .. } if info.best_effort => {
                        TaskStatus::SucceededWithWarnings
                    }
                    TaskOutcome::Failed { .. } | TaskOutcome::Cancelled => TaskStatus::Failed,
                };
                info.best_effort
            }
            Some(info) => {
                warn!(
                    task = %task,
                    status = %info.status,
                    "completion for task that is not running; ignoring"
                );
                return SchedulerStep::default();
            }
            None => {
                warn!(task = %task, "completion for unknown task; ignoring");
                return SchedulerStep::default();
            }
        };
        self.running = self.running.saturating_sub(1);

        match outcome {
            TaskOutcome::Success => {
                debug!(task = %task, run_id = %self.run_id, "task succeeded");
            }
            TaskOutcome::Failed { reason, .. } if best_effort => {
                warn!(
                    task = %task,
                    run_id = %self.run_id,
                    %reason,
                    "best-effort task failed; continuing with warnings"
                );
            }
            TaskOutcome::Failed { reason, .. } => {
                warn!(
                    task = %task,
                    run_id = %self.run_id,
                    %reason,
                    "task failed; skipping dependents in this run"
                );
            }
            TaskOutcome::Cancelled => {
                info!(task = %task, run_id = %self.run_id, "task cancelled");
            }
        }

        let settled = self.manager().settle(task);
        self.finish_step(settled)
    }

    /// Stop dispatching. Every task that has not been dispatched is skipped;
    /// running tasks keep running until their outcome is reported.
    pub fn cancel(&mut self) -> SchedulerStep {
        if self.cancelled {
            return SchedulerStep::default();
        }
        self.cancelled = true;
        self.started = true;
        self.ready.clear();

        let newly_skipped = self.manager().cancel_undispatched();
        info!(
            run_id = %self.run_id,
            skipped = newly_skipped.len(),
            running = self.running,
            "scheduler: run cancelled"
        );

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped,
            run_just_finished: self.is_finished(),
        }
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&self.graph, &mut self.tasks, &self.params)
    }

    fn finish_step(&mut self, settled: Settled) -> SchedulerStep {
        self.ready.extend(settled.ready);
        let newly_scheduled = self.dispatch();
        SchedulerStep {
            newly_scheduled,
            newly_skipped: settled.skipped,
            run_just_finished: self.is_finished(),
        }
    }

    /// Pop ready tasks while there is capacity and mark them `Running`.
    fn dispatch(&mut self) -> Vec<ScheduledTask> {
        let mut scheduled = Vec::new();
        if self.cancelled {
            return scheduled;
        }

        while self.running < self.max_parallelism {
            let Some(name) = self.ready.pop_front() else {
                break;
            };
            let Some(info) = self.tasks.get_mut(&name) else {
                continue;
            };
            if info.status != TaskStatus::Ready {
                continue;
            }

            info!(task = %info.name, run_id = %self.run_id, "dispatching task");
            info.status = TaskStatus::Running;
            self.running += 1;

            let Some(info) = self.tasks.get(&name) else {
                continue;
            };
            let task = ScheduledTask::from_task_info(info, &self.tasks, self.run_id);
            if !task.unavailable_inputs.is_empty() {
                warn!(
                    task = %task.name,
                    run_id = %self.run_id,
                    unavailable = ?task.unavailable_inputs,
                    "dispatching without inputs whose producer did not publish them"
                );
            }
            scheduled.push(task);
        }

        scheduled
    }
}
