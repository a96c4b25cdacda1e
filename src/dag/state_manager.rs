// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::dag::task_info::TaskInfo;
use crate::types::{SkipReason, TaskName, TaskStatus};

/// Tasks whose status changed while settling.
#[derive(Debug, Default)]
pub struct Settled {
    /// Newly `Ready`, in declaration order.
    pub ready: Vec<TaskName>,
    /// Newly `Skipped`.
    pub skipped: Vec<TaskName>,
}

enum Decision {
    Wait,
    Admit,
    Skipped,
}

/// Applies status transitions to the task table.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    tasks: &'a mut HashMap<TaskName, TaskInfo>,
    params: &'a BTreeMap<String, String>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DagGraph,
        tasks: &'a mut HashMap<TaskName, TaskInfo>,
        params: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            graph,
            tasks,
            params,
        }
    }

    /// Admit every task without dependencies.
    pub fn seed_roots(&mut self) -> Settled {
        let mut settled = Settled::default();
        let roots: Vec<TaskName> = self
            .graph
            .tasks()
            .filter(|name| {
                self.tasks
                    .get(*name)
                    .is_some_and(|t| t.pending_deps == 0 && t.status == TaskStatus::Pending)
            })
            .map(str::to_string)
            .collect();

        let mut gated = Vec::new();
        for root in roots {
            if self.admit(&root, &mut settled) {
                gated.push(root);
            }
        }

        for root in gated {
            let more = self.settle(&root);
            settled.ready.extend(more.ready);
            settled.skipped.extend(more.skipped);
        }

        self.sort_by_declaration(&mut settled.ready);
        settled
    }

    /// Propagate the terminal status of `finished` to its dependents.
    ///
    /// - Dependents of a failed or skipped task are skipped (transitively),
    ///   unless they are marked `always`.
    /// - Dependents whose last pending dependency just finished are admitted:
    ///   `Ready`, or `Skipped` if their gate condition does not hold.
    pub fn settle(&mut self, finished: &str) -> Settled {
        let mut settled = Settled::default();
        let mut stack: Vec<TaskName> = vec![finished.to_string()];

        while let Some(name) = stack.pop() {
            let Some(status) = self.tasks.get(&name).map(|t| t.status.clone()) else {
                warn!(task = %name, "node in DAG not present in tasks map");
                continue;
            };
            let skip_reason = status.skip_reason_for_dependents(&name);

            for dependent in self.graph.dependents_of(&name) {
                let decision = {
                    let Some(info) = self.tasks.get_mut(&dependent) else {
                        continue;
                    };
                    if info.status != TaskStatus::Pending {
                        continue;
                    }
                    info.pending_deps = info.pending_deps.saturating_sub(1);

                    match &skip_reason {
                        Some(reason) if !info.always => {
                            debug!(
                                task = %info.name,
                                upstream = %name,
                                %reason,
                                "skipping dependent"
                            );
                            info.status = TaskStatus::Skipped {
                                reason: reason.clone(),
                            };
                            Decision::Skipped
                        }
                        _ if info.pending_deps == 0 => Decision::Admit,
                        _ => Decision::Wait,
                    }
                };

                match decision {
                    Decision::Skipped => {
                        settled.skipped.push(dependent.clone());
                        stack.push(dependent);
                    }
                    Decision::Admit => {
                        if self.admit(&dependent, &mut settled) {
                            stack.push(dependent);
                        }
                    }
                    Decision::Wait => {}
                }
            }
        }

        self.sort_by_declaration(&mut settled.ready);
        settled
    }

    /// Mark every task that has not been dispatched as cancelled.
    pub fn cancel_undispatched(&mut self) -> Vec<TaskName> {
        let mut skipped = Vec::new();
        for name in self.graph.tasks() {
            if let Some(info) = self.tasks.get_mut(name) {
                if matches!(info.status, TaskStatus::Pending | TaskStatus::Ready) {
                    info.status = TaskStatus::Skipped {
                        reason: SkipReason::Cancelled,
                    };
                    skipped.push(info.name.clone());
                }
            }
        }
        skipped
    }

    /// All dependencies terminal; evaluate the gate. Returns `true` if the
    /// task was skipped (and therefore needs settling itself).
    fn admit(&mut self, name: &str, settled: &mut Settled) -> bool {
        let Some(info) = self.tasks.get_mut(name) else {
            return false;
        };

        match info.unmet_gate(self.params) {
            Some(condition) => {
                info!(task = %name, %condition, "gate condition not met; skipping task");
                info.status = TaskStatus::Skipped {
                    reason: SkipReason::Gated { condition },
                };
                settled.skipped.push(name.to_string());
                true
            }
            None => {
                debug!(task = %name, "dependencies satisfied; marking Ready");
                info.status = TaskStatus::Ready;
                settled.ready.push(name.to_string());
                false
            }
        }
    }

    fn sort_by_declaration(&self, names: &mut [TaskName]) {
        names.sort_by_key(|n| self.graph.position(n).unwrap_or(usize::MAX));
    }
}

/// Whether the task's dependencies allow it to run right now.
///
/// `always` tasks only need their dependencies to be terminal; everything
/// else needs them to have succeeded.
pub fn deps_satisfied(info: &TaskInfo, tasks: &HashMap<TaskName, TaskInfo>) -> bool {
    info.deps.iter().all(|dep_name| match tasks.get(dep_name) {
        Some(dep) if info.always => dep.status.is_terminal(),
        Some(dep) => dep.status.satisfies_dependents(),
        None => {
            warn!(
                task = %info.name,
                dep = %dep_name,
                "dependency missing from tasks map"
            );
            false
        }
    })
}
