// tests/property_graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use proptest::prelude::*;
use pipedag::config::PipelineFile;
use pipedag::dag::Scheduler;
use pipedag::engine::TaskOutcome;
use pipedag::types::RunId;
use pipedag_test_utils::builders::{PipelineBuilder, TaskConfigBuilder};

/// Random acyclic pipelines: task N may only need tasks 0..N-1.
fn pipeline_strategy(max_tasks: usize) -> impl Strategy<Value = PipelineFile> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps = proptest::collection::vec(
            (proptest::collection::vec(any::<usize>(), 0..3), any::<bool>(), any::<bool>()),
            num_tasks,
        );
        deps.prop_map(|raw| {
            let mut builder = PipelineBuilder::new();
            for (i, (potential_deps, best_effort, always)) in raw.into_iter().enumerate() {
                let name = format!("task_{i}");
                let mut task = TaskConfigBuilder::new(&format!("echo {name}"));

                let picked: BTreeSet<usize> = if i == 0 {
                    BTreeSet::new()
                } else {
                    potential_deps.into_iter().map(|d| d % i).collect()
                };
                for dep in picked {
                    task = task.needs(&format!("task_{dep}"));
                }
                if best_effort {
                    task = task.best_effort();
                }
                if always {
                    task = task.always();
                }
                builder = builder.with_task(&name, task.build());
            }
            builder.build()
        })
    })
}

proptest! {
    #[test]
    fn batches_place_every_task_after_its_dependencies(pipeline in pipeline_strategy(12)) {
        let graph = pipeline.graph();
        let batches = graph.topological_batches().unwrap();

        let mut wave_of = HashMap::new();
        for (wave, batch) in batches.iter().enumerate() {
            for task in batch {
                prop_assert!(wave_of.insert(task.clone(), wave).is_none(), "{} placed twice", task);
            }
        }
        prop_assert_eq!(wave_of.len(), graph.len());

        for task in graph.tasks() {
            for dep in graph.dependencies_of(task) {
                prop_assert!(wave_of[dep] < wave_of[task], "{} placed before {}", task, dep);
            }
        }
    }

    #[test]
    fn scheduler_terminates_within_parallelism(
        pipeline in pipeline_strategy(12),
        max_parallelism in 1usize..4,
        failing in proptest::collection::btree_set(0usize..12, 0..4),
    ) {
        let mut scheduler =
            Scheduler::from_pipeline(&pipeline, RunId::new_v4(), &BTreeMap::new(), max_parallelism);
        let failing: BTreeSet<String> = failing.into_iter().map(|i| format!("task_{i}")).collect();

        let mut executing: Vec<String> = scheduler
            .start()
            .newly_scheduled
            .into_iter()
            .map(|t| t.name)
            .collect();

        let mut steps = 0;
        while !scheduler.is_finished() {
            steps += 1;
            prop_assert!(steps <= 1_000, "simulation did not terminate");
            prop_assert!(scheduler.running_count() <= max_parallelism);
            prop_assert_eq!(scheduler.running_count(), executing.len());
            prop_assert!(!executing.is_empty(), "run stalled with nothing running");

            let task = executing.remove(0);
            let outcome = if failing.contains(&task) {
                TaskOutcome::Failed { exit_code: Some(1), reason: "exit code 1".into() }
            } else {
                TaskOutcome::Success
            };
            let step = scheduler.handle_completion(&task, &outcome);
            executing.extend(step.newly_scheduled.into_iter().map(|t| t.name));
        }

        prop_assert!(executing.is_empty());
        for (task, status) in scheduler.statuses() {
            prop_assert!(status.is_terminal(), "{} left in {:?}", task, status);
        }
    }
}
