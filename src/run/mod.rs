// src/run/mod.rs

//! One execution of a pipeline graph.
//!
//! A [`Run`] owns the artifact store for its id, the parameter and secret
//! bags, and the channel through which workers and cancellation requests
//! reach the runtime. [`Run::execute`] drives it to a terminal status and
//! returns a [`RunReport`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::artifacts::{ArtifactStore, MemoryArtifactStore};
use crate::config::PipelineFile;
use crate::dag::Scheduler;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::errors::{DefinitionError, Result};
use crate::exec::template::validate_templates;
use crate::exec::{Collaborator, ExecutorBackend, RealExecutorBackend, SecretBag, WorkerContext};
use crate::types::{RetentionPolicy, RunId};

pub mod ledger;
pub mod report;

pub use ledger::{RunLedger, TaskRecord};
pub use report::{RunReport, TaskReport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Requests cancellation of a run from outside the runtime.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl CancelHandle {
    /// Stop dispatching and terminate running tasks. Has no effect once the
    /// run is over.
    pub async fn cancel(&self) {
        if self.tx.send(RuntimeEvent::CancelRequested).await.is_err() {
            info!("cancel requested after the run finished; ignoring");
        }
    }
}

pub struct Run {
    id: RunId,
    pipeline: PipelineFile,
    params: BTreeMap<String, String>,
    secrets: SecretBag,
    store: Arc<dyn ArtifactStore>,
    max_parallelism: usize,
    retention: RetentionPolicy,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("pipeline", &self.pipeline.name())
            .field("params", &self.params)
            .field("secrets", &self.secrets)
            .field("store", &self.store)
            .field("max_parallelism", &self.max_parallelism)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl Run {
    /// Prepare a run of `pipeline`.
    ///
    /// `params` override the pipeline's `[params]` defaults. Every command
    /// template must resolve against the merged parameters and `secrets`.
    pub fn new(
        pipeline: PipelineFile,
        params: BTreeMap<String, String>,
        secrets: SecretBag,
    ) -> std::result::Result<Self, DefinitionError> {
        let mut merged = pipeline.params().clone();
        merged.extend(params);
        validate_templates(&pipeline, &merged, &secrets)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            id: RunId::new_v4(),
            max_parallelism: pipeline.max_parallelism(),
            retention: pipeline.section().retain_artifacts,
            params: merged,
            secrets,
            store: Arc::new(MemoryArtifactStore::new()),
            pipeline,
            event_tx,
            event_rx,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn pipeline(&self) -> &PipelineFile {
        &self.pipeline
    }

    /// Effective parameter bag (defaults merged with overrides).
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.store)
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.event_tx.clone(),
        }
    }

    /// Sender for runtime events; custom executor backends report through it.
    pub fn event_sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    /// Execute every task through `collaborator`.
    pub async fn execute(self, collaborator: Arc<dyn Collaborator>) -> Result<RunReport> {
        let context = Arc::new(WorkerContext {
            collaborator,
            store: Arc::clone(&self.store),
            params: self.params.clone(),
            secrets: self.secrets.clone(),
        });
        let backend = RealExecutorBackend::new(self.event_tx.clone(), context);
        self.execute_with_backend(backend).await
    }

    /// Execute with a custom backend.
    pub async fn execute_with_backend<E: ExecutorBackend>(self, backend: E) -> Result<RunReport> {
        let Run {
            id,
            pipeline,
            params,
            store,
            max_parallelism,
            retention,
            event_tx,
            event_rx,
            ..
        } = self;
        // Workers hold their own senders.
        drop(event_tx);

        info!(
            run_id = %id,
            pipeline = %pipeline.name(),
            tasks = pipeline.graph().len(),
            max_parallelism,
            "starting run"
        );

        let scheduler = Scheduler::from_pipeline(&pipeline, id, &params, max_parallelism);
        let core = CoreRuntime::new(scheduler, RunLedger::new(id, pipeline.name()));
        let core = Runtime::new(core, event_rx, backend).run().await?;

        let listing = Arc::clone(&store);
        let artifacts = tokio::task::spawn_blocking(move || listing.list(id))
            .await
            .map_err(anyhow::Error::from)??;

        let report = core.into_report(artifacts);
        info!(run_id = %id, status = %report.status, "run finished");

        let succeeded = report.succeeded();
        let retained = tokio::task::spawn_blocking(move || store.finish_run(id, succeeded, retention))
            .await
            .map_err(anyhow::Error::from)?;
        if let Err(err) = retained {
            warn!(run_id = %id, error = %err, "failed to apply artifact retention");
        }

        Ok(report)
    }
}
