//! Stream orchestration: resolve definitions, run the pipeline in a worker
//! process, and in watch mode restart it whenever a dependency changes.

use std::path::PathBuf;
use std::time::Duration;

use finch_runtime::{ProcessOptions, SpawnEnv, WorkerCommand, WorkerStream};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::settings::EngineSettings;
use crate::error::PipelineError;
use crate::pipeline::{PipelineArgs, PIPELINE_FACTORY};
use crate::registry::TransformRegistry;
use crate::resolve::{ResolvedPipeline, Resolver};
use crate::task_stream::TaskStream;
use crate::watch::{await_first_change, WatchSettings};

const OUTPUT_BUFFER: usize = 64;

/// Values produced by a pipeline, ending with at most one error.
pub type PipelineStream = TaskStream<Result<Value, PipelineError>>;

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub definitions: Vec<Value>,
    /// Absolute directory relative references resolve from. Defaults to the
    /// current working directory.
    pub resolve_from: Option<PathBuf>,
    pub continue_on_error: Option<bool>,
    pub watch: bool,
    /// Passed to every transformation invocation.
    pub context: Option<Value>,
}

/// What to do once a supervised run is over.
enum Next {
    Reresolve,
    Stop,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    resolver: Resolver,
    worker: WorkerCommand,
    watch: WatchSettings,
    disconnect_grace: Duration,
}

impl Orchestrator {
    pub fn new(settings: &EngineSettings, registry: &TransformRegistry) -> Self {
        Self {
            resolver: Resolver::new(registry, settings.module_dirs.clone()),
            worker: settings.worker.clone(),
            watch: settings.watch,
            disconnect_grace: settings.disconnect_grace,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn watch_settings(&self) -> WatchSettings {
        self.watch
    }

    /// Start a pipeline stream.
    ///
    /// Without `watch`, or in watch mode when the resolved pipeline has no
    /// file dependencies, every error is delivered and ends the stream. In
    /// watch mode with dependencies, worker failures are logged and the
    /// stream waits for a dependency to change before re-resolving. Resolution
    /// and watch setup failures always end the stream.
    pub fn create_stream(&self, options: StreamOptions) -> PipelineStream {
        let orchestrator = self.clone();
        TaskStream::spawn("pipeline", OUTPUT_BUFFER, move |tx| async move {
            orchestrator.drive(options, tx).await;
        })
    }

    async fn drive(self, options: StreamOptions, tx: mpsc::Sender<Result<Value, PipelineError>>) {
        loop {
            let resolved = match self.resolve(&options).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to resolve pipeline");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            let ResolvedPipeline {
                definitions,
                dependencies,
            } = resolved;
            let fault_tolerant = options.watch && !dependencies.is_empty();
            tracing::info!(
                stages = definitions.len(),
                dependencies = dependencies.len(),
                watch = options.watch,
                "Resolved pipeline"
            );

            let worker = if definitions.is_empty() {
                None
            } else {
                match self.spawn_worker(definitions, options.context.clone()) {
                    Ok(worker) => Some(worker),
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            };

            if !fault_tolerant {
                if let Some(worker) = worker {
                    relay(worker, &tx).await;
                }
                return;
            }

            match self.supervise(worker, &dependencies, &tx).await {
                Next::Reresolve => {}
                Next::Stop => return,
            }
        }
    }

    async fn resolve(&self, options: &StreamOptions) -> Result<ResolvedPipeline, PipelineError> {
        let resolver = self.resolver.clone();
        let definitions = options.definitions.clone();
        let resolve_from = options.resolve_from.clone();
        let continue_on_error = options.continue_on_error;
        tokio::task::spawn_blocking(move || {
            resolver.resolve(&definitions, resolve_from.as_deref(), continue_on_error)
        })
        .await?
    }

    fn spawn_worker(
        &self,
        definitions: Vec<finch_types::StageDefinition>,
        context: Option<Value>,
    ) -> Result<WorkerStream, PipelineError> {
        let args = PipelineArgs {
            definitions,
            context,
        }
        .into_setup_args()
        .map_err(|e| PipelineError::Compile {
            definition: PIPELINE_FACTORY.to_owned(),
            reason: e.to_string(),
        })?;
        let process = ProcessOptions::new(self.worker.clone(), SpawnEnv::capture())
            .with_disconnect_grace(self.disconnect_grace);
        let worker = finch_runtime::run(PIPELINE_FACTORY, args, &process);
        tracing::debug!(pid = ?worker.pid(), "Started pipeline worker");
        Ok(worker)
    }

    /// Relay worker output until a dependency changes. Worker failures are
    /// logged, not delivered.
    async fn supervise(
        &self,
        mut worker: Option<WorkerStream>,
        dependencies: &[PathBuf],
        tx: &mpsc::Sender<Result<Value, PipelineError>>,
    ) -> Next {
        let change = await_first_change(dependencies, self.watch);
        tokio::pin!(change);

        loop {
            tokio::select! {
                () = tx.closed() => return Next::Stop,
                changed = &mut change => {
                    return match changed {
                        Ok(()) => {
                            tracing::info!("Dependency changed, re-resolving pipeline");
                            Next::Reresolve
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Failed to watch dependencies");
                            let _ = tx.send(Err(PipelineError::WatchSetup(err))).await;
                            Next::Stop
                        }
                    };
                }
                item = next_output(&mut worker) => match item {
                    Some(Ok(value)) => {
                        if tx.send(Ok(value)).await.is_err() {
                            return Next::Stop;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "Pipeline failed, waiting for a dependency to change");
                        worker = None;
                    }
                    None => {
                        tracing::debug!("Pipeline completed, waiting for a dependency to change");
                        worker = None;
                    }
                },
            }
        }
    }
}

async fn next_output(worker: &mut Option<WorkerStream>) -> Option<finch_runtime::Result<Value>> {
    match worker {
        Some(worker) => worker.next().await,
        None => std::future::pending().await,
    }
}

/// Relay worker output to completion; the first error ends the stream.
async fn relay(mut worker: WorkerStream, tx: &mpsc::Sender<Result<Value, PipelineError>>) {
    loop {
        let item = tokio::select! {
            () = tx.closed() => return,
            item = worker.next() => item,
        };
        match item {
            Some(Ok(value)) => {
                if tx.send(Ok(value)).await.is_err() {
                    return;
                }
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "Pipeline failed");
                let _ = tx.send(Err(PipelineError::Worker(err))).await;
                return;
            }
            None => {
                tracing::debug!("Pipeline completed");
                return;
            }
        }
    }
}
