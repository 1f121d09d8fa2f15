//! Launch one independent pipeline stream per definition file found at a
//! path, and in watch mode follow files as they appear, change, and vanish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

use crate::config::reader::{into_definition_list, is_definition_file, read_definitions};
use crate::error::PipelineError;
use crate::orchestrator::{Orchestrator, StreamOptions};
use crate::task_stream::TaskStream;
use crate::watch::{is_glob, watch, WatchEventKind, WatchOptions, WatchStream};

const OUTPUT_BUFFER: usize = 64;
const DEFINITION_PATTERNS: &[&str] = &["*.json", "*.yaml", "*.yml"];

/// Output of a definition file's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamItem {
    pub filename: PathBuf,
    pub value: Value,
}

pub type PathStream = TaskStream<Result<StreamItem, PipelineError>>;

#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Absolute glob, definition file, or directory of definition files.
    pub pathname: PathBuf,
    pub watch: bool,
    /// Default `continueOnError` for every stage.
    pub continue_on_error: Option<bool>,
}

impl StartOptions {
    pub fn new(pathname: impl Into<PathBuf>) -> Self {
        Self {
            pathname: pathname.into(),
            watch: false,
            continue_on_error: None,
        }
    }

    #[must_use]
    pub fn watching(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: Option<bool>) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// Patterns to watch for `pathname`, and whether it names a single file.
pub fn expand_pathname(pathname: &Path) -> (Vec<PathBuf>, bool) {
    if is_glob(&pathname.to_string_lossy()) {
        return (vec![pathname.to_path_buf()], false);
    }
    if is_definition_file(pathname) {
        return (vec![pathname.to_path_buf()], true);
    }
    let patterns = DEFINITION_PATTERNS
        .iter()
        .map(|pattern| pathname.join(pattern))
        .collect();
    (patterns, false)
}

/// Start streams for every definition file at `options.pathname`.
///
/// # Errors
///
/// Fails synchronously when the pathname is relative or the path to watch
/// does not exist.
pub fn start(orchestrator: &Orchestrator, options: StartOptions) -> Result<PathStream, PipelineError> {
    if !options.pathname.is_absolute() {
        return Err(PipelineError::InvalidOption(format!(
            "pathname must be absolute, got {}",
            options.pathname.display()
        )));
    }

    let (patterns, singular) = expand_pathname(&options.pathname);
    let kinds: &[WatchEventKind] = if options.watch {
        &[
            WatchEventKind::Add,
            WatchEventKind::Change,
            WatchEventKind::Unlink,
            WatchEventKind::Ready,
        ]
    } else {
        &[WatchEventKind::Add, WatchEventKind::Ready]
    };
    let files = watch(
        &patterns,
        WatchOptions::new(orchestrator.watch_settings()).only(kinds),
    )?;

    tracing::info!(
        pathname = %options.pathname.display(),
        watch = options.watch,
        singular,
        "Starting streams"
    );
    let launcher = Launcher {
        orchestrator: orchestrator.clone(),
        options,
        singular,
    };
    Ok(TaskStream::spawn("path", OUTPUT_BUFFER, move |tx| async move {
        launcher.supervise(files, tx).await;
    }))
}

struct Launcher {
    orchestrator: Orchestrator,
    options: StartOptions,
    singular: bool,
}

impl Launcher {
    async fn supervise(self, mut files: WatchStream, tx: mpsc::Sender<Result<StreamItem, PipelineError>>) {
        let mut instances = JoinSet::new();
        let mut running: HashMap<PathBuf, AbortHandle> = HashMap::new();
        let mut scanning = true;

        loop {
            tokio::select! {
                () = tx.closed() => return,
                event = files.next(), if scanning => {
                    let Some(event) = event else {
                        scanning = false;
                        continue;
                    };
                    match (event.kind, event.filename) {
                        (WatchEventKind::Ready, _) => {
                            tracing::debug!(files = running.len(), "Initial scan complete");
                            if !self.options.watch {
                                files.close();
                                scanning = false;
                            }
                        }
                        (WatchEventKind::Unlink, Some(filename)) => {
                            if let Some(instance) = running.remove(&filename) {
                                tracing::info!(file = %filename.display(), "Definition file removed, stopping its stream");
                                instance.abort();
                            }
                        }
                        (_, Some(filename)) => {
                            if let Some(previous) = running.remove(&filename) {
                                tracing::info!(file = %filename.display(), "Definition file changed, restarting its stream");
                                previous.abort();
                            }
                            let instance = instances.spawn(self.run_file(filename.clone(), tx.clone()));
                            running.insert(filename, instance);
                        }
                        (_, None) => {}
                    }
                }
                joined = instances.join_next(), if !instances.is_empty() => {
                    if let Some(Err(err)) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Stream instance panicked");
                        }
                    }
                    running.retain(|_, instance| !instance.is_finished());
                }
            }

            if !scanning && instances.is_empty() {
                return;
            }
        }
    }

    fn run_file(
        &self,
        filename: PathBuf,
        tx: mpsc::Sender<Result<StreamItem, PipelineError>>,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let orchestrator = self.orchestrator.clone();
        let options = self.options.clone();
        let singular = self.singular;
        async move {
            tracing::info!(file = %filename.display(), "Starting stream");
            let result = forward(&orchestrator, &options, &filename, &tx).await;
            let Err(err) = result else {
                tracing::debug!(file = %filename.display(), "Stream completed");
                return;
            };
            if options.watch {
                tracing::error!(
                    file = %filename.display(),
                    error = %err,
                    "Stream failed, will retry after the file changes"
                );
            } else if !singular {
                tracing::error!(file = %filename.display(), error = %err, "Stream failed, terminating it");
            } else {
                let _ = tx.send(Err(err)).await;
            }
        }
    }
}

/// Run the pipeline of one definition file, forwarding tagged outputs.
async fn forward(
    orchestrator: &Orchestrator,
    options: &StartOptions,
    filename: &Path,
    tx: &mpsc::Sender<Result<StreamItem, PipelineError>>,
) -> Result<(), PipelineError> {
    let path = filename.to_path_buf();
    let definitions =
        tokio::task::spawn_blocking(move || read_definitions(&path).map(into_definition_list))
            .await??;

    let mut stream = orchestrator.create_stream(StreamOptions {
        definitions,
        resolve_from: filename.parent().map(Path::to_path_buf),
        continue_on_error: options.continue_on_error,
        watch: options.watch,
        context: Some(json!({ "filename": filename.to_string_lossy() })),
    });

    while let Some(item) = stream.next().await {
        let value = item?;
        let tagged = StreamItem {
            filename: filename.to_path_buf(),
            value,
        };
        if tx.send(Ok(tagged)).await.is_err() {
            break;
        }
    }
    Ok(())
}
