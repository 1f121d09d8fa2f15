//! Child side of isolated execution.
//!
//! The worker reads one `setup` message from its input, looks the named
//! factory up in a [`FactoryRegistry`], and writes a `next` message for every
//! output. A failure is reported with an `error` message and exit code 1;
//! completion exits 0. End-of-file on the input means the parent disconnected:
//! the worker stops producing and writes nothing further.

use std::collections::BTreeMap;
use std::sync::Arc;

use finch_types::protocol::{FAILURE_EXIT, GRACEFUL_EXIT};
use finch_types::{Message, Setup, TransformError};
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot;

use crate::codec::write_message;

/// Outputs of a factory running inside a worker.
pub type OutputStream = BoxStream<'static, Result<Value, TransformError>>;

/// Builds an output stream from the `args` of a `setup` message.
pub type Factory = Arc<dyn Fn(Vec<Value>) -> Result<OutputStream, TransformError> + Send + Sync>;

/// Named factories a worker is able to run.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: BTreeMap<String, Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<OutputStream, TransformError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Serve one worker session on the process's stdin/stdout.
pub async fn serve_stdio(factories: &FactoryRegistry) -> i32 {
    serve(tokio::io::stdin(), tokio::io::stdout(), factories).await
}

/// Serve one worker session. Returns the exit code the worker should use.
pub async fn serve<R, W>(reader: R, mut writer: W, factories: &FactoryRegistry) -> i32
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let setup = match lines.next_line().await {
        Ok(Some(line)) => match Message::decode(&line) {
            Ok(Message::Setup(setup)) => setup,
            Ok(_) => {
                tracing::error!("Expected a setup message from the parent");
                return FAILURE_EXIT;
            }
            Err(err) => {
                tracing::error!("Malformed setup message: {err}");
                return FAILURE_EXIT;
            }
        },
        Ok(None) => {
            tracing::debug!("Parent disconnected before setup");
            return FAILURE_EXIT;
        }
        Err(err) => {
            tracing::error!("Failed to read setup message: {err}");
            return FAILURE_EXIT;
        }
    };

    let (disconnected_tx, mut disconnected) = oneshot::channel::<()>();
    tokio::spawn(async move {
        while let Ok(Some(_)) = lines.next_line().await {}
        let _ = disconnected_tx.send(());
    });

    let Setup { factory, args } = setup;
    tracing::debug!(factory = factory.as_str(), args = args.len(), "Worker setup");

    let outputs = match factories.get(&factory) {
        Some(build) => build(args),
        None => Err(TransformError::new(format!(
            "unknown worker factory `{factory}`"
        ))),
    };
    let mut outputs = match outputs {
        Ok(outputs) => outputs,
        Err(err) => return report_failure(&mut writer, err).await,
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut disconnected => {
                tracing::debug!("Parent disconnected, stopping");
                return GRACEFUL_EXIT;
            }
            item = outputs.next() => match item {
                Some(Ok(value)) => {
                    if let Err(err) = write_message(&mut writer, &Message::Next(value)).await {
                        tracing::debug!("Parent channel closed: {err}");
                        return GRACEFUL_EXIT;
                    }
                }
                Some(Err(err)) => return report_failure(&mut writer, err).await,
                None => return GRACEFUL_EXIT,
            },
        }
    }
}

async fn report_failure<W>(writer: &mut W, err: TransformError) -> i32
where
    W: AsyncWrite + Unpin,
{
    tracing::error!("Worker pipeline failed: {err}");
    if let Err(io) = write_message(writer, &Message::Error(err)).await {
        tracing::debug!("Could not report failure to parent: {io}");
    }
    FAILURE_EXIT
}
