//! Parent side of isolated execution.
//!
//! [`run`] spawns a worker, sends it one `setup` message, and relays every
//! `next` message as a stream item. A worker `error` message, a channel
//! failure, or a non-zero exit ends the stream with an `Err`; a graceful
//! `next*` + exit 0 sequence ends it with `None`. The worker's stdout is read
//! to end-of-file before its exit status is consulted, so a failure the worker
//! reported is never lost to a racing exit, and it takes priority over the
//! exit code.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use finch_types::{Message, Setup};
use futures_util::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use crate::codec::write_message;
use crate::env::ProcessOptions;
use crate::error::{Result, RuntimeError};

const RELAY_CAPACITY: usize = 64;

/// Output of one worker session.
///
/// Dropping the stream, or calling [`WorkerStream::disconnect`], disconnects
/// the worker: its stdin is closed, it is given a grace period to exit, and
/// it is killed after that.
pub struct WorkerStream {
    rx: mpsc::Receiver<Result<Value>>,
    disconnect: Option<oneshot::Sender<()>>,
    pid: Option<u32>,
}

impl WorkerStream {
    /// OS process id of the worker, if it was spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Disconnect from the worker and stop relaying its output.
    ///
    /// Returns `false` when the worker was already disconnected.
    pub fn disconnect(&mut self) -> bool {
        let Some(signal) = self.disconnect.take() else {
            return false;
        };
        tracing::debug!(pid = self.pid, "Disconnecting from worker");
        let _ = signal.send(());
        self.rx.close();
        true
    }

    pub fn is_connected(&self) -> bool {
        self.disconnect.is_some()
    }
}

impl Stream for WorkerStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.disconnect.is_none() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for WorkerStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for WorkerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStream")
            .field("pid", &self.pid)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Spawn a worker running `factory(args)` and relay its output.
///
/// Must be called from within a tokio runtime. A spawn failure is reported as
/// the first (and only) item of the returned stream.
pub fn run(factory: impl Into<String>, args: Vec<Value>, options: &ProcessOptions) -> WorkerStream {
    let factory = factory.into();
    let (tx, rx) = mpsc::channel(RELAY_CAPACITY);
    let (disconnect_tx, disconnect_rx) = oneshot::channel();

    let mut command = Command::new(&options.command.program);
    command
        .args(&options.command.args)
        .env_clear()
        .envs(options.env.iter())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &options.current_dir {
        command.current_dir(dir);
    }

    let pid = match command.spawn() {
        Ok(child) => {
            let pid = child.id();
            tracing::debug!(pid, factory = factory.as_str(), "Spawned worker");
            let setup = Message::Setup(Setup { factory, args });
            tokio::spawn(relay(child, setup, tx, disconnect_rx, options.disconnect_grace));
            pid
        }
        Err(source) => {
            let err = RuntimeError::Spawn {
                program: options.command.program.display().to_string(),
                source,
            };
            tracing::error!("{err}");
            // The channel is fresh, so there is room for this single item.
            let _ = tx.try_send(Err(err));
            None
        }
    };

    WorkerStream {
        rx,
        disconnect: Some(disconnect_tx),
        pid,
    }
}

enum Relayed {
    /// Worker closed its stdout.
    EndOfOutput,
    /// Worker reported an error or the channel broke.
    Failed(RuntimeError),
    /// The consumer went away.
    Disconnected,
}

async fn relay(
    mut child: Child,
    setup: Message,
    tx: mpsc::Sender<Result<Value>>,
    mut disconnect_rx: oneshot::Receiver<()>,
    grace: Duration,
) {
    let pid = child.id();
    let mut stdin = child.stdin.take();
    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(Err(RuntimeError::Io(std::io::Error::other(
                "worker stdout is not piped",
            ))))
            .await;
        shutdown(child, stdin, grace).await;
        return;
    };

    if let Some(writer) = stdin.as_mut() {
        if let Err(err) = write_message(writer, &setup).await {
            let _ = tx.send(Err(RuntimeError::Io(err))).await;
            shutdown(child, stdin, grace).await;
            return;
        }
    }

    let mut lines = BufReader::new(stdout).lines();
    let relayed = loop {
        tokio::select! {
            biased;
            _ = &mut disconnect_rx => break Relayed::Disconnected,
            () = tx.closed() => break Relayed::Disconnected,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Message::decode(&line) {
                    Ok(Message::Next(value)) => {
                        if tx.send(Ok(value)).await.is_err() {
                            break Relayed::Disconnected;
                        }
                    }
                    Ok(Message::Error(err)) => break Relayed::Failed(RuntimeError::Worker(err)),
                    Ok(Message::Setup(_)) => {
                        break Relayed::Failed(RuntimeError::UnexpectedMessage("setup"));
                    }
                    Err(err) => break Relayed::Failed(RuntimeError::Protocol(err)),
                },
                Ok(None) => break Relayed::EndOfOutput,
                Err(err) => break Relayed::Failed(RuntimeError::Io(err)),
            },
        }
    };

    match relayed {
        Relayed::EndOfOutput => {
            tokio::select! {
                _ = &mut disconnect_rx => shutdown(child, stdin, grace).await,
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        tracing::debug!(pid, "Worker completed");
                    }
                    Ok(status) => {
                        let err = RuntimeError::Exit { code: status.code() };
                        tracing::warn!(pid, "{err}");
                        let _ = tx.send(Err(err)).await;
                    }
                    Err(err) => {
                        let _ = tx.send(Err(RuntimeError::Io(err))).await;
                    }
                },
            }
        }
        Relayed::Failed(err) => {
            tracing::warn!(pid, "Worker failed: {err}");
            let _ = tx.send(Err(err)).await;
            shutdown(child, stdin, grace).await;
        }
        Relayed::Disconnected => shutdown(child, stdin, grace).await,
    }
}

/// Close the worker's stdin, wait up to `grace` for it to exit, then kill it.
async fn shutdown(mut child: Child, stdin: Option<ChildStdin>, grace: Duration) {
    drop(stdin);
    let pid = child.id();
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(pid, code = status.code(), "Worker exited"),
        Ok(Err(err)) => tracing::warn!(pid, "Failed to await worker exit: {err}"),
        Err(_) => {
            tracing::warn!(pid, grace_ms = grace.as_millis(), "Worker ignored disconnect, killing");
            if let Err(err) = child.kill().await {
                tracing::warn!(pid, "Failed to kill worker: {err}");
            }
        }
    }
}
