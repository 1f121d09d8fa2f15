//! Polling file watcher exposed as a stream of change events.
//!
//! A new or modified file is reported only once its size and modification
//! time have stayed the same for the stability threshold. Removals are
//! reported on the first poll that no longer sees the file.

mod target;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use self::target::{scan, FileStamp, Snapshot, WatchTarget};
pub(crate) use self::target::is_glob;

pub const DEFAULT_STABILITY_THRESHOLD: Duration = Duration::from_millis(2_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("at least one path must be watched")]
    NoPaths,

    #[error("watched path must be absolute: {}", .0.display())]
    NotAbsolute(PathBuf),

    #[error("watched path does not exist: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("invalid watch pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("watcher stopped unexpectedly")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
    /// All pre-existing matches have been reported.
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Absent for `Ready`.
    pub filename: Option<PathBuf>,
}

impl WatchEvent {
    fn file(kind: WatchEventKind, filename: PathBuf) -> Self {
        Self {
            kind,
            filename: Some(filename),
        }
    }

    /// Whether the file this event names exists after the event.
    pub fn present(&self) -> bool {
        matches!(self.kind, WatchEventKind::Add | WatchEventKind::Change)
    }
}

/// Polling behavior shared by every watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub stability_threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub settings: WatchSettings,
    pub add: bool,
    pub change: bool,
    pub unlink: bool,
    pub ready: bool,
    /// Do not report files that already exist when watching starts.
    pub ignore_initial: bool,
}

impl WatchOptions {
    /// Report add, change, and unlink events, but not ready.
    pub fn new(settings: WatchSettings) -> Self {
        Self {
            settings,
            add: true,
            change: true,
            unlink: true,
            ready: false,
            ignore_initial: false,
        }
    }

    /// Report only the listed kinds.
    #[must_use]
    pub fn only(mut self, kinds: &[WatchEventKind]) -> Self {
        self.add = kinds.contains(&WatchEventKind::Add);
        self.change = kinds.contains(&WatchEventKind::Change);
        self.unlink = kinds.contains(&WatchEventKind::Unlink);
        self.ready = kinds.contains(&WatchEventKind::Ready);
        self
    }

    #[must_use]
    pub fn ignore_initial(mut self) -> Self {
        self.ignore_initial = true;
        self
    }

    fn reports(&self, kind: WatchEventKind) -> bool {
        match kind {
            WatchEventKind::Add => self.add,
            WatchEventKind::Change => self.change,
            WatchEventKind::Unlink => self.unlink,
            WatchEventKind::Ready => self.ready,
        }
    }
}

/// Start watching `pathnames`, each an absolute file, directory, or glob.
///
/// # Errors
///
/// Fails synchronously when no path is given, a path is relative, a literal
/// path or the base directory of a glob does not exist, or a glob is invalid.
pub fn watch(pathnames: &[PathBuf], options: WatchOptions) -> Result<WatchStream, WatchError> {
    if pathnames.is_empty() {
        return Err(WatchError::NoPaths);
    }
    let targets = pathnames
        .iter()
        .map(|p| WatchTarget::parse(p))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(paths = ?pathnames, "Watching");
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(poll_loop(Arc::new(targets), options, tx));
    Ok(WatchStream {
        rx,
        task: Some(task),
    })
}

/// Resolve once every file in `paths` has been modified (or re-created) after
/// the call. A removed file must reappear before the wait can end.
///
/// # Errors
///
/// Setup failures from [`watch`], or [`WatchError::Stopped`] if the watcher
/// ends early.
pub async fn await_first_change(paths: &[PathBuf], settings: WatchSettings) -> Result<(), WatchError> {
    let mut events = watch(paths, WatchOptions::new(settings).ignore_initial())?;
    let mut missing: Vec<PathBuf> = Vec::new();

    while let Some(event) = events.next().await {
        let Some(filename) = event.filename.clone() else {
            continue;
        };
        if event.present() {
            missing.retain(|p| p != &filename);
            if missing.is_empty() {
                tracing::debug!(file = %filename.display(), "Change detected");
                return Ok(());
            }
        } else if !missing.contains(&filename) {
            missing.push(filename);
        }
    }
    Err(WatchError::Stopped)
}

#[derive(Debug)]
struct PendingChange {
    stamp: FileStamp,
    since: Instant,
}

async fn poll_loop(
    targets: Arc<Vec<WatchTarget>>,
    options: WatchOptions,
    tx: mpsc::UnboundedSender<WatchEvent>,
) {
    let Some(mut known) = snapshot(&targets).await else {
        return;
    };

    if !options.ignore_initial && options.add {
        for path in known.keys() {
            if tx.send(WatchEvent::file(WatchEventKind::Add, path.clone())).is_err() {
                return;
            }
        }
    }
    if options.ready
        && tx
            .send(WatchEvent {
                kind: WatchEventKind::Ready,
                filename: None,
            })
            .is_err()
    {
        return;
    }

    let mut pending: BTreeMap<PathBuf, PendingChange> = BTreeMap::new();
    let mut ticker = tokio::time::interval(options.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = tx.closed() => return,
            _ = ticker.tick() => {}
        }
        let Some(current) = snapshot(&targets).await else {
            return;
        };
        let now = Instant::now();
        let mut events = Vec::new();

        known.retain(|path, _| {
            let still_there = current.contains_key(path);
            if !still_there {
                events.push(WatchEvent::file(WatchEventKind::Unlink, path.clone()));
            }
            still_there
        });
        pending.retain(|path, _| current.contains_key(path));

        for (path, stamp) in current {
            if known.get(&path) == Some(&stamp) {
                pending.remove(&path);
                continue;
            }
            let kind = if known.contains_key(&path) {
                WatchEventKind::Change
            } else {
                WatchEventKind::Add
            };
            let stable = match pending.get_mut(&path) {
                Some(change) if change.stamp == stamp => {
                    now.duration_since(change.since) >= options.settings.stability_threshold
                }
                Some(change) => {
                    change.stamp = stamp;
                    change.since = now;
                    options.settings.stability_threshold.is_zero()
                }
                None => {
                    pending.insert(path.clone(), PendingChange { stamp, since: now });
                    options.settings.stability_threshold.is_zero()
                }
            };
            if stable {
                pending.remove(&path);
                known.insert(path.clone(), stamp);
                events.push(WatchEvent::file(kind, path));
            }
        }

        for event in events {
            if options.reports(event.kind) && tx.send(event).is_err() {
                return;
            }
        }
    }
}

async fn snapshot(targets: &Arc<Vec<WatchTarget>>) -> Option<Snapshot> {
    let targets = Arc::clone(targets);
    match tokio::task::spawn_blocking(move || scan(&targets)).await {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::error!(error = %err, "Watcher scan failed");
            None
        }
    }
}

/// Stream of [`WatchEvent`]s. Closing or dropping it stops the watcher.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl WatchStream {
    /// Stop watching. Returns `false` if the watcher was already closed.
    pub fn close(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        task.abort();
        self.rx.close();
        tracing::debug!("Watcher closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.task.is_none() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.close();
    }
}
