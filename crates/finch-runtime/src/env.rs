//! Spawn-time process configuration.
//!
//! The environment a worker sees is an explicit [`SpawnEnv`] snapshot taken
//! when the worker is spawned. Later changes to the parent's environment are
//! only picked up by respawning.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a disconnected worker may take to exit before it is killed.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Immutable snapshot of environment variables handed to a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnEnv {
    vars: BTreeMap<OsString, OsString>,
}

impl SpawnEnv {
    /// Snapshot the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Program and arguments that start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The currently running executable re-invoked with `subcommand`.
    pub fn current_exe(subcommand: &str) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(subcommand))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Everything needed to spawn one worker.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub command: WorkerCommand,
    pub env: SpawnEnv,
    pub current_dir: Option<PathBuf>,
    pub disconnect_grace: Duration,
}

impl ProcessOptions {
    pub fn new(command: WorkerCommand, env: SpawnEnv) -> Self {
        Self {
            command,
            env,
            current_dir: None,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }

    #[must_use]
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }
}
