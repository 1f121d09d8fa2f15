//! Engine-wide settings, layered from defaults, environment, and CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use finch_runtime::{env::DEFAULT_DISCONNECT_GRACE, WorkerCommand};

use crate::watch::WatchSettings;

pub const MODULE_DIR_ENV: &str = "FINCH_MODULE_DIR";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub watch: WatchSettings,
    /// Directories searched, in order, for bare module names that are not
    /// built-in transformations.
    pub module_dirs: Vec<PathBuf>,
    /// Command that starts a pipeline worker process.
    pub worker: WorkerCommand,
    pub disconnect_grace: Duration,
}

impl EngineSettings {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            watch: WatchSettings::default(),
            module_dirs: Vec::new(),
            worker,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }

    #[must_use]
    pub fn with_watch(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dirs.push(dir.into());
        self
    }
}

/// Default module search path: `FINCH_MODULE_DIR`, then `~/.finch/modules`.
pub fn default_module_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = std::env::var_os(MODULE_DIR_ENV).filter(|d| !d.is_empty()) {
        dirs.push(PathBuf::from(dir));
    }
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        dirs.push(Path::new(&home).join(".finch").join("modules"));
    }
    dirs
}
