pub mod check;
pub mod start;
pub mod transforms;
pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use finch_engine::config::settings::default_module_dirs;
use finch_engine::{EngineSettings, WatchSettings};
use finch_runtime::WorkerCommand;

use crate::EngineArgs;

/// Build engine settings from flags, environment, and defaults.
pub(crate) fn engine_settings(args: &EngineArgs, log_level: &str) -> Result<EngineSettings> {
    let worker = WorkerCommand::current_exe("worker")
        .context("Failed to locate the finch executable")?
        .arg("--log-level")
        .arg(log_level);

    let mut settings = EngineSettings::new(worker).with_watch(WatchSettings {
        stability_threshold: Duration::from_millis(args.stability_threshold),
        poll_interval: Duration::from_millis(args.poll_interval.max(1)),
    });
    for dir in &args.module_dirs {
        settings = settings.with_module_dir(absolute(dir)?);
    }
    settings.module_dirs.extend(default_module_dirs());
    Ok(settings)
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .with_context(|| format!("Failed to resolve path: {}", path.display()))
}
