use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use finch_engine::launcher::expand_pathname;
use finch_engine::{watch, EngineSettings, Resolver, WatchEventKind, WatchOptions};
use futures_util::StreamExt;

use super::absolute;

/// Execute the `check` command: resolve every definition file found at
/// `pathname` and report its stages and dependencies.
pub async fn execute(pathname: &Path, settings: &EngineSettings) -> Result<()> {
    let pathname = absolute(pathname)?;
    let files = discover(&pathname, settings).await?;
    if files.is_empty() {
        println!("No definition files found at {}", pathname.display());
        return Ok(());
    }

    let registry = finch_transforms::builtins();
    let resolver = Resolver::new(&registry, settings.module_dirs.clone());

    let mut failed = 0_usize;
    for file in &files {
        let resolver = resolver.clone();
        let path = file.clone();
        let result = tokio::task::spawn_blocking(move || resolver.resolve_file(&path, None))
            .await
            .context("Resolution task failed")?;

        match result {
            Ok(resolved) => {
                println!(
                    "{}: OK ({} stages)",
                    file.display(),
                    resolved.definitions.len()
                );
                for dependency in &resolved.dependencies {
                    println!("  depends on {}", dependency.display());
                }
            }
            Err(err) => {
                failed += 1;
                println!("{}: FAILED", file.display());
                println!("  {err}");
            }
        }
    }

    if failed == 0 {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("{failed} of {} definition files failed", files.len())
    }
}

/// Definition files currently present at `pathname`.
async fn discover(pathname: &Path, settings: &EngineSettings) -> Result<Vec<PathBuf>> {
    let (patterns, _) = expand_pathname(pathname);
    let options = WatchOptions::new(settings.watch).only(&[WatchEventKind::Add, WatchEventKind::Ready]);
    let mut events = watch(&patterns, options)
        .with_context(|| format!("Failed to scan {}", pathname.display()))?;

    let mut files = Vec::new();
    while let Some(event) = events.next().await {
        match (event.kind, event.filename) {
            (WatchEventKind::Ready, _) => break,
            (_, Some(filename)) => files.push(filename),
            (_, None) => {}
        }
    }
    events.close();
    files.sort();
    Ok(files)
}
