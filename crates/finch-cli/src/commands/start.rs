use std::path::Path;

use anyhow::{Context, Result};
use finch_engine::{start, EngineSettings, Orchestrator, StartOptions};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::absolute;

/// Execute the `start` command: run every stream found at `pathname` and
/// print each output value as a line of JSON.
pub async fn execute(
    pathname: &Path,
    watch: bool,
    continue_on_error: Option<bool>,
    settings: &EngineSettings,
) -> Result<()> {
    let pathname = absolute(pathname)?;
    let registry = finch_transforms::builtins();
    let orchestrator = Orchestrator::new(settings, &registry);

    let options = StartOptions::new(&pathname)
        .watching(watch)
        .continue_on_error(continue_on_error);
    let mut stream = start(&orchestrator, options)
        .with_context(|| format!("Failed to start streams at {}", pathname.display()))?;

    let mut stdout = tokio::io::stdout();
    loop {
        let item = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping streams");
                stream.close();
                return Ok(());
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(item)) => {
                tracing::debug!(file = %item.filename.display(), "Output");
                let mut line = serde_json::to_string(&item.value)?;
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await?;
            }
            Some(Err(err)) => {
                stream.close();
                return Err(err).context("Stream failed");
            }
            None => {
                tracing::info!("Done");
                return Ok(());
            }
        }
    }
}
