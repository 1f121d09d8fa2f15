//! Transformations backed by an executable module file.
//!
//! Each input runs the executable once. The input value is written to its
//! stdin as a single JSON line, the stage params are exposed through
//! `FINCH_PARAMS` and the invocation context through `FINCH_CONTEXT`. Every
//! non-blank stdout line is one JSON output. A nonzero exit is a failure that
//! carries the exit code and the module's stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use finch_types::{Emission, Invocation, Transform, TransformError, TransformInput};
use futures_util::{stream, StreamExt};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const PARAMS_ENV: &str = "FINCH_PARAMS";
pub const CONTEXT_ENV: &str = "FINCH_CONTEXT";

#[derive(Debug, Clone)]
pub struct ProcessTransform {
    program: PathBuf,
}

impl ProcessTransform {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Transform for ProcessTransform {
    fn invoke(&self, input: TransformInput) -> Invocation {
        let program = self.program.clone();
        let outputs = stream::once(run_module(program, input)).flat_map(|result| match result {
            Ok(values) => stream::iter(values.into_iter().map(|v| Ok(Emission::Value(v)))).left_stream(),
            Err(err) => stream::iter([Err(err)]).right_stream(),
        });
        Invocation::stream(outputs)
    }
}

async fn run_module(program: PathBuf, input: TransformInput) -> Result<Vec<Value>, TransformError> {
    let params = serde_json::to_string(&*input.params)
        .map_err(|e| TransformError::new(format!("cannot encode params: {e}")))?;
    let mut payload = serde_json::to_vec(&*input.value)
        .map_err(|e| TransformError::new(format!("cannot encode input: {e}")))?;
    payload.push(b'\n');

    let mut command = Command::new(&program);
    command
        .env(PARAMS_ENV, params)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(context) = &input.context {
        command.env(CONTEXT_ENV, context.to_string());
    }
    if let Some(dir) = program.parent() {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| {
        TransformError::new(format!("cannot start module {}: {e}", program.display()))
    })?;

    // Feed stdin concurrently so a chatty module cannot deadlock on a full pipe.
    let feeder = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(error = %e, "Module closed stdin before reading its input");
            }
        })
    });

    let output = child.wait_with_output().await.map_err(|e| {
        TransformError::new(format!("module {} failed: {e}", program.display()))
    })?;
    if let Some(feeder) = feeder {
        let _ = feeder.await;
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(TransformError::new(format!(
            "module {} exited with code {code}: {}",
            program.display(),
            stderr.trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                TransformError::new(format!(
                    "module {} wrote invalid JSON `{line}`: {e}",
                    program.display()
                ))
            })
        })
        .collect()
}
