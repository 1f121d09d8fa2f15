//! Pipeline error model and retry backoff helper.

use std::path::{Path, PathBuf};
use std::time::Duration;

use finch_runtime::RuntimeError;
use finch_types::TransformError;

use crate::config::reader::ReadError;
use crate::config::schema::SchemaViolation;
use crate::watch::WatchError;

const BACKOFF_MAX_MS: u64 = 60_000;

/// Categorized failure of a stream instance.
///
/// Validation, resolution, read, and cycle errors end the resolution attempt.
/// `Transformation` errors are governed by per-stage policy, `Worker` errors
/// by watch mode, and `WatchSetup` errors are always fatal.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage definition does not match the stage schema.
    #[error("{definition} is invalid: {}", render_violations(.violations))]
    Validation {
        definition: String,
        violations: Vec<SchemaViolation>,
    },

    /// An `include` file or `use` module could not be located.
    #[error("{definition} is invalid: cannot find {module}{}", render_from(.resolve_from.as_deref()))]
    Resolution {
        definition: String,
        module: String,
        resolve_from: Option<PathBuf>,
    },

    /// An `include` chain refers back to a file already being resolved.
    #[error("include cycle detected: {}", render_chain(.chain))]
    Cycle { chain: Vec<PathBuf> },

    /// A definition file could not be read or parsed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// A caller-supplied option is unusable.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A resolved stage could not be turned into a transformation.
    #[error("cannot compile {definition}: {reason}")]
    Compile { definition: String, reason: String },

    /// A stage's transformation failed after exhausting its retries.
    #[error("stage `{stage}` failed: {source}")]
    Transformation {
        stage: String,
        #[source]
        source: TransformError,
    },

    /// The worker process exited abnormally or its channel failed.
    #[error("worker failed: {0}")]
    Worker(#[from] RuntimeError),

    /// A watched path did not exist, or the watcher itself failed.
    #[error("watch failed: {0}")]
    WatchSetup(#[from] WatchError),

    /// A background task panicked or was cancelled unexpectedly.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn render_violations(violations: &[SchemaViolation]) -> String {
    serde_json::to_string(violations).unwrap_or_else(|_| format!("{violations:?}"))
}

fn render_from(resolve_from: Option<&Path>) -> String {
    resolve_from
        .map(|dir| format!(" from {}", dir.display()))
        .unwrap_or_default()
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Delay before retry `attempt` (1-based): `retry_wait * 2^(attempt - 1)`,
/// capped at 60 seconds.
pub(crate) fn compute_backoff(retry_wait: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(retry_wait.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// Initial retry delay for a `retryWait` given in milliseconds, clamped to the
/// backoff cap.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub(crate) fn retry_wait_from_millis(wait_ms: f64) -> Duration {
    Duration::from_millis(wait_ms.clamp(0.0, BACKOFF_MAX_MS as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_error_names_directory() {
        let err = PipelineError::Resolution {
            definition: r#"{"use":"./missing.sh"}"#.into(),
            module: "./missing.sh".into(),
            resolve_from: Some(PathBuf::from("/defs")),
        };
        let msg = err.to_string();
        assert!(msg.contains("cannot find ./missing.sh from /defs"), "got: {msg}");
    }

    #[test]
    fn validation_error_lists_violations() {
        let err = PipelineError::Validation {
            definition: "{}".into(),
            violations: vec![SchemaViolation {
                pointer: String::new(),
                errors: vec!["bad".into()],
            }],
        };
        assert!(err.to_string().contains("\"errors\":[\"bad\"]"));
    }

    #[test]
    fn worker_error_names_exit_code() {
        let err = PipelineError::Worker(RuntimeError::Exit { code: Some(1) });
        assert!(err.to_string().contains("code: 1"));
    }

    #[test]
    fn cycle_renders_chain() {
        let err = PipelineError::Cycle {
            chain: vec![PathBuf::from("/a.json"), PathBuf::from("/b.json"), PathBuf::from("/a.json")],
        };
        assert_eq!(
            err.to_string(),
            "include cycle detected: /a.json -> /b.json -> /a.json"
        );
    }

    #[test]
    fn backoff_doubles_from_retry_wait() {
        let wait = Duration::from_millis(100);
        assert_eq!(compute_backoff(wait, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(wait, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(wait, 3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_zero_wait_stays_zero() {
        assert_eq!(compute_backoff(Duration::ZERO, 5), Duration::ZERO);
    }

    #[test]
    fn backoff_capped_at_60s() {
        assert_eq!(
            compute_backoff(Duration::from_secs(1), 20),
            Duration::from_secs(60)
        );
        assert_eq!(compute_backoff(Duration::from_secs(1), u32::MAX), Duration::from_secs(60));
        assert_eq!(compute_backoff(Duration::ZERO, u32::MAX), Duration::ZERO);
    }

    #[test]
    fn retry_wait_is_clamped() {
        assert_eq!(retry_wait_from_millis(250.0), Duration::from_millis(250));
        assert_eq!(retry_wait_from_millis(1e300), Duration::from_secs(60));
        assert_eq!(retry_wait_from_millis(f64::MAX), Duration::from_secs(60));
        assert_eq!(retry_wait_from_millis(-5.0), Duration::ZERO);
    }
}
