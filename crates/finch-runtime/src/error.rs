//! Runtime error types.

use finch_types::TransformError;

/// Errors surfaced by the isolated runner.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The worker process could not be started.
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the worker channel failed.
    #[error("worker channel i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The worker sent a line that is not a protocol message.
    #[error("malformed worker message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The worker sent a message only the parent may send.
    #[error("unexpected `{0}` message from worker")]
    UnexpectedMessage(&'static str),

    /// The worker reported a failure of the pipeline it was running.
    #[error("{0}")]
    Worker(TransformError),

    /// The worker exited with a non-graceful status.
    #[error("Fatal error in worker process, code: {}", describe_code(.code))]
    Exit { code: Option<i32> },
}

#[allow(clippy::ref_option)]
fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

impl RuntimeError {
    /// Exit code carried by an abnormal-exit error.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => *code,
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;
