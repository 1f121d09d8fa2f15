use finch_engine::register_pipeline_factory;
use finch_runtime::{serve_stdio, FactoryRegistry};

/// Execute the hidden `worker` command: serve one pipeline session on
/// stdin/stdout and return the process exit code.
pub async fn execute() -> i32 {
    let mut factories = FactoryRegistry::new();
    register_pipeline_factory(&mut factories, finch_transforms::builtins());
    tracing::debug!(pid = std::process::id(), "Worker started");
    serve_stdio(&factories).await
}
