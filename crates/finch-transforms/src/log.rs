use finch_types::{Invocation, Transform, TransformInput};

/// Logs each value at info level and passes it through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log;

impl Transform for Log {
    fn invoke(&self, input: TransformInput) -> Invocation {
        match input.context.as_deref().and_then(|c| c.get("filename")) {
            Some(filename) => tracing::info!(%filename, value = %input.value(), "log"),
            None => tracing::info!(value = %input.value(), "log"),
        }
        Invocation::value(input.value().clone())
    }
}
