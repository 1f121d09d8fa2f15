use std::time::Duration;

use finch_types::{Emission, Invocation, Transform, TransformInput};
use futures_util::{stream, StreamExt};
use serde_json::Value;

/// Source transformation: emits `params.values`, `params.times` times over,
/// waiting `params.delay` milliseconds between consecutive values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Values;

impl Transform for Values {
    fn invoke(&self, input: TransformInput) -> Invocation {
        let Some(values) = input.param("values").and_then(Value::as_array).cloned() else {
            let shown = input.param("values").map_or_else(|| "undefined".to_string(), Value::to_string);
            return Invocation::fail(format!("values: `{shown}` is not a list"));
        };
        let times = input.param("times").and_then(Value::as_u64).unwrap_or(1);
        let delay = input
            .param("delay")
            .and_then(Value::as_f64)
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::try_from_secs_f64(ms / 1_000.0).unwrap_or(Duration::MAX));

        let repeated = (0..times).flat_map(move |_| values.clone().into_iter());
        let outputs = stream::iter(repeated.enumerate()).then(move |(index, value)| async move {
            if let (Some(delay), true) = (delay, index > 0) {
                tokio::time::sleep(delay).await;
            }
            Ok(Emission::Value(value))
        });
        Invocation::stream(outputs)
    }
}
