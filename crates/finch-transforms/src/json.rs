use finch_types::{Invocation, Transform, TransformError, TransformInput};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;

/// Emits the JSON text of each value. `params.space` pretty-prints with that
/// many spaces of indentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStringify;

impl Transform for JsonStringify {
    fn invoke(&self, input: TransformInput) -> Invocation {
        let space = input.param("space").and_then(Value::as_u64).unwrap_or(0);
        match stringify(input.value(), space) {
            Ok(text) => Invocation::value(text),
            Err(err) => Invocation::fail(err),
        }
    }
}

fn stringify(value: &Value, space: u64) -> Result<String, TransformError> {
    if space == 0 {
        return serde_json::to_string(value)
            .map_err(|e| TransformError::new(format!("json-stringify: {e}")));
    }
    let indent = " ".repeat(usize::try_from(space.min(10)).unwrap_or(10));
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|e| TransformError::new(format!("json-stringify: {e}")))?;
    String::from_utf8(out).map_err(|e| TransformError::new(format!("json-stringify: {e}")))
}
