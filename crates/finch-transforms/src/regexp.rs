//! Regular expression transformations over string values.

use std::borrow::Cow;

use finch_types::{Emission, Invocation, Transform, TransformError, TransformInput};
use futures_util::stream;
use serde_json::Value;

use crate::pattern::Pattern;

fn required_pattern(transform: &str, input: &TransformInput) -> Result<Pattern, TransformError> {
    let param = input
        .param("pattern")
        .ok_or_else(|| TransformError::new(format!("{transform}: `pattern` is required")))?;
    Pattern::from_param(transform, param)
}

fn string_value<'a>(transform: &str, value: &'a Value) -> Result<&'a str, TransformError> {
    value
        .as_str()
        .ok_or_else(|| TransformError::new(format!("{transform}: `{value}` is not a string")))
}

/// Text a pattern is tested against: strings as is, anything else as JSON.
fn subject(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

/// Replaces `params.pattern` matches in a string value with
/// `params.replacement`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexpReplace;

impl Transform for RegexpReplace {
    fn invoke(&self, input: TransformInput) -> Invocation {
        match replace(&input) {
            Ok(text) => Invocation::value(text),
            Err(err) => Invocation::fail(err),
        }
    }
}

fn replace(input: &TransformInput) -> Result<String, TransformError> {
    let pattern = required_pattern("regexp-replace", input)?;
    let replacement = input
        .param("replacement")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let text = string_value("regexp-replace", input.value())?;
    Ok(pattern.replace(text, replacement).into_owned())
}

/// Splits a string value on `params.pattern`, emitting each piece.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexpSplit;

impl Transform for RegexpSplit {
    fn invoke(&self, input: TransformInput) -> Invocation {
        let pieces = required_pattern("regexp-split", &input).and_then(|pattern| {
            let text = string_value("regexp-split", input.value())?;
            Ok(pattern
                .split(text)
                .map(|piece| Ok(Emission::Value(Value::from(piece))))
                .collect::<Vec<_>>())
        });
        match pieces {
            Ok(pieces) => Invocation::stream(stream::iter(pieces)),
            Err(err) => Invocation::fail(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Keep matching values.
    Accept,
    /// Drop matching values.
    Ignore,
}

impl FilterMode {
    fn name(self) -> &'static str {
        match self {
            Self::Accept => "regexp-accept",
            Self::Ignore => "regexp-ignore",
        }
    }
}

/// Keeps or drops values matching `params.pattern`, or the `params.any` /
/// `params.all` pattern lists. `pattern` takes precedence over the lists;
/// with both lists a value must match any of `any` and all of `all`.
#[derive(Debug, Clone, Copy)]
pub struct Filter {
    mode: FilterMode,
}

impl Filter {
    pub fn new(mode: FilterMode) -> Self {
        Self { mode }
    }

    fn matches(&self, input: &TransformInput) -> Result<bool, TransformError> {
        let name = self.mode.name();
        let text = subject(input.value());

        if let Some(pattern) = input.param("pattern") {
            return Ok(Pattern::from_param(name, pattern)?.is_match(&text));
        }

        let any = pattern_list(name, input.param("any"))?;
        let all = pattern_list(name, input.param("all"))?;
        let any_matches = || any.iter().any(|p| p.is_match(&text));
        let all_match = || all.iter().all(|p| p.is_match(&text));

        Ok(match (any.is_empty(), all.is_empty()) {
            (false, false) => any_matches() && all_match(),
            (false, true) => any_matches(),
            (true, false) => all_match(),
            (true, true) => false,
        })
    }
}

fn pattern_list(transform: &str, param: Option<&Value>) -> Result<Vec<Pattern>, TransformError> {
    match param {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Pattern::from_param(transform, item))
            .collect(),
        Some(other) => Err(TransformError::new(format!(
            "{transform}: `{other}` is not a list of patterns"
        ))),
    }
}

impl Transform for Filter {
    fn invoke(&self, input: TransformInput) -> Invocation {
        let matched = match self.matches(&input) {
            Ok(matched) => matched,
            Err(err) => return Invocation::fail(err),
        };
        let keep = match self.mode {
            FilterMode::Accept => matched,
            FilterMode::Ignore => !matched,
        };
        if keep {
            Invocation::value(input.value().clone())
        } else {
            Invocation::empty()
        }
    }
}
