//! Structural validation of stage definitions.
//!
//! Every error is collected, grouped by the offending location, and
//! de-duplicated so that callers see one entry per JSON pointer.

use std::sync::LazyLock;

use indexmap::IndexMap;
use jsonschema::error::ValidationErrorKind;
use serde::Serialize;
use serde_json::{json, Value};

/// Keywords that only describe schema branching and carry no useful message.
const STRUCTURAL_KEYWORDS: &[&str] = &["if", "else"];

static STAGE_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "use": { "type": "string", "minLength": 1 },
            "include": { "type": "string", "minLength": 1 },
            "ignore": { "type": "string", "minLength": 1 },
            "params": { "type": "object" },
            "retryCount": { "type": "integer", "minimum": 1 },
            "retryWait": { "type": "number", "minimum": 0 },
            "continueOnError": { "type": "boolean" }
        },
        "oneOf": [
            { "required": ["use"] },
            { "required": ["include"] },
            { "required": ["ignore"] }
        ],
        "additionalProperties": false
    })
});

static STAGE_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    jsonschema::validator_for(&STAGE_SCHEMA).expect("stage schema is a valid JSON Schema")
});

/// All distinct errors reported at one location of a candidate definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer into the candidate; empty for the root.
    pub pointer: String,
    pub errors: Vec<String>,
}

/// Validate one stage definition. Returns `None` when it is valid.
pub fn validate_stage(candidate: &Value) -> Option<Vec<SchemaViolation>> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();

    for error in STAGE_VALIDATOR.iter_errors(candidate) {
        let schema_path = error.schema_path.to_string();
        let keyword = schema_path.rsplit('/').next().unwrap_or_default();
        if STRUCTURAL_KEYWORDS.contains(&keyword) {
            continue;
        }

        let pointer = error.instance_path.to_string();
        let messages: Vec<String> = match &error.kind {
            ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
                .iter()
                .map(|name| format!("must not have additional property `{name}`"))
                .collect(),
            _ => vec![error.to_string()],
        };

        let entry = grouped.entry(pointer).or_default();
        for message in messages {
            if !entry.contains(&message) {
                entry.push(message);
            }
        }
    }

    if grouped.is_empty() {
        return None;
    }
    Some(
        grouped
            .into_iter()
            .map(|(pointer, errors)| SchemaViolation { pointer, errors })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violations(candidate: &Value) -> Vec<SchemaViolation> {
        validate_stage(candidate).expect("expected violations")
    }

    #[test]
    fn accepts_each_kind() {
        assert!(validate_stage(&json!({"use": "values"})).is_none());
        assert!(validate_stage(&json!({"include": "./a.json"})).is_none());
        assert!(validate_stage(&json!({"ignore": "log"})).is_none());
    }

    #[test]
    fn accepts_full_policy() {
        let stage = json!({
            "use": "./t.sh",
            "params": {"a": 1},
            "retryCount": 3,
            "retryWait": 0,
            "continueOnError": true
        });
        assert!(validate_stage(&stage).is_none());
    }

    #[test]
    fn rejects_missing_kind() {
        let found = violations(&json!({"params": {}}));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pointer, "");
    }

    #[test]
    fn rejects_two_kinds() {
        let found = violations(&json!({"use": "a", "include": "b"}));
        assert_eq!(found[0].pointer, "");
    }

    #[test]
    fn rejects_empty_name() {
        let found = violations(&json!({"use": ""}));
        assert!(found.iter().any(|v| v.pointer == "/use"));
    }

    #[test]
    fn rejects_zero_retry_count() {
        let found = violations(&json!({"use": "a", "retryCount": 0}));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pointer, "/retryCount");
    }

    #[test]
    fn rejects_negative_retry_wait_and_wrong_types() {
        let found = violations(&json!({
            "use": "a",
            "retryWait": -1,
            "continueOnError": "yes",
            "params": []
        }));
        let pointers: Vec<&str> = found.iter().map(|v| v.pointer.as_str()).collect();
        assert!(pointers.contains(&"/retryWait"));
        assert!(pointers.contains(&"/continueOnError"));
        assert!(pointers.contains(&"/params"));
    }

    #[test]
    fn additional_property_is_named() {
        let found = violations(&json!({"use": "a", "bogus": true}));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].errors, vec!["must not have additional property `bogus`"]);
    }

    #[test]
    fn rejects_non_object() {
        assert!(validate_stage(&json!("values")).is_some());
        assert!(validate_stage(&Value::Null).is_some());
    }

    #[test]
    fn messages_are_unique_per_pointer() {
        let found = violations(&json!({"use": 1, "include": 2}));
        for violation in &found {
            let mut sorted = violation.errors.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), violation.errors.len());
        }
    }
}
