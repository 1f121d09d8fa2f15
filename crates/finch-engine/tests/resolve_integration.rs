//! Resolver integration tests against fixture definition trees.

use std::path::{Path, PathBuf};

use finch_engine::{PipelineError, Resolver, TransformRegistry};
use finch_types::{Invocation, StageDefinition, StageKind, TransformInput};
use serde_json::json;

fn fixture(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(path)
}

fn resolver() -> Resolver {
    let mut registry = TransformRegistry::new();
    registry
        .register("values", |_: TransformInput| Invocation::empty())
        .register("json-stringify", |_: TransformInput| Invocation::empty());
    Resolver::new(&registry, Vec::new())
}

#[test]
fn test_resolve_nested_fixture() {
    let resolved = resolver()
        .resolve_file(&fixture("basic/pipeline.json"), None)
        .expect("fixture should resolve");

    let kinds: Vec<&StageKind> = resolved.definitions.iter().map(|d| &d.kind).collect();
    let double = fixture("basic/modules/double.sh");
    assert_eq!(
        kinds,
        vec![
            &StageKind::Use("values".into()),
            &StageKind::Use(double.to_string_lossy().into_owned()),
            &StageKind::Use("json-stringify".into()),
        ]
    );

    // The include's flag reaches nested stages unless they set their own.
    let flags: Vec<Option<bool>> = resolved.definitions.iter().map(|d| d.continue_on_error).collect();
    assert_eq!(flags, vec![None, Some(true), Some(false)]);

    assert_eq!(resolved.definitions[1].retry_count, Some(2));
    assert_eq!(resolved.definitions[1].retry_wait, Some(50.0));
    assert_eq!(resolved.definitions[0].params["values"], json!([1, 2, 3]));

    assert_eq!(
        resolved.dependencies,
        vec![
            fixture("basic/stages/transform.yaml"),
            double,
            fixture("basic/stages/tail.json"),
        ]
    );
}

#[test]
fn test_resolve_from_definitions_in_memory() {
    let resolved = resolver()
        .resolve(
            &[json!({"include": "./stages/tail.json"})],
            Some(&fixture("basic")),
            Some(true),
        )
        .unwrap();
    assert_eq!(
        resolved.definitions,
        vec![StageDefinition::use_module("json-stringify").with_continue_on_error(false)]
    );
}

#[test]
fn test_cycle_fixture_is_rejected() {
    let err = resolver()
        .resolve_file(&fixture("cycle/a.json"), None)
        .unwrap_err();
    match err {
        PipelineError::Cycle { chain } => {
            assert_eq!(chain.first(), chain.last());
            assert_eq!(chain.len(), 3);
        }
        other => panic!("expected a cycle error, got: {other}"),
    }
}

#[test]
fn test_invalid_fixture_reports_definition() {
    let err = resolver()
        .resolve_file(&fixture("invalid/pipeline.json"), None)
        .unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, PipelineError::Validation { .. }));
    assert!(msg.contains("bogus"), "message should name the property: {msg}");
}

#[test]
fn test_missing_include_reports_directory() {
    let err = resolver()
        .resolve_file(&fixture("missing/pipeline.yaml"), None)
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("cannot find ./nowhere.json"), "got: {msg}");
    assert!(msg.contains(&fixture("missing").display().to_string()), "got: {msg}");
}

#[test]
fn test_resolved_output_is_a_fixed_point() {
    let first = resolver()
        .resolve_file(&fixture("basic/pipeline.json"), None)
        .unwrap();
    let as_values: Vec<_> = first
        .definitions
        .iter()
        .map(|d| serde_json::to_value(d).unwrap())
        .collect();
    let second = resolver()
        .resolve(&as_values, Some(&fixture("basic")), None)
        .unwrap();
    assert_eq!(second.definitions, first.definitions);
}
