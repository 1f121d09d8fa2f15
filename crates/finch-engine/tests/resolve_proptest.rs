use std::path::Path;

use finch_engine::{Resolver, TransformRegistry};
use finch_types::{Invocation, StageKind, TransformInput};
use proptest::prelude::*;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
enum Entry {
    Ignore(u8),
    Builtin(u8),
    /// Include a later file, by distance.
    Include(usize),
}

fn entry() -> impl Strategy<Value = Entry> {
    prop_oneof![
        any::<u8>().prop_map(Entry::Ignore),
        any::<u8>().prop_map(Entry::Builtin),
        (1_usize..4).prop_map(Entry::Include),
    ]
}

fn files() -> impl Strategy<Value = Vec<Vec<Entry>>> {
    prop::collection::vec(prop::collection::vec(entry(), 0..5), 1..6)
}

fn target(index: usize, offset: usize, count: usize) -> Option<usize> {
    let target = index + offset;
    (target < count).then_some(target)
}

fn to_definitions(index: usize, entries: &[Entry], count: usize) -> Vec<Value> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            Entry::Ignore(n) => Some(json!({"ignore": format!("stage-{n}")})),
            Entry::Builtin(n) => Some(json!({"use": "values", "params": {"n": n}})),
            Entry::Include(offset) => {
                target(index, *offset, count).map(|t| json!({"include": format!("./f{t}.json")}))
            }
        })
        .collect()
}

fn expected(index: usize, tree: &[Vec<Entry>], out: &mut Vec<Value>) {
    for entry in &tree[index] {
        match entry {
            Entry::Ignore(_) => {}
            Entry::Builtin(n) => out.push(json!(n)),
            Entry::Include(offset) => {
                if let Some(t) = target(index, *offset, tree.len()) {
                    expected(t, tree, out);
                }
            }
        }
    }
}

fn write_tree(dir: &Path, tree: &[Vec<Entry>]) {
    for (index, entries) in tree.iter().enumerate() {
        let content = Value::Array(to_definitions(index, entries, tree.len()));
        std::fs::write(dir.join(format!("f{index}.json")), content.to_string()).unwrap();
    }
}

fn resolver() -> Resolver {
    let mut registry = TransformRegistry::new();
    registry.register("values", |_: TransformInput| Invocation::empty());
    Resolver::new(&registry, Vec::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resolution_flattens_depth_first(tree in files()) {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &tree);

        let resolved = resolver()
            .resolve_file(&dir.path().join("f0.json"), None)
            .expect("acyclic tree must resolve");

        let mut want = Vec::new();
        expected(0, &tree, &mut want);
        let got: Vec<Value> = resolved.definitions.iter().map(|d| d.params["n"].clone()).collect();
        prop_assert_eq!(got, want);

        prop_assert!(resolved
            .definitions
            .iter()
            .all(|d| d.kind == StageKind::Use("values".into())));

        let mut unique = resolved.dependencies.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), resolved.dependencies.len());
        prop_assert!(resolved.dependencies.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn resolution_is_idempotent(tree in files(), continue_on_error in any::<Option<bool>>()) {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path(), &tree);

        let first = resolver()
            .resolve_file(&dir.path().join("f0.json"), continue_on_error)
            .unwrap();
        let again: Vec<Value> = first
            .definitions
            .iter()
            .map(|d| serde_json::to_value(d).unwrap())
            .collect();
        let second = resolver()
            .resolve(&again, Some(dir.path()), continue_on_error)
            .unwrap();

        prop_assert!(first
            .definitions
            .iter()
            .all(|d| d.continue_on_error == continue_on_error));
        prop_assert!(second.dependencies.is_empty());
        prop_assert_eq!(second.definitions, first.definitions);
    }
}
