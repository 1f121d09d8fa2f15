//! Compile resolved stage definitions into a chain of stream operators.
//!
//! Each stage maps every upstream value to a sub-stream of outputs and merges
//! the sub-streams without ordering guarantees. Retries re-invoke the
//! transformation for the failing input only. With `continueOnError` a
//! failure drops that input's sub-stream; otherwise it terminates the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use finch_types::{
    Emission, EmissionStream, StageDefinition, StageKind, Transform, TransformError, TransformInput,
};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use futures_util::future;
use serde_json::{Map, Value};

use crate::error::{compute_backoff, retry_wait_from_millis, PipelineError};
use crate::process::ProcessTransform;
use crate::registry::TransformRegistry;
use crate::resolve::is_path_reference;

pub type ValueStream = BoxStream<'static, Result<Value, PipelineError>>;

const DEFAULT_RETRY_WAIT_MS: f64 = 1_000.0;

/// Retry and error policy of a compiled stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePolicy {
    pub retry_count: u32,
    pub retry_wait: Duration,
    pub continue_on_error: bool,
}

impl StagePolicy {
    fn from_definition(definition: &StageDefinition) -> Self {
        let wait_ms = definition.retry_wait.unwrap_or(DEFAULT_RETRY_WAIT_MS);
        Self {
            retry_count: definition.retry_count.unwrap_or(0),
            retry_wait: retry_wait_from_millis(wait_ms),
            continue_on_error: definition.continue_on_error.unwrap_or(false),
        }
    }
}

/// One executable stage of a pipeline.
#[derive(Clone)]
pub struct CompiledStage {
    label: String,
    /// `None` for inert stages, which pass values through untouched.
    transform: Option<Arc<dyn Transform>>,
    params: Arc<Map<String, Value>>,
    policy: StagePolicy,
}

impl std::fmt::Debug for CompiledStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStage")
            .field("label", &self.label)
            .field("inert", &self.transform.is_none())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Compile one resolved definition.
///
/// # Errors
///
/// Fails for `include` stages (which must be resolved first) and for `use`
/// stages naming a module that is neither built in nor a file path.
pub fn compile(
    definition: &StageDefinition,
    registry: &TransformRegistry,
) -> Result<CompiledStage, PipelineError> {
    let label = definition.module_ref().to_owned();
    let policy = StagePolicy::from_definition(definition);
    let params = Arc::new(definition.params.clone());

    let transform: Option<Arc<dyn Transform>> = match &definition.kind {
        StageKind::Ignore(_) => None,
        StageKind::Include(_) => {
            return Err(PipelineError::Compile {
                definition: definition.to_json_string(),
                reason: "include stages must be resolved before compiling".into(),
            })
        }
        StageKind::Use(reference) => {
            if let Some(builtin) = registry.get(reference) {
                Some(builtin)
            } else if is_path_reference(reference) {
                Some(Arc::new(ProcessTransform::new(reference)))
            } else {
                return Err(PipelineError::Compile {
                    definition: definition.to_json_string(),
                    reason: format!("unknown module `{reference}`"),
                });
            }
        }
    };

    Ok(CompiledStage {
        label,
        transform,
        params,
        policy,
    })
}

/// Compile and compose a whole pipeline seeded with the start signal.
///
/// # Errors
///
/// The first definition that fails to compile.
pub fn compile_pipeline(
    definitions: &[StageDefinition],
    registry: &TransformRegistry,
    context: Option<Value>,
) -> Result<ValueStream, PipelineError> {
    let stages = definitions
        .iter()
        .map(|definition| compile(definition, registry))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(compose_pipeline(&stages, context))
}

/// Chain `stages` onto a source that emits the start signal (`null`) once.
pub fn compose_pipeline(stages: &[CompiledStage], context: Option<Value>) -> ValueStream {
    let context = context.map(Arc::new);
    let seed: ValueStream = stream::once(future::ready(Ok(Value::Null))).boxed();
    stages
        .iter()
        .fold(seed, |upstream, stage| stage.apply(upstream, context.clone()))
}

impl CompiledStage {
    pub fn policy(&self) -> StagePolicy {
        self.policy
    }

    pub fn is_inert(&self) -> bool {
        self.transform.is_none()
    }

    /// Apply this stage to every value of `upstream`.
    pub fn apply(&self, upstream: ValueStream, context: Option<Arc<Value>>) -> ValueStream {
        let Some(transform) = self.transform.clone() else {
            return upstream;
        };
        let stage = self.clone();
        let merged = upstream.flat_map_unordered(None, move |item| match item {
            Ok(value) => {
                let input = TransformInput::new(value, Arc::clone(&stage.params))
                    .with_context(context.clone());
                stage.outputs_for(Arc::clone(&transform), input)
            }
            Err(err) => stream::iter([Err(err)]).boxed(),
        });
        fuse_on_error(merged)
    }

    fn outputs_for(&self, transform: Arc<dyn Transform>, input: TransformInput) -> ValueStream {
        let label = self.label.clone();
        let continue_on_error = self.policy.continue_on_error;
        with_retries(transform, input, self.policy, label.clone())
            .filter_map(move |result| {
                future::ready(match result {
                    Ok(Emission::Value(value)) => Some(Ok(value)),
                    Ok(Emission::Empty) => None,
                    Err(source) if continue_on_error => {
                        tracing::warn!(stage = %label, error = %source, "Stage failed, continuing");
                        None
                    }
                    Err(source) => Some(Err(PipelineError::Transformation {
                        stage: label.clone(),
                        source,
                    })),
                })
            })
            .boxed()
    }
}

struct RetryState {
    transform: Arc<dyn Transform>,
    input: TransformInput,
    policy: StagePolicy,
    label: String,
    attempt: u32,
    current: Option<EmissionStream>,
    finished: bool,
}

/// Invoke `transform` for one input, re-invoking with exponential backoff
/// while retries remain. The final failure is emitted as an error item.
fn with_retries(
    transform: Arc<dyn Transform>,
    input: TransformInput,
    policy: StagePolicy,
    label: String,
) -> impl Stream<Item = Result<Emission, TransformError>> + Send {
    let state = RetryState {
        transform,
        input,
        policy,
        label,
        attempt: 0,
        current: None,
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            let outputs = state
                .current
                .get_or_insert_with(|| state.transform.invoke(state.input.clone()).into_stream());
            match outputs.next().await {
                Some(Ok(emission)) => return Some((Ok(emission), state)),
                Some(Err(err)) if state.attempt < state.policy.retry_count => {
                    state.attempt += 1;
                    let delay = compute_backoff(state.policy.retry_wait, state.attempt);
                    tracing::warn!(
                        stage = %state.label,
                        attempt = state.attempt,
                        max_retries = state.policy.retry_count,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Stage failed, retrying"
                    );
                    state.current = None;
                    tokio::time::sleep(delay).await;
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => return None,
            }
        }
    })
}

/// Pass items through until the first error, deliver it, then end without
/// polling `upstream` again.
fn fuse_on_error<S>(upstream: S) -> ValueStream
where
    S: Stream<Item = Result<Value, PipelineError>> + Send + 'static,
{
    stream::unfold((Box::pin(upstream), false), |(mut upstream, failed)| async move {
        if failed {
            return None;
        }
        let item = upstream.next().await?;
        let failed = item.is_err();
        Some((item, (upstream, failed)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use finch_types::Invocation;
    use serde_json::json;

    fn registry() -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        registry
            .register("values", |input: TransformInput| {
                let values = input.param("values").and_then(Value::as_array).cloned().unwrap_or_default();
                Invocation::stream(stream::iter(values.into_iter().map(|v| Ok(Emission::Value(v)))))
            })
            .register("times-ten", |input: TransformInput| {
                let n = input.value().as_i64().unwrap_or_default();
                Invocation::future(async move { Ok(Emission::Value(json!(n * 10))) })
            })
            .register("drop-odd", |input: TransformInput| {
                if input.value().as_i64().unwrap_or_default() % 2 == 1 {
                    Invocation::empty()
                } else {
                    Invocation::value(input.value().clone())
                }
            })
            .register("fail-on-two", |input: TransformInput| {
                if input.value() == &json!(2) {
                    Invocation::fail("two is not allowed")
                } else {
                    Invocation::value(input.value().clone())
                }
            })
            .register("context", |input: TransformInput| {
                Invocation::value(input.context.as_deref().cloned().unwrap_or(Value::Null))
            });
        registry
    }

    fn values(items: Value) -> StageDefinition {
        let mut params = Map::new();
        params.insert("values".into(), items);
        StageDefinition::use_module("values").with_params(params)
    }

    async fn collect(definitions: &[StageDefinition]) -> Vec<Result<Value, PipelineError>> {
        compile_pipeline(definitions, &registry(), None)
            .unwrap()
            .collect()
            .await
    }

    fn sorted_ok(results: Vec<Result<Value, PipelineError>>) -> Vec<i64> {
        let mut out: Vec<i64> = results
            .into_iter()
            .map(|r| r.unwrap().as_i64().unwrap())
            .collect();
        out.sort_unstable();
        out
    }

    #[tokio::test]
    async fn empty_pipeline_emits_start_signal() {
        let results = collect(&[]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &Value::Null);
    }

    #[tokio::test]
    async fn values_then_map() {
        let results = collect(&[values(json!([1, 2, 3])), StageDefinition::use_module("times-ten")]).await;
        assert_eq!(sorted_ok(results), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn single_source_stage_preserves_order() {
        let results = collect(&[values(json!([3, 1, 2]))]).await;
        let got: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(got, vec![json!(3), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn empty_emissions_are_filtered() {
        let results = collect(&[values(json!([1, 2, 3, 4])), StageDefinition::use_module("drop-odd")]).await;
        assert_eq!(sorted_ok(results), vec![2, 4]);
    }

    #[tokio::test]
    async fn ignore_stage_is_identity() {
        let results = collect(&[values(json!([1, 2])), StageDefinition::ignore("times-ten")]).await;
        assert_eq!(sorted_ok(results), vec![1, 2]);
    }

    #[tokio::test]
    async fn failure_terminates_pipeline() {
        let results = collect(&[values(json!([2])), StageDefinition::use_module("fail-on-two")]).await;
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(PipelineError::Transformation { stage, source }) => {
                assert_eq!(stage, "fail-on-two");
                assert_eq!(source.message, "two is not allowed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_an_error() {
        let results = collect(&[
            values(json!([2])),
            StageDefinition::use_module("fail-on-two"),
            StageDefinition::use_module("times-ten"),
        ])
        .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[tokio::test]
    async fn continue_on_error_drops_failed_input() {
        let results = collect(&[
            values(json!([1, 2, 3])),
            StageDefinition::use_module("fail-on-two").with_continue_on_error(true),
        ])
        .await;
        assert_eq!(sorted_ok(results), vec![1, 3]);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = registry();
        registry.register("flaky", move |input: TransformInput| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Invocation::fail("not yet")
            } else {
                Invocation::value(input.value().clone())
            }
        });
        let definitions = [
            values(json!([7])),
            StageDefinition::use_module("flaky").with_retry(2, 0.0),
        ];
        let results: Vec<_> = compile_pipeline(&definitions, &registry, None)
            .unwrap()
            .collect()
            .await;
        assert_eq!(sorted_ok(results), vec![7]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_then_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = registry();
        registry.register("broken", move |_: TransformInput| {
            counter.fetch_add(1, Ordering::SeqCst);
            Invocation::fail("always")
        });
        let definitions = [StageDefinition::use_module("broken").with_retry(2, 0.0)];
        let results: Vec<_> = compile_pipeline(&definitions, &registry, None)
            .unwrap()
            .collect()
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(results.as_slice(), [Err(PipelineError::Transformation { .. })]));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delays_double() {
        let start = tokio::time::Instant::now();
        let mut registry = registry();
        registry.register("broken", |_: TransformInput| Invocation::fail("always"));
        let definitions = [StageDefinition::use_module("broken").with_retry(3, 100.0)];
        let _: Vec<_> = compile_pipeline(&definitions, &registry, None)
            .unwrap()
            .collect()
            .await;
        // 100 + 200 + 400 ms of backoff.
        assert!(start.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_input_does_not_block_others() {
        let first_calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&first_calls);
        let mut registry = registry();
        registry.register("fails-one-once", move |input: TransformInput| {
            if input.value() == &json!(1) && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Invocation::fail("first attempt")
            } else {
                Invocation::value(input.value().clone())
            }
        });
        let definitions = [
            values(json!([1, 2])),
            StageDefinition::use_module("fails-one-once").with_retry(1, 500.0),
        ];
        let mut stream = compile_pipeline(&definitions, &registry, None).unwrap();
        let start = tokio::time::Instant::now();

        assert_eq!(stream.next().await.unwrap().unwrap(), json!(2));
        assert!(start.elapsed() < Duration::from_millis(500));

        assert_eq!(stream.next().await.unwrap().unwrap(), json!(1));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(stream.next().await.is_none());
        assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn odd_failures_are_skipped_with_continue_on_error() {
        let mut registry = registry();
        registry.register("even-only", |input: TransformInput| {
            if input.value().as_i64().unwrap_or_default() % 2 == 1 {
                Invocation::fail("odd input")
            } else {
                Invocation::value(input.value().clone())
            }
        });
        let definitions = [
            values(json!([1, 2])),
            StageDefinition::use_module("even-only").with_continue_on_error(true),
        ];
        let results: Vec<_> = compile_pipeline(&definitions, &registry, None)
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &json!(2));
    }

    #[test]
    fn oversized_retry_wait_is_capped() {
        let candidate = json!({"use": "values", "retryWait": 1e300});
        assert!(crate::config::schema::validate_stage(&candidate).is_none());
        let definition: StageDefinition = serde_json::from_value(candidate).unwrap();

        let stage = compile(&definition, &registry()).unwrap();
        assert_eq!(stage.policy().retry_wait, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn context_reaches_every_stage() {
        let definitions = [StageDefinition::use_module("context")];
        let results: Vec<_> =
            compile_pipeline(&definitions, &registry(), Some(json!({"filename": "/a.json"})))
                .unwrap()
                .collect()
                .await;
        assert_eq!(results[0].as_ref().unwrap(), &json!({"filename": "/a.json"}));
    }

    #[tokio::test]
    async fn params_are_fixed_at_compile_time() {
        let mut registry = registry();
        registry.register("params", |input: TransformInput| {
            Invocation::value(Value::Object(input.params.as_ref().clone()))
        });
        let mut params = Map::new();
        params.insert("a".into(), json!(true));
        let mut definition = StageDefinition::use_module("params").with_params(params);
        let stage = compile(&definition, &registry).unwrap();

        definition.params.insert("a".into(), json!(false));
        let results: Vec<_> = compose_pipeline(&[stage], None).collect().await;
        assert_eq!(results[0].as_ref().unwrap(), &json!({"a": true}));
    }

    #[test]
    fn unknown_module_does_not_compile() {
        let err = compile(&StageDefinition::use_module("nope"), &registry()).unwrap_err();
        assert!(err.to_string().contains("unknown module `nope`"));
    }

    #[test]
    fn include_does_not_compile() {
        assert!(compile(&StageDefinition::include("./a.json"), &registry()).is_err());
    }

    #[test]
    fn policy_defaults() {
        let stage = compile(&StageDefinition::use_module("values"), &registry()).unwrap();
        assert_eq!(
            stage.policy(),
            StagePolicy {
                retry_count: 0,
                retry_wait: Duration::from_secs(1),
                continue_on_error: false,
            }
        );
        assert!(!stage.is_inert());
        assert!(compile(&StageDefinition::ignore("x"), &registry()).unwrap().is_inert());
    }
}
