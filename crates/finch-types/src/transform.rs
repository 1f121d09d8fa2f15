//! The transformation contract.
//!
//! A transformation receives an immutable [`TransformInput`] and answers with
//! an [`Invocation`]: a ready result, a future, or a stream of zero or more
//! results. The engine normalizes all three with [`Invocation::into_stream`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::{Map, Value};

use crate::error::TransformError;

/// One result of a transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Value(Value),
    /// "No output for this input". Filtered out by the engine.
    Empty,
}

/// Sentinel a transformation returns when it has nothing to emit.
pub const EMPTY: Emission = Emission::Empty;

impl From<Value> for Emission {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

pub type EmissionStream = BoxStream<'static, Result<Emission, TransformError>>;

/// Immutable input handed to a transformation.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub value: Arc<Value>,
    pub params: Arc<Map<String, Value>>,
    pub context: Option<Arc<Value>>,
}

impl TransformInput {
    pub fn new(value: Value, params: Arc<Map<String, Value>>) -> Self {
        Self {
            value: Arc::new(value),
            params,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<Arc<Value>>) -> Self {
        self.context = context;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// What a transformation produced for one input.
pub enum Invocation {
    Ready(Result<Emission, TransformError>),
    Future(BoxFuture<'static, Result<Emission, TransformError>>),
    Stream(EmissionStream),
}

impl Invocation {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Ready(Ok(Emission::Value(value.into())))
    }

    pub fn empty() -> Self {
        Self::Ready(Ok(EMPTY))
    }

    pub fn fail(err: impl Into<TransformError>) -> Self {
        Self::Ready(Err(err.into()))
    }

    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Emission, TransformError>> + Send + 'static,
    {
        Self::Future(Box::pin(fut))
    }

    pub fn stream<S>(outputs: S) -> Self
    where
        S: Stream<Item = Result<Emission, TransformError>> + Send + 'static,
    {
        Self::Stream(outputs.boxed())
    }

    /// Normalize into "zero or more asynchronous outputs, then completion or
    /// failure".
    pub fn into_stream(self) -> EmissionStream {
        match self {
            Self::Ready(result) => stream::once(future::ready(result)).boxed(),
            Self::Future(fut) => stream::once(fut).boxed(),
            Self::Stream(outputs) => outputs,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Future(_) => f.write_str("Future(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A transformation module.
pub trait Transform: Send + Sync {
    fn invoke(&self, input: TransformInput) -> Invocation;
}

impl<F> Transform for F
where
    F: Fn(TransformInput) -> Invocation + Send + Sync,
{
    fn invoke(&self, input: TransformInput) -> Invocation {
        self(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> TransformInput {
        TransformInput::new(value, Arc::new(Map::new()))
    }

    #[tokio::test]
    async fn all_invocation_forms_normalize_to_streams() {
        let ready: Vec<_> = Invocation::value(1).into_stream().collect().await;
        assert_eq!(ready, vec![Ok(Emission::Value(json!(1)))]);

        let fut: Vec<_> = Invocation::future(async { Ok(Emission::Value(json!(2))) })
            .into_stream()
            .collect()
            .await;
        assert_eq!(fut, vec![Ok(Emission::Value(json!(2)))]);

        let many: Vec<_> = Invocation::stream(stream::iter(vec![
            Ok(Emission::Value(json!(3))),
            Ok(EMPTY),
        ]))
        .into_stream()
        .collect()
        .await;
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn closures_are_transforms() {
        let double = |input: TransformInput| {
            Invocation::value(input.value().as_i64().unwrap_or_default() * 2)
        };
        match double.invoke(input(json!(4))) {
            Invocation::Ready(Ok(Emission::Value(v))) => assert_eq!(v, json!(8)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_is_not_a_value() {
        assert_ne!(Emission::Value(Value::Null), EMPTY);
    }
}
