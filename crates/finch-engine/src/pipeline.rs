//! The `pipeline` worker factory: compiles resolved definitions inside the
//! worker process and streams the pipeline's outputs.

use finch_runtime::{FactoryRegistry, OutputStream};
use finch_types::{StageDefinition, TransformError};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compile::compile_pipeline;
use crate::registry::TransformRegistry;

pub const PIPELINE_FACTORY: &str = "pipeline";

/// Setup argument of the `pipeline` factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineArgs {
    pub definitions: Vec<StageDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl PipelineArgs {
    pub fn into_setup_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(vec![serde_json::to_value(self)?])
    }
}

/// Register the `pipeline` factory, resolving modules against `transforms`.
pub fn register_pipeline_factory(factories: &mut FactoryRegistry, transforms: TransformRegistry) {
    factories.register(PIPELINE_FACTORY, move |args: Vec<Value>| {
        let first = args
            .into_iter()
            .next()
            .ok_or_else(|| TransformError::new("pipeline factory requires one argument"))?;
        let PipelineArgs {
            definitions,
            context,
        } = serde_json::from_value(first)
            .map_err(|e| TransformError::new(format!("invalid pipeline arguments: {e}")))?;

        tracing::debug!(stages = definitions.len(), "Compiling pipeline");
        let outputs = compile_pipeline(&definitions, &transforms, context)
            .map_err(|e| TransformError::from_error(&e))?;
        let outputs: OutputStream = outputs
            .map(|item| item.map_err(|e| TransformError::from_error(&e)))
            .boxed();
        Ok(outputs)
    });
}
