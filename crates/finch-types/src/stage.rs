//! Stage definitions as they appear in definition files.
//!
//! A stage is exactly one of `use` (run a transformation), `include` (splice
//! in the stages of another definition file), or `ignore` (inert placeholder).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The mutually exclusive shape of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageKind {
    Use(String),
    Include(String),
    Ignore(String),
}

/// Error produced when a raw stage object has none or several of
/// `use`/`include`/`ignore`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("exactly one of `use`, `include`, or `ignore` is required (found {found})")]
pub struct StageShapeError {
    found: usize,
}

/// A single stage definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStage", into = "RawStage")]
pub struct StageDefinition {
    pub kind: StageKind,
    pub params: Map<String, Value>,
    pub retry_count: Option<u32>,
    /// Initial retry delay in milliseconds.
    pub retry_wait: Option<f64>,
    pub continue_on_error: Option<bool>,
}

impl StageDefinition {
    fn with_kind(kind: StageKind) -> Self {
        Self {
            kind,
            params: Map::new(),
            retry_count: None,
            retry_wait: None,
            continue_on_error: None,
        }
    }

    pub fn use_module(module: impl Into<String>) -> Self {
        Self::with_kind(StageKind::Use(module.into()))
    }

    pub fn include(file: impl Into<String>) -> Self {
        Self::with_kind(StageKind::Include(file.into()))
    }

    pub fn ignore(module: impl Into<String>) -> Self {
        Self::with_kind(StageKind::Ignore(module.into()))
    }

    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry_count: u32, retry_wait_ms: f64) -> Self {
        self.retry_count = Some(retry_count);
        self.retry_wait = Some(retry_wait_ms);
        self
    }

    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    /// The module, file, or placeholder reference named by this stage.
    pub fn module_ref(&self) -> &str {
        match &self.kind {
            StageKind::Use(r) | StageKind::Include(r) | StageKind::Ignore(r) => r,
        }
    }

    /// Render the definition as compact JSON for error messages.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawStage {
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    use_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ignore: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_wait: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continue_on_error: Option<bool>,
}

impl TryFrom<RawStage> for StageDefinition {
    type Error = StageShapeError;

    fn try_from(raw: RawStage) -> Result<Self, Self::Error> {
        let kinds: Vec<StageKind> = [
            raw.use_ref.map(StageKind::Use),
            raw.include.map(StageKind::Include),
            raw.ignore.map(StageKind::Ignore),
        ]
        .into_iter()
        .flatten()
        .collect();

        let found = kinds.len();
        let mut kinds = kinds.into_iter();
        match (kinds.next(), kinds.next()) {
            (Some(kind), None) => Ok(Self {
                kind,
                params: raw.params.unwrap_or_default(),
                retry_count: raw.retry_count,
                retry_wait: raw.retry_wait,
                continue_on_error: raw.continue_on_error,
            }),
            _ => Err(StageShapeError { found }),
        }
    }
}

impl From<StageDefinition> for RawStage {
    fn from(def: StageDefinition) -> Self {
        let mut raw = RawStage {
            params: (!def.params.is_empty()).then_some(def.params),
            retry_count: def.retry_count,
            retry_wait: def.retry_wait,
            continue_on_error: def.continue_on_error,
            ..RawStage::default()
        };
        match def.kind {
            StageKind::Use(r) => raw.use_ref = Some(r),
            StageKind::Include(r) => raw.include = Some(r),
            StageKind::Ignore(r) => raw.ignore = Some(r),
        }
        raw
    }
}
