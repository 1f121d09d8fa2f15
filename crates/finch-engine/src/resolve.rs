//! Definition resolution: validate, splice `include`s, locate modules.
//!
//! Resolution flattens a definition list into `use` stages only, in
//! depth-first order, and collects every file the result depends on. `ignore`
//! stages are validated and then dropped. File
//! modules and include files are dependencies; built-in and installed modules
//! are not.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use finch_types::{StageDefinition, StageKind};
use indexmap::IndexSet;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::reader::{into_definition_list, read_definitions};
use crate::config::schema::{validate_stage, SchemaViolation};
use crate::error::PipelineError;
use crate::registry::TransformRegistry;

static RELATIVE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.+[/\\]").expect("valid relative path regex"));

/// Flattened stages plus the files they were built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedPipeline {
    pub definitions: Vec<StageDefinition>,
    /// Absolute paths, de-duplicated, in first-seen order.
    pub dependencies: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct Accumulator {
    definitions: Vec<StageDefinition>,
    dependencies: IndexSet<PathBuf>,
}

enum LocatedModule {
    Builtin,
    File(PathBuf),
    Installed(PathBuf),
}

/// Resolves definitions against the built-in registry and module directories.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    builtins: Vec<String>,
    module_dirs: Vec<PathBuf>,
}

impl Resolver {
    pub fn new(registry: &TransformRegistry, module_dirs: Vec<PathBuf>) -> Self {
        Self {
            builtins: registry.names().map(str::to_owned).collect(),
            module_dirs,
        }
    }

    /// Resolve `definitions` relative to `resolve_from`.
    ///
    /// `resolve_from` defaults to the current working directory and must be
    /// absolute. `continue_on_error` is inherited by every stage that does not
    /// set its own.
    ///
    /// # Errors
    ///
    /// Validation, resolution, read, and cycle failures. No partial result is
    /// returned.
    pub fn resolve(
        &self,
        definitions: &[Value],
        resolve_from: Option<&Path>,
        continue_on_error: Option<bool>,
    ) -> Result<ResolvedPipeline, PipelineError> {
        let resolve_from = match resolve_from {
            Some(dir) if dir.is_absolute() => normalize(dir),
            Some(dir) => {
                return Err(PipelineError::InvalidOption(format!(
                    "resolveFrom must be an absolute path, got {}",
                    dir.display()
                )))
            }
            None => std::env::current_dir().map_err(|e| {
                PipelineError::InvalidOption(format!("cannot determine working directory: {e}"))
            })?,
        };
        self.resolve_with_chain(definitions, &resolve_from, continue_on_error, Vec::new())
    }

    /// Read the definition file at `path` and resolve it from its directory.
    ///
    /// # Errors
    ///
    /// Read failures plus everything [`Resolver::resolve`] can return.
    pub fn resolve_file(
        &self,
        path: &Path,
        continue_on_error: Option<bool>,
    ) -> Result<ResolvedPipeline, PipelineError> {
        let path = normalize(path);
        let definitions = into_definition_list(read_definitions(&path)?);
        let dir = path.parent().map_or_else(|| path.clone(), Path::to_path_buf);
        self.resolve_with_chain(&definitions, &dir, continue_on_error, vec![path])
    }

    fn resolve_with_chain(
        &self,
        definitions: &[Value],
        resolve_from: &Path,
        continue_on_error: Option<bool>,
        mut chain: Vec<PathBuf>,
    ) -> Result<ResolvedPipeline, PipelineError> {
        let mut acc = Accumulator::default();
        self.reduce(definitions, resolve_from, continue_on_error, &mut chain, &mut acc)?;
        tracing::debug!(
            stages = acc.definitions.len(),
            dependencies = acc.dependencies.len(),
            resolve_from = %resolve_from.display(),
            "Resolved definitions"
        );
        Ok(ResolvedPipeline {
            definitions: acc.definitions,
            dependencies: acc.dependencies.into_iter().collect(),
        })
    }

    fn reduce(
        &self,
        definitions: &[Value],
        resolve_from: &Path,
        inherited: Option<bool>,
        chain: &mut Vec<PathBuf>,
        acc: &mut Accumulator,
    ) -> Result<(), PipelineError> {
        for candidate in definitions {
            let mut stage = parse_stage(candidate)?;
            if stage.continue_on_error.is_none() {
                stage.continue_on_error = inherited;
            }

            match stage.kind.clone() {
                StageKind::Include(reference) => {
                    let path = locate_file(&reference, resolve_from)
                        .ok_or_else(|| not_found(candidate, &reference, resolve_from))?;
                    if chain.contains(&path) {
                        let mut cycle = chain.clone();
                        cycle.push(path);
                        return Err(PipelineError::Cycle { chain: cycle });
                    }

                    let nested = into_definition_list(read_definitions(&path)?);
                    acc.dependencies.insert(path.clone());
                    let dir = path.parent().map_or_else(|| path.clone(), Path::to_path_buf);
                    chain.push(path);
                    self.reduce(&nested, &dir, stage.continue_on_error, chain, acc)?;
                    chain.pop();
                }
                StageKind::Use(reference) => {
                    match self.locate_module(&reference, resolve_from) {
                        Some(LocatedModule::Builtin) => {}
                        Some(LocatedModule::File(path)) => {
                            stage.kind = StageKind::Use(path.to_string_lossy().into_owned());
                            acc.dependencies.insert(path);
                        }
                        Some(LocatedModule::Installed(path)) => {
                            stage.kind = StageKind::Use(path.to_string_lossy().into_owned());
                        }
                        None => return Err(not_found(candidate, &reference, resolve_from)),
                    }
                    acc.definitions.push(stage);
                }
                StageKind::Ignore(reference) => {
                    tracing::debug!(module = reference.as_str(), "Skipping ignored stage");
                }
            }
        }
        Ok(())
    }

    fn locate_module(&self, reference: &str, resolve_from: &Path) -> Option<LocatedModule> {
        if is_path_reference(reference) {
            return locate_file(reference, resolve_from).map(LocatedModule::File);
        }
        if self.builtins.iter().any(|name| name == reference) {
            return Some(LocatedModule::Builtin);
        }
        self.module_dirs
            .iter()
            .map(|dir| dir.join(reference))
            .find(|candidate| candidate.is_file())
            .map(LocatedModule::Installed)
    }
}

/// Whether a module reference names a file rather than a registered module.
pub fn is_path_reference(reference: &str) -> bool {
    Path::new(reference).is_absolute() || RELATIVE_PATH_RE.is_match(reference)
}

fn locate_file(reference: &str, resolve_from: &Path) -> Option<PathBuf> {
    let path = normalize(&resolve_from.join(reference));
    path.is_file().then_some(path)
}

fn parse_stage(candidate: &Value) -> Result<StageDefinition, PipelineError> {
    if let Some(violations) = validate_stage(candidate) {
        return Err(PipelineError::Validation {
            definition: candidate.to_string(),
            violations,
        });
    }
    serde_json::from_value(candidate.clone()).map_err(|e| PipelineError::Validation {
        definition: candidate.to_string(),
        violations: vec![SchemaViolation {
            pointer: String::new(),
            errors: vec![e.to_string()],
        }],
    })
}

fn not_found(candidate: &Value, reference: &str, resolve_from: &Path) -> PipelineError {
    PipelineError::Resolution {
        definition: candidate.to_string(),
        module: reference.to_owned(),
        resolve_from: Some(resolve_from.to_path_buf()),
    }
}

/// Lexically remove `.` and `..` components without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
