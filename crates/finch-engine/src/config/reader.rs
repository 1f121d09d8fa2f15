//! Definition file reader: JSON or YAML chosen by file extension.

use std::path::{Path, PathBuf};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("definition path must be absolute: {}", .0.display())]
    NotAbsolute(PathBuf),

    #[error("unrecognized definition format for {}: expected .json, .yml or .yaml", .0.display())]
    UnrecognizedFormat(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("cannot parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn detect(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Whether `path` names a file in one of the supported definition formats.
pub fn is_definition_file(path: &Path) -> bool {
    Format::detect(path).is_some()
}

/// Read and parse a definition file.
///
/// Returns `Ok(None)` for a file whose content is empty or whitespace.
///
/// # Errors
///
/// Fails when the path is relative, has an unsupported extension, is missing,
/// is not a regular file, or does not parse.
pub fn read_definitions(path: &Path) -> Result<Option<Value>, ReadError> {
    if !path.is_absolute() {
        return Err(ReadError::NotAbsolute(path.to_path_buf()));
    }
    let format =
        Format::detect(path).ok_or_else(|| ReadError::UnrecognizedFormat(path.to_path_buf()))?;

    let metadata = std::fs::metadata(path).map_err(|source| ReadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(ReadError::NotAFile(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ReadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_definitions(path, &content, format)
}

fn parse_definitions(path: &Path, content: &str, format: Format) -> Result<Option<Value>, ReadError> {
    if content.trim().is_empty() {
        return Ok(None);
    }
    let parsed = match format {
        Format::Json => serde_json::from_str::<Value>(content).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string()),
    };
    parsed.map(Some).map_err(|message| ReadError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Coerce a parsed definition document into a list of stage definitions.
/// A single object becomes a one-element list; no content becomes an empty list.
pub fn into_definition_list(document: Option<Value>) -> Vec<Value> {
    match document {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    }
}
