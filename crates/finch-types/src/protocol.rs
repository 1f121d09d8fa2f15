//! Parent/worker wire protocol.
//!
//! Messages are newline-delimited JSON records tagged by `type` with their
//! payload under `data`:
//!
//! ```text
//! {"type":"setup","data":{"factory":"pipeline","args":[...]}}
//! {"type":"next","data":42}
//! {"type":"error","data":{"message":"...","stack":"..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransformError;

/// Worker exit code after its output completed while still connected.
pub const GRACEFUL_EXIT: i32 = 0;
/// Worker exit code after reporting an error or failing to start.
pub const FAILURE_EXIT: i32 = 1;

/// Parent -> worker: which factory to run and with what arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub factory: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Setup(Setup),
    Next(Value),
    Error(TransformError),
}

impl Message {
    /// Encode as a single protocol line, including the trailing newline.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}
