//! Regular expressions written as `/body/flags`.
//!
//! Supported flags: `i` (case-insensitive), `m` (multi-line), `s` (dot
//! matches newline), `x` (ignore whitespace), and `g` (replace every match).

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::LazyLock;

use finch_types::TransformError;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

static SLASH_FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^/(.*)/([a-z]*)$").expect("valid slash-form regex"));

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern must be written as /body/flags, got `{0}`")]
    Malformed(String),

    #[error("unsupported flag `{flag}` in pattern `{pattern}`")]
    Flag { pattern: String, flag: char },

    #[error("invalid pattern `{pattern}`: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    global: bool,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let captures = SLASH_FORM_RE
            .captures(text)
            .ok_or_else(|| PatternError::Malformed(text.to_owned()))?;
        let body = &captures[1];
        let flags = &captures[2];

        let mut builder = RegexBuilder::new(body);
        let mut global = false;
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'g' => global = true,
                other => {
                    return Err(PatternError::Flag {
                        pattern: text.to_owned(),
                        flag: other,
                    })
                }
            }
        }

        let regex = builder.build().map_err(|source| PatternError::Regex {
            pattern: text.to_owned(),
            source,
        })?;
        Ok(Self { regex, global })
    }

    /// Read a pattern from a string parameter.
    pub(crate) fn from_param(transform: &str, value: &Value) -> Result<Self, TransformError> {
        let text = value.as_str().ok_or_else(|| {
            TransformError::new(format!("{transform}: pattern `{value}` is not a string"))
        })?;
        Self::parse(text).map_err(|e| TransformError::new(format!("{transform}: {e}")))
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Replace the first match, or every match for a global pattern.
    pub fn replace<'t>(&self, text: &'t str, replacement: &str) -> Cow<'t, str> {
        if self.global {
            self.regex.replace_all(text, replacement)
        } else {
            self.regex.replace(text, replacement)
        }
    }

    pub fn split<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> + use<'_, 't> {
        self.regex.split(text)
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
