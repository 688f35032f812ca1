use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OlmstedError {
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    #[error("outgroup node not found in tree: {0}")]
    OutgroupNotFound(String),

    #[error("naive node not found in tree: {0}")]
    NaiveNotFound(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field in {entity}: {message}")]
    InvalidField { entity: String, message: String },

    #[error("{object} doesn't conform to schema:\n{}", render_violations(errors))]
    SchemaValidation {
        object: String,
        errors: Vec<Violation>,
    },

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("schema failed to compile: {0}")]
    InvalidSchema(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl OlmstedError {
    /// Errors raised while building one clonal family; these are isolated per clone.
    pub fn is_clone_scoped(&self) -> bool {
        matches!(
            self,
            OlmstedError::MalformedTree(_)
                | OlmstedError::OutgroupNotFound(_)
                | OlmstedError::NaiveNotFound(_)
                | OlmstedError::MissingField(_)
                | OlmstedError::InvalidField { .. }
                | OlmstedError::SchemaValidation { .. }
        )
    }

    /// Rewraps an error about a whole input file so it is never mistaken for a clone failure.
    pub fn into_dataset_level(self) -> Self {
        if self.is_clone_scoped() {
            OlmstedError::InvalidDataset(self.to_string())
        } else {
            self
        }
    }
}

/// One path-scoped schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: Vec<PathSegment>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{key:?}"),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self
            .path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{path}]: {}", self.message)
    }
}

pub fn render_violations(errors: &[Violation]) -> String {
    let mut out = String::new();
    let mut last_path: Option<&[PathSegment]> = None;
    for violation in errors {
        if last_path != Some(violation.path.as_slice()) {
            let path = violation
                .path
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("Error at [{path}]:\n"));
            last_path = Some(violation.path.as_slice());
        }
        out.push_str(&format!("    {}\n", violation.message));
    }
    out
}
