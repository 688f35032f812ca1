pub mod airr;
pub mod pcp;
pub mod triple;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::domain::{BuildInfo, InputFormat, Paper, Sample, Seed, SourceDocument, Subject};
use crate::error::OlmstedError;

pub use airr::AirrJsonAdapter;
pub use pcp::PcpCsvAdapter;
pub use triple::TripleStoreAdapter;

/// Common in-memory shape every adapter produces. Field names are already canonical.
#[derive(Debug)]
pub struct SourceDataset {
    pub format: InputFormat,
    pub ident: Option<String>,
    pub dataset_id: String,
    pub dataset_type: Option<String>,
    pub build: Option<BuildInfo>,
    pub paper: Option<Paper>,
    pub samples: Vec<Sample>,
    pub subjects: Vec<Subject>,
    pub seeds: Vec<Seed>,
    /// Clones the adapter could not read are kept as errors so the assembler can drop them
    /// one at a time.
    pub clones: Vec<Result<SourceClone, RejectedClone>>,
}

/// A clone whose source records were unreadable.
#[derive(Debug)]
pub struct RejectedClone {
    pub label: String,
    pub error: OlmstedError,
}

impl RejectedClone {
    /// Errors that would otherwise read as file-level are rewrapped so they stay clone scoped.
    pub(crate) fn new(label: String, error: OlmstedError) -> Self {
        let error = if error.is_clone_scoped() {
            error
        } else {
            OlmstedError::InvalidField {
                entity: label.clone(),
                message: error.to_string(),
            }
        };
        Self { label, error }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceClone {
    pub fields: Map<String, Value>,
    pub trees: Vec<SourceTree>,
}

impl SourceClone {
    pub fn clone_id(&self) -> Option<&str> {
        self.fields.get("clone_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    pub fields: Map<String, Value>,
    pub topology: Option<Topology>,
    pub nodes: NodeTable,
    /// When no node carries the naive name, distances are measured from the root instead.
    /// Set for sources whose trees are rooted by their edges rather than by a naive node.
    pub naive_optional: bool,
}

/// How a source describes tree shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    Newick(String),
    /// `(parent, child, branch length)` edges; the tree is assembled later.
    Edges(Vec<(String, String, f64)>),
}

/// Per-node data supplied next to a tree, keyed by node name.
///
/// A `None` sequence table means the source legitimately has no sequences; a present table
/// must cover every node of the tree.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    pub nt_sequences: Option<BTreeMap<String, Option<String>>>,
    pub aa_sequences: Option<BTreeMap<String, Option<String>>>,
    pub metadata: BTreeMap<String, Map<String, Value>>,
}

/// Turns one input document into a [`SourceDataset`].
///
/// An `Err` from `adapt` means the whole file is unusable and is never clone scoped.
/// Problems confined to one clone are reported through [`SourceDataset::clones`].
pub trait SourceAdapter {
    fn format(&self) -> InputFormat;
    fn adapt(&self, document: SourceDocument) -> Result<SourceDataset, OlmstedError>;
}

/// Companion newick trees for PCP inputs, keyed by family name.
pub type PcpTrees = BTreeMap<String, String>;

pub fn adapter_for(format: InputFormat, pcp_trees: Option<&PcpTrees>) -> Box<dyn SourceAdapter> {
    match format {
        InputFormat::TripleStore => Box::new(TripleStoreAdapter),
        InputFormat::AirrJson => Box::new(AirrJsonAdapter),
        InputFormat::PcpCsv => Box::new(PcpCsvAdapter::new(pcp_trees.cloned())),
    }
}

pub(crate) fn as_object(value: Value, what: &str) -> Result<Map<String, Value>, OlmstedError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(OlmstedError::InvalidInput(format!(
            "{what} must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Label for a clone in failure reports: its id when readable, else its position.
pub(crate) fn clone_label(record: &Value, id_key: &str, index: usize) -> String {
    record
        .get(id_key)
        .and_then(id_string)
        .unwrap_or_else(|| format!("#{index}"))
}

/// Renders scalar ids (strings or numbers) as strings.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Removes `key` and deserializes it; absent and null both read as `None`.
pub(crate) fn take_typed<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    key: &str,
    entity: &str,
) -> Result<Option<T>, OlmstedError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| OlmstedError::InvalidField {
                entity: entity.to_string(),
                message: format!("{key}: {err}"),
            }),
    }
}
