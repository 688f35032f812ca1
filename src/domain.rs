use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OlmstedError;

pub const SCHEMA_VERSION: &str = "2.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    Lenient,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Strict => write!(f, "strict"),
            ValidationMode::Lenient => write!(f, "lenient"),
        }
    }
}

/// Interval convention used for `*_alignment_start` / `junction_start` in written output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Coordinates {
    /// 1-based closed intervals, as in the AIRR standard.
    Airr,
    /// 0-based half-open intervals (slice coordinates).
    ZeroBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    TripleStore,
    AirrJson,
    PcpCsv,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::TripleStore => write!(f, "triple-store"),
            InputFormat::AirrJson => write!(f, "airr-json"),
            InputFormat::PcpCsv => write!(f, "pcp-csv"),
        }
    }
}

/// Raw contents of one input file, before any adapter has looked at it.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    Json(Value),
    Csv(String),
}

pub const PCP_REQUIRED_COLUMNS: [&str; 3] = ["sample_id", "parent_name", "child_name"];

impl InputFormat {
    pub fn classify(document: &SourceDocument) -> Result<Self, OlmstedError> {
        match document {
            SourceDocument::Csv(text) => {
                let header = text.lines().next().unwrap_or_default();
                let columns = header
                    .split(',')
                    .map(|col| col.trim().trim_matches('"'))
                    .collect::<Vec<_>>();
                if PCP_REQUIRED_COLUMNS
                    .iter()
                    .all(|required| columns.contains(required))
                {
                    Ok(InputFormat::PcpCsv)
                } else {
                    Err(OlmstedError::UnsupportedFormat(format!(
                        "CSV header lacks PCP columns {}: {header}",
                        PCP_REQUIRED_COLUMNS.join(", ")
                    )))
                }
            }
            SourceDocument::Json(Value::Object(map)) => {
                if map.contains_key("dataset_id") && map.contains_key("clones") {
                    Ok(InputFormat::AirrJson)
                } else if map.contains_key("tripl:type") {
                    Ok(InputFormat::TripleStore)
                } else {
                    Err(OlmstedError::UnsupportedFormat(
                        "JSON object is neither an AIRR dataset nor a pulled entity record"
                            .to_string(),
                    ))
                }
            }
            SourceDocument::Json(Value::Array(records)) => {
                let is_pull = !records.is_empty()
                    && records
                        .iter()
                        .all(|record| record.get("tripl:type").is_some());
                if is_pull {
                    Ok(InputFormat::TripleStore)
                } else {
                    Err(OlmstedError::UnsupportedFormat(
                        "JSON array does not hold pulled entity records".to_string(),
                    ))
                }
            }
            SourceDocument::Json(_) => Err(OlmstedError::UnsupportedFormat(
                "top-level JSON value must be an object or an array".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub authorstring: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
    pub sample_id: String,
    #[serde(default)]
    pub locus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timepoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
    pub subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
    pub seed_id: String,
}

/// Dataset as written to `datasets.json`; clones live in their own file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub ident: String,
    pub dataset_id: String,
    pub schema_version: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper: Option<Paper>,
    pub samples: Vec<Sample>,
    pub subjects: Vec<Subject>,
    pub seeds: Vec<Seed>,
    pub clone_count: usize,
    pub subjects_count: usize,
    pub timepoints_count: usize,
}

/// Trimmed copy of a dataset nested under each clone (no samples, no clones).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRef {
    pub ident: String,
    pub dataset_id: String,
    pub schema_version: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper: Option<Paper>,
    pub subjects: Vec<Subject>,
    pub seeds: Vec<Seed>,
    pub clone_count: usize,
    pub subjects_count: usize,
    pub timepoints_count: usize,
}

impl From<&Dataset> for DatasetRef {
    fn from(dataset: &Dataset) -> Self {
        Self {
            ident: dataset.ident.clone(),
            dataset_id: dataset.dataset_id.clone(),
            schema_version: dataset.schema_version.clone(),
            dataset_type: dataset.dataset_type.clone(),
            build: dataset.build.clone(),
            paper: dataset.paper.clone(),
            subjects: dataset.subjects.clone(),
            seeds: dataset.seeds.clone(),
            clone_count: dataset.clone_count,
            subjects_count: dataset.subjects_count,
            timepoints_count: dataset.timepoints_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Root,
    Node,
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimepointMultiplicity {
    pub timepoint_id: String,
    pub multiplicity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub sequence_id: String,
    pub sequence_alignment: Option<String>,
    pub sequence_alignment_aa: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub parent: Option<String>,
    pub length: f64,
    pub distance: f64,
    pub timepoint_id: Option<String>,
    pub multiplicity: Option<u64>,
    pub cluster_multiplicity: Option<u64>,
    pub timepoint_multiplicities: Vec<TimepointMultiplicity>,
    pub cluster_timepoint_multiplicities: Vec<TimepointMultiplicity>,
    pub lbi: Option<f64>,
    pub lbr: Option<f64>,
    pub affinity: Option<f64>,
}

/// Tree fields shared by the full tree file and the summary embedded in clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSummary {
    pub ident: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    pub clone_id: String,
    pub newick: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsampling_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsampled_count: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tree {
    #[serde(flatten)]
    pub summary: TreeSummary,
    pub nodes: BTreeMap<String, Node>,
}

/// Typed clone attributes as read from an adapter's canonical record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloneFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_seqs_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_read_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_mut_freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_call: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_alignment_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_alignment_end: Option<u64>,
    #[serde(default)]
    pub d_call: Option<String>,
    #[serde(default)]
    pub d_alignment_start: Option<u64>,
    #[serde(default)]
    pub d_alignment_end: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub j_call: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub j_alignment_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub j_alignment_end: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub germline_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_seed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub seed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A clonal family as written to `clones.<dataset_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClonalFamily {
    pub ident: String,
    pub clone_id: String,
    #[serde(flatten)]
    pub fields: CloneFields,
    pub trees: Vec<TreeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Sample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
}

pub const START_POSITION_FIELDS: [&str; 4] = [
    "v_alignment_start",
    "d_alignment_start",
    "j_alignment_start",
    "junction_start",
];

impl CloneFields {
    pub fn start_positions_mut(&mut self) -> [&mut Option<u64>; 4] {
        [
            &mut self.v_alignment_start,
            &mut self.d_alignment_start,
            &mut self.j_alignment_start,
            &mut self.junction_start,
        ]
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn classify_airr_document() {
        let doc = SourceDocument::Json(json!({"dataset_id": "d1", "clones": []}));
        assert_eq!(InputFormat::classify(&doc).unwrap(), InputFormat::AirrJson);
    }

    #[test]
    fn classify_pull_records() {
        let doc = SourceDocument::Json(json!([{"tripl:type": "cft.dataset"}]));
        assert_eq!(InputFormat::classify(&doc).unwrap(), InputFormat::TripleStore);
    }

    #[test]
    fn classify_pcp_csv() {
        let doc = SourceDocument::Csv(
            "sample_id,parent_name,child_name,edge_length,sample_count\n".to_string(),
        );
        assert_eq!(InputFormat::classify(&doc).unwrap(), InputFormat::PcpCsv);
    }

    #[test]
    fn classify_rejects_unknown_shapes() {
        let doc = SourceDocument::Json(json!({"foo": 1}));
        assert_matches!(
            InputFormat::classify(&doc),
            Err(OlmstedError::UnsupportedFormat(_))
        );
        let doc = SourceDocument::Csv("family_name,newick_tree\n".to_string());
        assert_matches!(
            InputFormat::classify(&doc),
            Err(OlmstedError::UnsupportedFormat(_))
        );
    }

    #[test]
    fn clone_fields_keep_unknown_keys() {
        let fields: CloneFields = serde_json::from_value(json!({
            "clone_id": "c1",
            "v_alignment_start": 3,
            "repertoire_id": null
        }))
        .unwrap();
        assert_eq!(fields.v_alignment_start, Some(3));
        assert!(fields.extra.contains_key("repertoire_id"));
    }
}
