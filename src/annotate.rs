use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Node, NodeType, TimepointMultiplicity};
use crate::error::OlmstedError;
use crate::phylo::{NodeId, PhyloTree};
use crate::remap::finite_or_none;
use crate::sources::NodeTable;

/// Annotates every node of `tree` in a single postorder pass, keyed by node name.
pub fn annotate_tree(
    tree: &PhyloTree,
    table: &NodeTable,
    naive_name: &str,
) -> Result<BTreeMap<String, Node>, OlmstedError> {
    let naive = tree
        .find(naive_name)
        .ok_or_else(|| OlmstedError::NaiveNotFound(naive_name.to_string()))?;
    let distances = tree.distances_from(naive);

    let nodes = tree
        .postorder()
        .into_iter()
        .try_fold(BTreeMap::new(), |mut nodes, id| {
            let node = annotate_node(tree, id, table, &distances)?;
            let name = node.sequence_id.clone();
            if nodes.insert(name.clone(), node).is_some() {
                return Err(OlmstedError::MalformedTree(format!(
                    "node name {name:?} occurs more than once"
                )));
            }
            Ok(nodes)
        })?;

    for name in table.metadata.keys() {
        if !nodes.contains_key(name) {
            debug!(node = name.as_str(), "metadata row has no matching tree node");
        }
    }
    Ok(nodes)
}

fn annotate_node(
    tree: &PhyloTree,
    id: NodeId,
    table: &NodeTable,
    distances: &[f64],
) -> Result<Node, OlmstedError> {
    let phylo = tree.node(id);
    let name = phylo.name.clone();
    if name.is_empty() {
        return Err(OlmstedError::MalformedTree(
            "tree contains an unnamed node".to_string(),
        ));
    }

    let empty = Map::new();
    let meta = table.metadata.get(&name).unwrap_or(&empty);

    let sequence_alignment =
        lookup_sequence(table.nt_sequences.as_ref(), &name, meta, "sequence_alignment")?;
    let sequence_alignment_aa = lookup_sequence(
        table.aa_sequences.as_ref(),
        &name,
        meta,
        "sequence_alignment_aa",
    )?;

    let (node_type, parent, length, distance) = match phylo.parent {
        None => (NodeType::Root, None, 0.0, 0.0),
        Some(parent) => {
            let node_type = if tree.is_leaf(id) {
                NodeType::Leaf
            } else {
                NodeType::Node
            };
            (
                node_type,
                Some(tree.node(parent).name.clone()),
                phylo.length,
                distances[id],
            )
        }
    };

    Ok(Node {
        sequence_id: name,
        sequence_alignment,
        sequence_alignment_aa,
        node_type,
        parent,
        length,
        distance,
        timepoint_id: meta.get("timepoint_id").and_then(parse_text),
        multiplicity: meta.get("multiplicity").and_then(parse_count),
        cluster_multiplicity: meta.get("cluster_multiplicity").and_then(parse_count),
        timepoint_multiplicities: timepoint_multiplicities(
            meta,
            "timepoints",
            "timepoint_multiplicities",
        ),
        cluster_timepoint_multiplicities: timepoint_multiplicities(
            meta,
            "cluster_timepoints",
            "cluster_timepoint_multiplicities",
        ),
        lbi: meta.get("lbi").and_then(parse_float),
        lbr: meta.get("lbr").and_then(parse_float),
        affinity: meta.get("affinity").and_then(parse_float),
    })
}

fn lookup_sequence(
    sequences: Option<&BTreeMap<String, Option<String>>>,
    name: &str,
    meta: &Map<String, Value>,
    field: &str,
) -> Result<Option<String>, OlmstedError> {
    match sequences {
        Some(sequences) => sequences
            .get(name)
            .cloned()
            .ok_or_else(|| OlmstedError::MissingField(format!("{field} for node {name}"))),
        None => Ok(meta.get(field).and_then(parse_text)),
    }
}

fn parse_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Non-negative integer, from a JSON number or its string form. Anything else is null.
pub fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub fn parse_float(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.and_then(finite_or_none)
}

/// Splits a colon-delimited list, e.g. `"t1:t2"` into `["t1", "t2"]`. Empty input is an empty list.
pub fn split_colon_list(raw: &str) -> Vec<&str> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(':').map(str::trim).collect()
}

/// Parses every element of a colon-delimited integer list; one bad element rejects the list.
pub fn parse_colon_counts(raw: &str) -> Option<Vec<u64>> {
    split_colon_list(raw)
        .into_iter()
        .map(|item| item.parse::<u64>().ok())
        .collect()
}

/// Pairs timepoints with multiplicities index-wise, truncating to the shorter list.
pub fn zip_timepoints(timepoints: &[String], multiplicities: &[u64]) -> Vec<TimepointMultiplicity> {
    timepoints
        .iter()
        .zip(multiplicities)
        .map(|(timepoint, multiplicity)| TimepointMultiplicity {
            timepoint_id: timepoint.clone(),
            multiplicity: Some(*multiplicity),
        })
        .collect()
}

fn timepoint_multiplicities(
    meta: &Map<String, Value>,
    timepoints_key: &str,
    multiplicities_key: &str,
) -> Vec<TimepointMultiplicity> {
    match meta.get(multiplicities_key) {
        Some(Value::Array(items)) => items.iter().filter_map(parse_timepoint_object).collect(),
        Some(Value::String(raw)) => {
            let Some(multiplicities) = parse_colon_counts(raw) else {
                debug!(field = multiplicities_key, raw = raw.as_str(), "unparsable multiplicities");
                return Vec::new();
            };
            let timepoints = match meta.get(timepoints_key) {
                Some(Value::String(raw)) => split_colon_list(raw)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                Some(Value::Array(items)) => items.iter().filter_map(parse_text).collect(),
                _ => Vec::new(),
            };
            zip_timepoints(&timepoints, &multiplicities)
        }
        _ => Vec::new(),
    }
}

fn parse_timepoint_object(value: &Value) -> Option<TimepointMultiplicity> {
    let timepoint_id = value
        .get("timepoint_id")
        .or_else(|| value.get("timepoint"))
        .and_then(parse_text)?;
    Some(TimepointMultiplicity {
        timepoint_id,
        multiplicity: value.get("multiplicity").and_then(parse_count),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn colon_lists() {
        assert_eq!(split_colon_list("t1:t2"), vec!["t1", "t2"]);
        assert!(split_colon_list("").is_empty());
        assert_eq!(parse_colon_counts("5:10"), Some(vec![5, 10]));
        assert_eq!(parse_colon_counts("5:x"), None);
    }

    #[test]
    fn counts_and_floats_degrade_to_null() {
        assert_eq!(parse_count(&json!("12")), Some(12));
        assert_eq!(parse_count(&json!(-1)), None);
        assert_eq!(parse_count(&json!("")), None);
        assert_eq!(parse_float(&json!("0.25")), Some(0.25));
        assert_eq!(parse_float(&json!("strong")), None);
        assert_eq!(parse_float(&json!("inf")), None);
        assert_eq!(parse_float(&json!("-inf")), None);
    }

    #[test]
    fn timepoint_objects_pass_through() {
        let meta = json!({
            "timepoint_multiplicities": [
                {"timepoint_id": "t1", "multiplicity": 3},
                {"timepoint": "t2", "multiplicity": null}
            ]
        });
        let meta = meta.as_object().unwrap();
        let parsed = timepoint_multiplicities(meta, "timepoints", "timepoint_multiplicities");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].timepoint_id, "t2");
        assert_eq!(parsed[1].multiplicity, None);
    }
}
