use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::domain::{InputFormat, Seed, SourceDocument};
use crate::error::OlmstedError;
use crate::sources::{
    NodeTable, RejectedClone, SourceAdapter, SourceClone, SourceDataset, SourceTree, Topology,
    as_object, clone_label, id_string, json_kind, take_typed,
};

const SEQUENCE_FIELDS: [&str; 2] = ["sequence_alignment", "sequence_alignment_aa"];

/// Adapter for datasets already in AIRR-flavoured JSON (clones with newick plus node tables).
#[derive(Debug, Clone, Copy, Default)]
pub struct AirrJsonAdapter;

impl SourceAdapter for AirrJsonAdapter {
    fn format(&self) -> InputFormat {
        InputFormat::AirrJson
    }

    fn adapt(&self, document: SourceDocument) -> Result<SourceDataset, OlmstedError> {
        adapt_dataset(document).map_err(OlmstedError::into_dataset_level)
    }
}

fn adapt_dataset(document: SourceDocument) -> Result<SourceDataset, OlmstedError> {
    let SourceDocument::Json(value) = document else {
        return Err(OlmstedError::UnsupportedFormat(
            "CSV input handed to the AIRR JSON adapter".to_string(),
        ));
    };
    let mut dataset = as_object(value, "dataset")?;

    let dataset_id = dataset
        .get("dataset_id")
        .and_then(id_string)
        .ok_or_else(|| OlmstedError::MissingField("dataset_id".to_string()))?;

    let clones = match dataset.remove("clones") {
        Some(Value::Array(clones)) => clones
            .into_iter()
            .enumerate()
            .map(|(index, clone)| {
                let label = clone_label(&clone, "clone_id", index);
                as_object(clone, "clone")
                    .and_then(adapt_clone)
                    .map_err(|error| RejectedClone::new(label, error))
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(OlmstedError::InvalidField {
                entity: dataset_id,
                message: format!("clones must be an array, got {}", json_kind(&other)),
            });
        }
    };

    let seeds = take_typed::<Vec<Option<Seed>>>(&mut dataset, "seeds", &dataset_id)?
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect();

    Ok(SourceDataset {
        format: InputFormat::AirrJson,
        ident: dataset.get("ident").and_then(id_string),
        dataset_type: dataset.get("type").and_then(id_string),
        build: take_typed(&mut dataset, "build", &dataset_id)?,
        paper: take_typed(&mut dataset, "paper", &dataset_id)?,
        samples: take_typed(&mut dataset, "samples", &dataset_id)?.unwrap_or_default(),
        subjects: take_typed(&mut dataset, "subjects", &dataset_id)?.unwrap_or_default(),
        seeds,
        clones,
        dataset_id,
    })
}

fn adapt_clone(mut fields: Map<String, Value>) -> Result<SourceClone, OlmstedError> {
    let trees = match fields.remove("trees") {
        Some(Value::Array(trees)) => trees
            .into_iter()
            .map(|tree| adapt_tree(as_object(tree, "tree")?))
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(OlmstedError::InvalidField {
                entity: fields
                    .get("clone_id")
                    .and_then(id_string)
                    .unwrap_or_else(|| "clone".to_string()),
                message: format!("trees must be an array, got {}", json_kind(&other)),
            });
        }
    };
    Ok(SourceClone { fields, trees })
}

fn adapt_tree(mut fields: Map<String, Value>) -> Result<SourceTree, OlmstedError> {
    let newick = match fields.remove("newick") {
        Some(Value::String(newick)) => Some(newick),
        _ => None,
    };

    let nodes = match fields.remove("nodes") {
        Some(Value::Object(nodes)) if !nodes.is_empty() => split_node_records(nodes)?,
        Some(Value::Array(nodes)) if !nodes.is_empty() => {
            let keyed = nodes
                .into_iter()
                .filter_map(|node| {
                    let name = node.get("sequence_id").and_then(id_string)?;
                    Some((name, node))
                })
                .collect();
            split_node_records(keyed)?
        }
        _ => NodeTable::default(),
    };

    Ok(SourceTree {
        fields,
        topology: newick.map(Topology::Newick),
        nodes,
        naive_optional: false,
    })
}

/// Moves node sequences into their own tables; everything else stays as metadata.
///
/// A sequence table exists only when some record carries that sequence field, so trees
/// without sequences get null sequences instead of failing the coverage check.
fn split_node_records(nodes: Map<String, Value>) -> Result<NodeTable, OlmstedError> {
    let mut records = Vec::with_capacity(nodes.len());
    for (name, record) in nodes {
        records.push((name, as_object(record, "node")?));
    }
    let [has_nt, has_aa] = SEQUENCE_FIELDS.map(|field| {
        records
            .iter()
            .any(|(_, record)| record.get(field).is_some_and(Value::is_string))
    });

    let mut nt = BTreeMap::new();
    let mut aa = BTreeMap::new();
    let mut metadata = BTreeMap::new();
    for (name, mut record) in records {
        let [nt_seq, aa_seq] = SEQUENCE_FIELDS.map(|field| {
            record
                .remove(field)
                .and_then(|value| value.as_str().map(str::to_string))
        });
        nt.insert(name.clone(), nt_seq);
        aa.insert(name.clone(), aa_seq);
        metadata.insert(name, record);
    }
    Ok(NodeTable {
        nt_sequences: has_nt.then_some(nt),
        aa_sequences: has_aa.then_some(aa),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn splits_sequences_from_metadata() {
        let doc = SourceDocument::Json(json!({
            "dataset_id": "d1",
            "samples": [{"sample_id": "s1", "locus": "igh", "timepoint_id": "t0"}],
            "seeds": [null],
            "clones": [{
                "clone_id": "c1",
                "trees": [{
                    "newick": "(A:0.1)naive:0;",
                    "nodes": {
                        "A": {"sequence_id": "A", "sequence_alignment": "ACGT", "multiplicity": 2},
                        "naive": {"sequence_id": "naive", "sequence_alignment": "ACGA", "sequence_alignment_aa": null}
                    }
                }]
            }]
        }));
        let dataset = AirrJsonAdapter.adapt(doc).unwrap();
        assert_eq!(dataset.samples.len(), 1);
        assert!(dataset.seeds.is_empty());

        let tree = &dataset.clones[0].as_ref().unwrap().trees[0];
        assert_eq!(
            tree.topology,
            Some(Topology::Newick("(A:0.1)naive:0;".to_string()))
        );
        let nt = tree.nodes.nt_sequences.as_ref().unwrap();
        assert_eq!(nt["A"].as_deref(), Some("ACGT"));
        let aa = tree.nodes.aa_sequences.as_ref().unwrap();
        assert_eq!(aa["naive"], None);
        assert_eq!(tree.nodes.metadata["A"]["multiplicity"], json!(2));
        assert!(!tree.nodes.metadata["A"].contains_key("sequence_alignment"));
    }

    #[test]
    fn metadata_only_nodes_have_no_sequence_tables() {
        let doc = SourceDocument::Json(json!({
            "dataset_id": "d1",
            "clones": [{
                "clone_id": "c1",
                "trees": [{
                    "newick": "(A:0.1)naive:0;",
                    "nodes": {"A": {"multiplicity": 2}, "naive": {"multiplicity": null}}
                }]
            }]
        }));
        let dataset = AirrJsonAdapter.adapt(doc).unwrap();
        let nodes = &dataset.clones[0].as_ref().unwrap().trees[0].nodes;
        assert!(nodes.nt_sequences.is_none());
        assert!(nodes.aa_sequences.is_none());
        assert_eq!(nodes.metadata["A"]["multiplicity"], json!(2));
    }

    #[test]
    fn unreadable_clone_is_deferred() {
        let doc = SourceDocument::Json(json!({
            "dataset_id": "d1",
            "clones": [
                {"clone_id": "c1", "trees": "not a list"},
                "not a clone",
                {"clone_id": "c3"}
            ]
        }));
        let dataset = AirrJsonAdapter.adapt(doc).unwrap();
        assert_eq!(dataset.clones.len(), 3);
        assert_matches!(
            &dataset.clones[0],
            Err(RejectedClone { label, error: OlmstedError::InvalidField { .. } }) if label == "c1"
        );
        assert_matches!(
            &dataset.clones[1],
            Err(RejectedClone { label, error }) if label == "#1" && error.is_clone_scoped()
        );
        assert_matches!(&dataset.clones[2], Ok(clone) if clone.clone_id() == Some("c3"));
    }

    #[test]
    fn malformed_dataset_fields_are_dataset_level() {
        let doc = SourceDocument::Json(json!({
            "dataset_id": "d1",
            "samples": [{"locus": "igh"}]
        }));
        let err = AirrJsonAdapter.adapt(doc).unwrap_err();
        assert_matches!(err, OlmstedError::InvalidDataset(_));
        assert!(!err.is_clone_scoped());

        let missing_id = SourceDocument::Json(json!({"clones": []}));
        assert_matches!(
            AirrJsonAdapter.adapt(missing_id),
            Err(OlmstedError::InvalidDataset(_))
        );
    }

    #[test]
    fn rejects_non_object_dataset() {
        assert_matches!(
            AirrJsonAdapter.adapt(SourceDocument::Json(json!([1, 2]))),
            Err(OlmstedError::InvalidInput(_))
        );
    }
}
