use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{InputFormat, Paper, Sample, Seed, SourceDocument, Subject};
use crate::error::OlmstedError;
use crate::remap::{EntityKind, clean_record, remap_fields};
use crate::sources::{
    NodeTable, RejectedClone, SourceAdapter, SourceClone, SourceDataset, SourceTree, Topology,
    as_object, clone_label, id_string, json_kind, take_typed,
};

const DATASET_TYPE: &str = "cft.dataset";
const CLUSTER_TYPE: &str = "cft.cluster";

/// Adapter for pulled entity records of a triple store dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleStoreAdapter;

impl SourceAdapter for TripleStoreAdapter {
    fn format(&self) -> InputFormat {
        InputFormat::TripleStore
    }

    fn adapt(&self, document: SourceDocument) -> Result<SourceDataset, OlmstedError> {
        adapt_dataset(document).map_err(OlmstedError::into_dataset_level)
    }
}

fn adapt_dataset(document: SourceDocument) -> Result<SourceDataset, OlmstedError> {
    let records = match document {
        SourceDocument::Json(Value::Array(records)) => records,
        SourceDocument::Json(record @ Value::Object(_)) => vec![record],
        SourceDocument::Json(other) => {
            return Err(OlmstedError::InvalidInput(format!(
                "pulled records must be an array of objects, got {}",
                json_kind(&other)
            )));
        }
        SourceDocument::Csv(_) => {
            return Err(OlmstedError::UnsupportedFormat(
                "CSV input handed to the triple-store adapter".to_string(),
            ));
        }
    };

    let mut datasets = Vec::new();
    let mut clusters = Vec::new();
    for record in records {
        match record.get("tripl:type").and_then(Value::as_str) {
            Some(DATASET_TYPE) => datasets.push(record),
            Some(CLUSTER_TYPE) => clusters.push(record),
            other => debug!(record_type = ?other, "skipping pulled record"),
        }
    }

    let dataset = match <[Value; 1]>::try_from(datasets) {
        Ok([dataset]) => dataset,
        Err(found) => {
            return Err(OlmstedError::InvalidInput(format!(
                "expected exactly one {DATASET_TYPE} record per file, found {}",
                found.len()
            )));
        }
    };
    let mut dataset = remap_fields(
        EntityKind::Dataset,
        as_object(clean_record(dataset), "dataset record")?,
    );

    let dataset_id = dataset
        .get("dataset_id")
        .and_then(id_string)
        .ok_or_else(|| OlmstedError::MissingField("dataset_id".to_string()))?;

    let mut collected = Collected::default();
    let clones = clusters
        .into_iter()
        .enumerate()
        .map(|(index, cluster)| {
            let label = clone_label(&cluster, "cft.cluster:id", index);
            adapt_cluster(cluster, &mut collected)
                .map_err(|error| RejectedClone::new(label, error))
        })
        .collect();

    Ok(SourceDataset {
        format: InputFormat::TripleStore,
        ident: dataset.get("ident").and_then(id_string),
        dataset_id,
        dataset_type: dataset.get("type").and_then(id_string),
        build: take_relation(&mut dataset, "build", "dataset build")?,
        paper: take_relation::<Paper>(&mut dataset, "paper", "dataset paper")?,
        samples: collected.samples,
        subjects: collected.subjects,
        seeds: collected.seeds,
        clones,
    })
}

/// Samples, subjects and seeds met while walking the clusters, first occurrence wins.
#[derive(Debug, Default)]
struct Collected {
    samples: Vec<Sample>,
    subjects: Vec<Subject>,
    seeds: Vec<Seed>,
}

fn adapt_cluster(cluster: Value, collected: &mut Collected) -> Result<SourceClone, OlmstedError> {
    let mut fields = remap_fields(
        EntityKind::Clone,
        as_object(clean_record(cluster), "cluster record")?,
    );
    let entity = fields
        .get("clone_id")
        .and_then(id_string)
        .unwrap_or_else(|| "cluster".to_string());

    if let Some(sample) = take_relation::<Sample>(&mut fields, "sample", &entity)? {
        fields
            .entry("sample_id")
            .or_insert_with(|| Value::String(sample.sample_id.clone()));
        if !collected.samples.iter().any(|s| s.sample_id == sample.sample_id) {
            collected.samples.push(sample);
        }
    }
    if let Some(subject) = take_relation::<Subject>(&mut fields, "subject", &entity)? {
        fields
            .entry("subject_id")
            .or_insert_with(|| Value::String(subject.subject_id.clone()));
        if !collected
            .subjects
            .iter()
            .any(|s| s.subject_id == subject.subject_id)
        {
            collected.subjects.push(subject);
        }
    }
    if let Some(seed) = take_relation::<Seed>(&mut fields, "seed", &entity)? {
        fields
            .entry("seed_id")
            .or_insert_with(|| Value::String(seed.seed_id.clone()));
        if !collected.seeds.iter().any(|s| s.seed_id == seed.seed_id) {
            collected.seeds.push(seed);
        }
    }
    if let Some(Value::Object(dataset)) = fields.remove("dataset") {
        if let Some(dataset_id) = dataset.get("dataset_id").and_then(id_string) {
            fields
                .entry("dataset_id")
                .or_insert(Value::String(dataset_id));
        }
    }

    let trees = match fields.remove("trees") {
        Some(Value::Array(trees)) => trees
            .into_iter()
            .map(|tree| adapt_reconstruction(as_object(tree, "reconstruction record")?))
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![adapt_reconstruction(as_object(other, "reconstruction record")?)?],
    };

    Ok(SourceClone { fields, trees })
}

fn adapt_reconstruction(mut fields: Map<String, Value>) -> Result<SourceTree, OlmstedError> {
    let asr_tree = fields.remove("asr_tree").map(first_of);
    let newick = match fields.remove("newick") {
        Some(Value::String(newick)) => Some(newick),
        _ => asr_tree
            .as_ref()
            .and_then(|tree| tree.get("contents"))
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let nt_sequences = fields
        .remove("asr_seqs")
        .map(|seqs| sequence_table(first_of(seqs)))
        .transpose()?;
    let aa_sequences = fields
        .remove("cluster_aa")
        .map(|seqs| sequence_table(first_of(seqs)))
        .transpose()?;

    let mut metadata = BTreeMap::new();
    if let Some(seqmeta) = fields.remove("seqmeta").map(first_of) {
        let rows = match seqmeta.get("data") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        for row in rows {
            let row = remap_fields(EntityKind::Node, as_object(row, "seqmeta row")?);
            match row.get("sequence_id").and_then(id_string) {
                Some(name) => {
                    metadata.insert(name, row);
                }
                None => debug!("seqmeta row without a sequence id"),
            }
        }
    }

    Ok(SourceTree {
        fields,
        topology: newick.map(Topology::Newick),
        nodes: NodeTable {
            nt_sequences,
            aa_sequences,
            metadata,
        },
        naive_optional: false,
    })
}

/// Reads a `{set: [{id, seq}]}` record into a name-to-sequence table.
fn sequence_table(record: Value) -> Result<BTreeMap<String, Option<String>>, OlmstedError> {
    let entries = match record.get("set") {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(Value::Null) | None => &[],
        Some(other) => {
            return Err(OlmstedError::InvalidInput(format!(
                "sequence set must be an array, got {}",
                json_kind(other)
            )));
        }
    };
    let mut table = BTreeMap::new();
    for entry in entries {
        let Some(id) = entry.get("id").and_then(id_string) else {
            debug!("sequence record without an id");
            continue;
        };
        let seq = entry
            .get("seq")
            .and_then(Value::as_str)
            .map(str::to_string);
        table.insert(id, seq);
    }
    Ok(table)
}

/// To-one relations may be pulled as a single-element list.
fn first_of(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

fn take_relation<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    key: &str,
    entity: &str,
) -> Result<Option<T>, OlmstedError> {
    if let Some(value) = fields.remove(key) {
        fields.insert(key.to_string(), first_of(value));
    }
    take_typed(fields, key, entity)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn pulled() -> Value {
        json!([
            {
                "tripl:type": "cft.dataset",
                "db:ident": "ds-ident",
                "cft.dataset:id": "laura-mb",
                "cft.dataset:build": {"cft.build:commit": "abc123", "cft.build:time": "2018"}
            },
            {
                "tripl:type": "cft.cluster",
                "db:ident": "c-ident",
                "cft.cluster:id": "c1",
                "cft.cluster:v_start": 0,
                "cft.cluster:sample": {"db:ident": "s", "cft.sample:id": "s1", "cft.sample:timepoint": "t0", "cft.sample:locus": "igh"},
                "cft.cluster:subject": {"cft.subject:id": "QA255"},
                "cft.reconstruction:_cluster": [{
                    "cft.reconstruction:id": "r1",
                    "cft.reconstruction:asr_tree": {"tripl.file:contents": "(A:1)naive;"},
                    "cft.reconstruction:asr_seqs": {"bio.seq:set": [
                        {"bio.seq:id": "A", "bio.seq:seq": "ACGT"},
                        {"bio.seq:id": "naive", "bio.seq:seq": "ACGA"}
                    ]},
                    "cft.reconstruction:seqmeta": {"tripl.csv:data": [
                        {"bio.seq:id": "A", "cft.seq:multiplicity": "3", "cft.seq:timepoints": "t0:t1"}
                    ]}
                }]
            }
        ])
    }

    #[test]
    fn adapts_pulled_records() {
        let dataset = TripleStoreAdapter
            .adapt(SourceDocument::Json(pulled()))
            .unwrap();
        assert_eq!(dataset.dataset_id, "laura-mb");
        assert_eq!(dataset.ident.as_deref(), Some("ds-ident"));
        assert_eq!(dataset.build.unwrap().commit, "abc123");
        assert_eq!(dataset.samples[0].sample_id, "s1");
        assert_eq!(dataset.subjects[0].subject_id, "QA255");

        let clone = dataset.clones[0].as_ref().unwrap();
        assert_eq!(clone.clone_id(), Some("c1"));
        assert_eq!(clone.fields["v_alignment_start"], json!(1));
        assert_eq!(clone.fields["sample_id"], json!("s1"));
        assert!(!clone.fields.contains_key("sample"));

        let tree = &clone.trees[0];
        assert_eq!(
            tree.topology,
            Some(Topology::Newick("(A:1)naive;".to_string()))
        );
        assert_eq!(tree.fields["tree_id"], json!("r1"));
        let nt = tree.nodes.nt_sequences.as_ref().unwrap();
        assert_eq!(nt["A"].as_deref(), Some("ACGT"));
        assert!(tree.nodes.aa_sequences.is_none());
        assert_eq!(tree.nodes.metadata["A"]["multiplicity"], json!("3"));
    }

    #[test]
    fn bad_cluster_is_deferred() {
        let mut records = pulled();
        records.as_array_mut().unwrap().push(json!({
            "tripl:type": "cft.cluster",
            "cft.cluster:id": "c2",
            "cft.cluster:sample": {"cft.sample:locus": "igh"}
        }));
        let dataset = TripleStoreAdapter
            .adapt(SourceDocument::Json(records))
            .unwrap();
        assert_eq!(dataset.clones.len(), 2);
        assert!(dataset.clones[0].is_ok());
        assert_matches!(
            &dataset.clones[1],
            Err(RejectedClone { label, error: OlmstedError::InvalidField { .. } }) if label == "c2"
        );
        assert_eq!(dataset.samples.len(), 1);
    }

    #[test]
    fn dataset_without_id_is_dataset_level() {
        let doc = SourceDocument::Json(json!([{"tripl:type": "cft.dataset"}]));
        assert_matches!(
            TripleStoreAdapter.adapt(doc),
            Err(OlmstedError::InvalidDataset(message)) if message.contains("dataset_id")
        );
    }

    #[test]
    fn requires_exactly_one_dataset() {
        let doc = SourceDocument::Json(json!([{"tripl:type": "cft.cluster"}]));
        assert_matches!(
            TripleStoreAdapter.adapt(doc),
            Err(OlmstedError::InvalidInput(_))
        );
    }
}
