use std::collections::BTreeMap;

use csv::ReaderBuilder;
use serde::Deserialize;
use serde_json::{Map, json};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{BuildInfo, InputFormat, Sample, SourceDocument, Subject};
use crate::error::OlmstedError;
use crate::sources::{
    NodeTable, PcpTrees, SourceAdapter, SourceClone, SourceDataset, SourceTree, Topology,
};

pub const PCP_DATASET_TYPE: &str = "pcp.dataset";
pub const PCP_BUILD_COMMIT: &str = "pcp-import";
pub const PCP_SUBJECT_ID: &str = "pcp-subject";
const PCP_LOCUS: &str = "igh";
const PCP_TIMEPOINT: &str = "merged";

#[derive(Debug, Deserialize)]
struct PcpRow {
    sample_id: String,
    parent_name: String,
    child_name: String,
    #[serde(default, alias = "branch_length")]
    edge_length: Option<f64>,
    #[serde(default)]
    sample_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NewickRow {
    family_name: String,
    newick_tree: String,
}

/// One family of parent/child pairs sharing a `sample_id`.
#[derive(Debug, Default)]
struct Family {
    multiplicities: BTreeMap<String, u64>,
    edges: Vec<(String, String, f64)>,
}

impl Family {
    fn add(&mut self, row: PcpRow) {
        self.multiplicities
            .entry(row.parent_name.clone())
            .or_insert(0);
        *self
            .multiplicities
            .entry(row.child_name.clone())
            .or_insert(0) += row.sample_count.unwrap_or(0);
        self.edges.push((
            row.parent_name,
            row.child_name,
            row.edge_length.unwrap_or(0.0),
        ));
    }
}

/// Adapter for parent-child pair CSV tables, optionally paired with companion newick trees.
#[derive(Debug, Clone, Default)]
pub struct PcpCsvAdapter {
    trees: PcpTrees,
}

impl PcpCsvAdapter {
    pub fn new(trees: Option<PcpTrees>) -> Self {
        Self {
            trees: trees.unwrap_or_default(),
        }
    }
}

impl SourceAdapter for PcpCsvAdapter {
    fn format(&self) -> InputFormat {
        InputFormat::PcpCsv
    }

    fn adapt(&self, document: SourceDocument) -> Result<SourceDataset, OlmstedError> {
        let SourceDocument::Csv(text) = document else {
            return Err(OlmstedError::UnsupportedFormat(
                "JSON input handed to the PCP adapter".to_string(),
            ));
        };
        let families = parse_families(&text)?;

        let dataset_id = format!("pcp-{}", Uuid::new_v4());
        let mut samples = Vec::new();
        let mut clones = Vec::new();
        for (index, (family_name, family)) in families.into_iter().enumerate() {
            samples.push(Sample {
                ident: Some(Uuid::new_v4().to_string()),
                sample_id: family_name.clone(),
                locus: Some(PCP_LOCUS.to_string()),
                timepoint_id: Some(PCP_TIMEPOINT.to_string()),
                partitions: Vec::new(),
            });
            clones.push(Ok(self.family_clone(index, &family_name, family, &dataset_id)));
        }

        Ok(SourceDataset {
            format: InputFormat::PcpCsv,
            ident: Some(Uuid::new_v4().to_string()),
            dataset_id,
            dataset_type: Some(PCP_DATASET_TYPE.to_string()),
            build: Some(BuildInfo {
                commit: PCP_BUILD_COMMIT.to_string(),
                time: Some(chrono::Utc::now().to_rfc3339()),
            }),
            paper: None,
            samples,
            subjects: vec![Subject {
                ident: Some(Uuid::new_v4().to_string()),
                subject_id: PCP_SUBJECT_ID.to_string(),
            }],
            seeds: Vec::new(),
            clones,
        })
    }
}

impl PcpCsvAdapter {
    fn family_clone(
        &self,
        index: usize,
        family_name: &str,
        family: Family,
        dataset_id: &str,
    ) -> SourceClone {
        let topology = match self.trees.get(family_name) {
            Some(newick) => Topology::Newick(newick.clone()),
            None => {
                debug!(family = family_name, "building newick from edges");
                Topology::Edges(family.edges)
            }
        };

        let total_read_count: u64 = family.multiplicities.values().sum();
        let metadata = family
            .multiplicities
            .iter()
            .map(|(name, multiplicity)| {
                let mut row = Map::new();
                row.insert("multiplicity".to_string(), json!(multiplicity));
                (name.clone(), row)
            })
            .collect();

        let fields = [
            ("clone_id", json!(format!("family-{index}"))),
            ("dataset_id", json!(dataset_id)),
            ("sample_id", json!(family_name)),
            ("subject_id", json!(PCP_SUBJECT_ID)),
            ("unique_seqs_count", json!(family.multiplicities.len())),
            ("total_read_count", json!(total_read_count)),
            ("mean_mut_freq", json!(0.0)),
            ("v_alignment_start", json!(0)),
            ("v_alignment_end", json!(0)),
            ("j_alignment_start", json!(0)),
            ("j_alignment_end", json!(0)),
            ("v_call", json!("")),
            ("j_call", json!("")),
            ("germline_alignment", json!("")),
            ("has_seed", json!(false)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect::<Map<_, _>>();

        let mut tree_fields = Map::new();
        tree_fields.insert("tree_id".to_string(), json!(format!("pcp-tree-{index}")));

        SourceClone {
            fields,
            trees: vec![SourceTree {
                fields: tree_fields,
                topology: Some(topology),
                nodes: NodeTable {
                    nt_sequences: None,
                    aa_sequences: None,
                    metadata,
                },
                naive_optional: true,
            }],
        }
    }
}

/// Groups rows by `sample_id`, keeping families in first-seen order.
fn parse_families(text: &str) -> Result<Vec<(String, Family)>, OlmstedError> {
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut order: Vec<String> = Vec::new();
    let mut families: BTreeMap<String, Family> = BTreeMap::new();
    for (line, row) in reader.deserialize::<PcpRow>().enumerate() {
        let row = row.map_err(|err| OlmstedError::Csv(format!("row {}: {err}", line + 1)))?;
        if !families.contains_key(&row.sample_id) {
            order.push(row.sample_id.clone());
        }
        families.entry(row.sample_id.clone()).or_default().add(row);
    }
    Ok(order
        .into_iter()
        .filter_map(|name| families.remove(&name).map(|family| (name, family)))
        .collect())
}

/// Parses the companion `family_name,newick_tree` CSV.
pub fn parse_pcp_trees(text: &str) -> Result<PcpTrees, OlmstedError> {
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());
    let mut trees = PcpTrees::new();
    for (line, row) in reader.deserialize::<NewickRow>().enumerate() {
        let row = row.map_err(|err| OlmstedError::Csv(format!("row {}: {err}", line + 1)))?;
        trees.insert(row.family_name, row.newick_tree.trim().to_string());
    }
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const PCP: &str = "sample_id,parent_name,child_name,edge_length,sample_count\n\
                       fam1,naive,A,0.1,2\n\
                       fam1,naive,B,0.2,3\n\
                       fam2,naive,C,0.3,1\n\
                       fam1,naive,B,0.2,4\n";

    #[test]
    fn groups_rows_into_families() {
        let dataset = PcpCsvAdapter::new(None)
            .adapt(SourceDocument::Csv(PCP.to_string()))
            .unwrap();
        assert!(dataset.dataset_id.starts_with("pcp-"));
        assert_eq!(dataset.dataset_type.as_deref(), Some(PCP_DATASET_TYPE));
        assert_eq!(dataset.samples.len(), 2);
        assert_eq!(dataset.samples[0].sample_id, "fam1");
        assert_eq!(dataset.clones.len(), 2);

        let fam1 = dataset.clones[0].as_ref().unwrap();
        assert_eq!(fam1.clone_id(), Some("family-0"));
        assert_eq!(fam1.fields["unique_seqs_count"], json!(3));
        assert_eq!(fam1.fields["total_read_count"], json!(9));

        let tree = &fam1.trees[0];
        assert_matches!(&tree.topology, Some(Topology::Edges(edges)) if edges.len() == 3);
        assert!(tree.naive_optional);
        assert!(tree.nodes.nt_sequences.is_none());
        assert_eq!(tree.nodes.metadata["naive"]["multiplicity"], json!(0));
        assert_eq!(tree.nodes.metadata["B"]["multiplicity"], json!(7));
    }

    #[test]
    fn companion_trees_take_precedence() {
        let trees = parse_pcp_trees("family_name,newick_tree\nfam2,(C:0.3)naive:0;\n").unwrap();
        let dataset = PcpCsvAdapter::new(Some(trees))
            .adapt(SourceDocument::Csv(PCP.to_string()))
            .unwrap();
        let clones = dataset
            .clones
            .iter()
            .map(|clone| clone.as_ref().unwrap())
            .collect::<Vec<_>>();
        assert_matches!(&clones[0].trees[0].topology, Some(Topology::Edges(_)));
        assert_eq!(
            clones[1].trees[0].topology,
            Some(Topology::Newick("(C:0.3)naive:0;".to_string()))
        );
    }

    #[test]
    fn bad_rows_are_csv_errors() {
        let text = "sample_id,parent_name,child_name,edge_length\nfam,naive,A,long\n";
        assert_matches!(
            PcpCsvAdapter::new(None).adapt(SourceDocument::Csv(text.to_string())),
            Err(OlmstedError::Csv(_))
        );
    }
}
