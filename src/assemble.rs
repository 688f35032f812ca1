use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::annotate::{annotate_tree, parse_count};
use crate::domain::{
    ClonalFamily, CloneFields, Coordinates, Dataset, DatasetRef, SCHEMA_VERSION, Tree,
    TreeSummary, ValidationMode,
};
use crate::error::OlmstedError;
use crate::remap::to_internal_start;
use crate::schema::schemas;
use crate::sources::{SourceClone, SourceDataset, SourceTree, Topology, id_string};
use crate::tree_builder::{build_topology, reroot};

/// Knobs that shape one assembly run.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyOptions {
    pub naive_name: String,
    pub reroot: bool,
    pub validation: ValidationMode,
    pub coordinates: Coordinates,
    pub schema_version: String,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            naive_name: "naive".to_string(),
            reroot: false,
            validation: ValidationMode::Strict,
            coordinates: Coordinates::Airr,
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneFailure {
    pub clone_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub dataset_id: String,
    pub total_clones: usize,
    pub dropped_clones: usize,
    pub failures: Vec<CloneFailure>,
}

#[derive(Debug, Clone)]
pub struct AssembledDataset {
    pub dataset: Dataset,
    pub clones: Vec<ClonalFamily>,
    pub trees: Vec<Tree>,
    pub report: DatasetReport,
}

/// Builds output records for every clone of `source`.
///
/// In strict mode the first failing clone aborts the dataset. In lenient mode failing clones
/// are dropped and listed in the report.
pub fn assemble_dataset(
    source: SourceDataset,
    options: &AssemblyOptions,
) -> Result<AssembledDataset, OlmstedError> {
    let total_clones = source.clones.len();
    let mut clones = Vec::new();
    let mut trees = Vec::new();
    let mut failures = Vec::new();

    for (index, adapted) in source.clones.into_iter().enumerate() {
        let (label, assembled) = match adapted {
            Ok(clone) => (
                clone
                    .clone_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("#{index}")),
                assemble_clone(clone, options),
            ),
            Err(rejected) => (rejected.label, Err(rejected.error)),
        };
        match assembled {
            Ok((family, family_trees)) => {
                clones.push(family);
                trees.extend(family_trees);
            }
            Err(err) if err.is_clone_scoped() && options.validation == ValidationMode::Lenient => {
                debug!(clone = label.as_str(), error = %err, "clone rejected");
                warn!("dropping clone {label}: {}", first_line(&err));
                failures.push(CloneFailure {
                    clone_id: label,
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    if !failures.is_empty() {
        warn!(
            "{} of {total_clones} clones failed and were dropped from {}",
            failures.len(),
            source.dataset_id
        );
    }

    let subjects_count = clones
        .iter()
        .filter_map(|clone| clone.fields.subject_id.as_deref())
        .collect::<BTreeSet<_>>()
        .len();
    let timepoints_count = source
        .samples
        .iter()
        .filter_map(|sample| sample.timepoint_id.as_deref())
        .collect::<BTreeSet<_>>()
        .len();

    let dataset = Dataset {
        ident: source.ident.unwrap_or_else(new_ident),
        dataset_id: source.dataset_id,
        schema_version: options.schema_version.clone(),
        dataset_type: source.dataset_type,
        build: source.build,
        paper: source.paper,
        samples: source.samples,
        subjects: source.subjects,
        seeds: source.seeds,
        clone_count: clones.len(),
        subjects_count,
        timepoints_count,
    };

    let mut document = to_value(&dataset)?;
    if let Value::Object(map) = &mut document {
        let summaries = clones.iter().map(to_value).collect::<Result<Vec<_>, _>>()?;
        map.insert("clones".to_string(), Value::Array(summaries));
    }
    schemas()?
        .dataset
        .ensure_valid(&document, &format!("Dataset {}", dataset.dataset_id))?;

    let nested = DatasetRef::from(&dataset);
    for clone in &mut clones {
        clone.sample = clone.fields.sample_id.as_deref().and_then(|sample_id| {
            dataset
                .samples
                .iter()
                .find(|sample| sample.sample_id == sample_id)
                .cloned()
        });
        if clone.sample.is_none() {
            debug!(clone = clone.clone_id.as_str(), "clone has no matching sample");
        }
        clone.dataset = Some(nested.clone());
        if options.coordinates == Coordinates::ZeroBased {
            to_zero_based(&mut clone.fields);
        }
    }

    let report = DatasetReport {
        dataset_id: dataset.dataset_id.clone(),
        total_clones,
        dropped_clones: failures.len(),
        failures,
    };
    Ok(AssembledDataset {
        dataset,
        clones,
        trees,
        report,
    })
}

/// Builds one clonal family and its full trees, then checks them against the clone schema.
pub fn assemble_clone(
    clone: SourceClone,
    options: &AssemblyOptions,
) -> Result<(ClonalFamily, Vec<Tree>), OlmstedError> {
    let SourceClone { fields, trees } = clone;
    let mut fields: CloneFields =
        serde_json::from_value(Value::Object(fields)).map_err(|err| OlmstedError::InvalidField {
            entity: "clone".to_string(),
            message: err.to_string(),
        })?;
    let clone_id = fields
        .clone_id
        .take()
        .ok_or_else(|| OlmstedError::MissingField("clone_id".to_string()))?;
    let ident = fields.ident.take().unwrap_or_else(new_ident);
    for owned in ["trees", "sample", "dataset"] {
        fields.extra.remove(owned);
    }

    let trees = trees
        .into_iter()
        .map(|tree| assemble_tree(tree, &clone_id, options))
        .collect::<Result<Vec<_>, _>>()?;

    let family = ClonalFamily {
        ident,
        clone_id,
        fields,
        trees: trees.iter().map(|tree| tree.summary.clone()).collect(),
        sample: None,
        dataset: None,
    };

    let mut document = to_value(&family)?;
    if let Value::Object(map) = &mut document {
        let full = trees.iter().map(to_value).collect::<Result<Vec<_>, _>>()?;
        map.insert("trees".to_string(), Value::Array(full));
    }
    schemas()?
        .clone
        .ensure_valid(&document, &format!("Clone {}", family.clone_id))?;

    Ok((family, trees))
}

fn assemble_tree(
    tree: SourceTree,
    clone_id: &str,
    options: &AssemblyOptions,
) -> Result<Tree, OlmstedError> {
    let SourceTree {
        mut fields,
        topology,
        nodes,
        naive_optional,
    } = tree;
    let topology = topology.ok_or_else(|| {
        OlmstedError::MissingField(format!("newick for a tree of clone {clone_id}"))
    })?;

    let phylo = build_topology(&topology, None)?;
    let (phylo, origin) = if naive_optional && phylo.find(&options.naive_name).is_none() {
        let root_name = phylo.node(phylo.root()).name.clone();
        debug!(
            clone = clone_id,
            root = root_name.as_str(),
            "no naive node, measuring distances from the root"
        );
        (phylo, root_name)
    } else if options.reroot {
        (
            reroot(phylo, &options.naive_name)?,
            options.naive_name.clone(),
        )
    } else {
        (phylo, options.naive_name.clone())
    };
    let annotated = annotate_tree(&phylo, &nodes, &origin)?;

    let newick = match topology {
        Topology::Newick(newick) if !options.reroot => newick,
        _ => phylo.to_newick(),
    };

    let summary = TreeSummary {
        ident: fields
            .remove("ident")
            .as_ref()
            .and_then(id_string)
            .unwrap_or_else(new_ident),
        tree_id: fields.remove("tree_id").as_ref().and_then(id_string),
        clone_id: clone_id.to_string(),
        newick,
        downsampling_strategy: fields
            .remove("downsampling_strategy")
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string),
        downsampled_count: fields
            .remove("downsampled_count")
            .as_ref()
            .and_then(parse_count),
        extra: leftover(fields),
    };
    Ok(Tree {
        summary,
        nodes: annotated,
    })
}

fn leftover(mut fields: Map<String, Value>) -> BTreeMap<String, Value> {
    for owned in ["clone_id", "newick", "nodes"] {
        fields.remove(owned);
    }
    fields.into_iter().collect()
}

fn to_zero_based(fields: &mut CloneFields) {
    for start in fields.start_positions_mut() {
        if let Some(position) = start {
            *position = to_internal_start(*position);
        }
    }
}

fn new_ident() -> String {
    Uuid::new_v4().to_string()
}

fn first_line(err: &OlmstedError) -> String {
    err.to_string().lines().next().unwrap_or_default().to_string()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, OlmstedError> {
    serde_json::to_value(value).map_err(|err| OlmstedError::Json(err.to_string()))
}
