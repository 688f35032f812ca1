use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::START_POSITION_FIELDS;

/// Entity kinds that carry their own internal-to-canonical rename table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Dataset,
    Clone,
    Tree,
    Node,
    Sample,
    Subject,
    Seed,
}

impl EntityKind {
    fn renames(self) -> &'static [(&'static str, &'static str)] {
        match self {
            EntityKind::Dataset => &[("id", "dataset_id")],
            EntityKind::Clone => &[
                ("id", "clone_id"),
                ("n_seqs", "unique_seqs_count"),
                ("size", "total_read_count"),
                ("v_start", "v_alignment_start"),
                ("v_end", "v_alignment_end"),
                ("v_gene", "v_call"),
                ("d_start", "d_alignment_start"),
                ("d_end", "d_alignment_end"),
                ("d_gene", "d_call"),
                ("j_start", "j_alignment_start"),
                ("j_end", "j_alignment_end"),
                ("j_gene", "j_call"),
                ("cdr3_length", "junction_length"),
                ("cdr3_start", "junction_start"),
                ("naive_seq", "germline_alignment"),
                ("reconstructions", "trees"),
            ],
            EntityKind::Tree => &[
                ("id", "tree_id"),
                ("prune_strategy", "downsampling_strategy"),
                ("prune_count", "downsampled_count"),
                ("newick_string", "newick"),
            ],
            EntityKind::Node => &[
                ("id", "sequence_id"),
                ("nt_seq", "sequence_alignment"),
                ("aa_seq", "sequence_alignment_aa"),
                ("timepoint", "timepoint_id"),
            ],
            EntityKind::Sample => &[("id", "sample_id"), ("timepoint", "timepoint_id")],
            EntityKind::Subject => &[("id", "subject_id")],
            EntityKind::Seed => &[("id", "seed_id")],
        }
    }

    /// Nested relations (by canonical key) and the kind of record they hold.
    fn children(self) -> &'static [(&'static str, EntityKind)] {
        match self {
            EntityKind::Dataset => &[
                ("samples", EntityKind::Sample),
                ("subjects", EntityKind::Subject),
                ("seeds", EntityKind::Seed),
                ("clones", EntityKind::Clone),
            ],
            EntityKind::Clone => &[
                ("sample", EntityKind::Sample),
                ("subject", EntityKind::Subject),
                ("seed", EntityKind::Seed),
                ("dataset", EntityKind::Dataset),
                ("trees", EntityKind::Tree),
            ],
            EntityKind::Tree => &[("nodes", EntityKind::Node)],
            EntityKind::Node | EntityKind::Sample | EntityKind::Subject | EntityKind::Seed => &[],
        }
    }
}

/// Reverse relations are keyed by the plural of the owning entity's type.
const PLURALS: [(&str, &str); 10] = [
    ("cluster", "clusters"),
    ("reconstruction", "reconstructions"),
    ("partition", "partitions"),
    ("subject", "subjects"),
    ("sample", "samples"),
    ("seed", "seeds"),
    ("timepoint", "timepoints"),
    ("dataset", "datasets"),
    ("gene_support", "gene_supports"),
    ("node", "nodes"),
];

pub fn plural(entity: &str) -> String {
    PLURALS
        .iter()
        .find(|(singular, _)| *singular == entity)
        .map(|(_, plural)| plural.to_string())
        .unwrap_or_else(|| format!("{entity}s"))
}

/// Reduces a namespaced key such as `cft.cluster:v_start` to `v_start`.
///
/// Reverse-relation keys (`cft.reconstruction:_cluster`) become the plural of the owning
/// entity type (`reconstructions`).
pub fn strip_namespace(key: &str) -> String {
    let Some((namespace, attribute)) = key.rsplit_once(':') else {
        return key.rsplit('/').next().unwrap_or(key).to_string();
    };
    if attribute.starts_with('_') {
        let entity = namespace.rsplit('.').next().unwrap_or(namespace);
        return plural(entity);
    }
    attribute.rsplit('/').next().unwrap_or(attribute).to_string()
}

/// Strips namespaces from every key, recursively.
pub fn clean_record(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(clean_record).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (strip_namespace(&key), clean_record(value)))
                .collect(),
        ),
        other => other,
    }
}

pub fn finite_or_none(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// 0-based half-open start to 1-based closed start.
pub fn to_canonical_start(internal: u64) -> u64 {
    internal + 1
}

/// 1-based closed start to 0-based half-open start. A `0` placeholder stays `0`.
pub fn to_internal_start(canonical: u64) -> u64 {
    canonical.saturating_sub(1)
}

/// Renames internal attribute names to canonical ones, recursing into nested relations.
///
/// Only renamed start positions get the +1 offset, so a record that is already canonical
/// passes through unchanged.
pub fn remap_fields(kind: EntityKind, record: Map<String, Value>) -> Map<String, Value> {
    let renames = kind.renames();
    let mut renamed = Map::new();
    let mut pending = Vec::new();

    for (key, value) in record {
        match renames.iter().find(|(internal, _)| *internal == key) {
            Some((_, canonical)) => pending.push((*canonical, value)),
            None => {
                renamed.insert(key, value);
            }
        }
    }

    for (canonical, value) in pending {
        if renamed.contains_key(canonical) {
            debug!(field = canonical, "canonical field already present; internal value dropped");
            continue;
        }
        let value = if START_POSITION_FIELDS.contains(&canonical) {
            offset_start(value)
        } else {
            value
        };
        renamed.insert(canonical.to_string(), value);
    }

    for (key, child_kind) in kind.children() {
        if let Some(value) = renamed.remove(*key) {
            renamed.insert(key.to_string(), remap_value(*child_kind, value));
        }
    }
    renamed
}

fn remap_value(kind: EntityKind, value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(remap_fields(kind, map)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| remap_value(kind, item))
                .collect(),
        ),
        other => other,
    }
}

fn offset_start(value: Value) -> Value {
    match value.as_u64() {
        Some(internal) => Value::from(to_canonical_start(internal)),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_namespaces() {
        assert_eq!(strip_namespace("cft.cluster:v_start"), "v_start");
        assert_eq!(strip_namespace("db:ident"), "ident");
        assert_eq!(strip_namespace("tripl.file/contents"), "contents");
        assert_eq!(strip_namespace("plain"), "plain");
    }

    #[test]
    fn reverse_relations_pluralize() {
        assert_eq!(strip_namespace("cft.reconstruction:_cluster"), "reconstructions");
        assert_eq!(strip_namespace("cft.partition:_sample"), "partitions");
        assert_eq!(strip_namespace("cft.cluster:_dataset"), "clusters");
        assert_eq!(strip_namespace("cft.widget:_dataset"), "widgets");
    }

    #[test]
    fn clean_record_recurses() {
        let cleaned = clean_record(json!({
            "cft.cluster:id": "c1",
            "cft.cluster:sample": {"cft.sample:id": "s1"},
            "cft.reconstruction:_cluster": [{"cft.reconstruction:id": "r1"}]
        }));
        assert_eq!(
            cleaned,
            json!({"id": "c1", "sample": {"id": "s1"}, "reconstructions": [{"id": "r1"}]})
        );
    }

    #[test]
    fn remap_applies_offsets_once() {
        let record = json!({
            "id": "c1",
            "v_start": 0,
            "v_end": 290,
            "d_start": null,
            "cdr3_start": 288,
            "sample": {"id": "s1", "timepoint": "t0"},
            "reconstructions": [{"id": "r1", "prune_count": 100}]
        });
        let Value::Object(map) = record else { unreachable!() };
        let remapped = remap_fields(EntityKind::Clone, map);
        assert_eq!(remapped["clone_id"], json!("c1"));
        assert_eq!(remapped["v_alignment_start"], json!(1));
        assert_eq!(remapped["v_alignment_end"], json!(290));
        assert_eq!(remapped["d_alignment_start"], Value::Null);
        assert_eq!(remapped["junction_start"], json!(289));
        assert_eq!(remapped["sample"], json!({"sample_id": "s1", "timepoint_id": "t0"}));
        assert_eq!(
            remapped["trees"],
            json!([{"tree_id": "r1", "downsampled_count": 100}])
        );

        let again = remap_fields(EntityKind::Clone, remapped.clone());
        assert_eq!(again, remapped);
    }

    #[test]
    fn canonical_and_internal_names_do_not_overlap() {
        for kind in [
            EntityKind::Dataset,
            EntityKind::Clone,
            EntityKind::Tree,
            EntityKind::Node,
            EntityKind::Sample,
            EntityKind::Subject,
            EntityKind::Seed,
        ] {
            for (_, canonical) in kind.renames() {
                assert!(
                    !kind.renames().iter().any(|(internal, _)| internal == canonical),
                    "{canonical} is both a source and a target"
                );
            }
        }
    }

    #[test]
    fn offset_round_trip() {
        for internal in [0_u64, 1, 2, 287, u32::MAX as u64] {
            assert_eq!(to_internal_start(to_canonical_start(internal)), internal);
        }
    }
}
