use serde_json::{Value, json};

use olmsted_prep::remap::{to_canonical_start, to_internal_start};
use olmsted_prep::schema::{SchemaValidator, schema_document, schemas};

fn broken_clone() -> Value {
    json!({
        "clone_id": "c1",
        "ident": "i1",
        "unique_seqs_count": 0,
        "mean_mut_freq": -0.5,
        "v_alignment_start": "one",
        "v_alignment_end": 290,
        "j_alignment_end": 360,
        "trees": [{
            "ident": "t1",
            "clone_id": "c1",
            "newick": "(A:1)naive;",
            "nodes": {
                "A": {"sequence_id": "A", "type": "twig"}
            }
        }]
    })
}

#[test]
fn validation_is_deterministic() {
    let instance = broken_clone();
    let first = schemas().unwrap().clone.validate(&instance);
    let second = schemas().unwrap().clone.validate(&instance);
    assert!(!first.is_empty());
    assert_eq!(first, second);

    let paths = first
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>();
    let again = second
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>();
    assert_eq!(paths, again);
}

#[test]
fn nested_node_errors_point_into_the_tree() {
    let violations = schemas().unwrap().clone.validate(&broken_clone());
    let rendered = violations
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>();
    assert!(
        rendered.iter().any(|line| line.contains("trees") && line.contains("twig")),
        "{rendered:?}"
    );
    assert!(rendered.iter().any(|line| line.contains("j_alignment_start")));
}

#[test]
fn null_d_segment_is_accepted() {
    let clone = json!({
        "clone_id": "c1",
        "ident": "i1",
        "unique_seqs_count": 1,
        "mean_mut_freq": 0.0,
        "v_alignment_start": 1,
        "v_alignment_end": 290,
        "j_alignment_start": 320,
        "j_alignment_end": 360,
        "d_call": null,
        "d_alignment_start": null,
        "d_alignment_end": null,
        "seed_id": null
    });
    assert!(schemas().unwrap().clone.is_valid(&clone));
}

#[test]
fn start_offsets_round_trip() {
    for canonical in [1_u64, 2, 289, 100_000] {
        assert_eq!(to_canonical_start(to_internal_start(canonical)), canonical);
    }
    assert_eq!(to_internal_start(0), 0);
}

#[test]
fn exported_document_is_draft_04() {
    let document = schema_document();
    assert_eq!(
        document["$schema"],
        json!("http://json-schema.org/draft-04/schema#")
    );
    assert_eq!(document["title"], json!("Olmsted Dataset"));
    assert_eq!(document["type"], json!("object"));
    let node = &document["properties"]["clones"]["items"]["properties"]["trees"]["items"];
    assert_eq!(node["title"], json!("Tree summary"));
}

#[test]
fn exported_document_compiles_and_accepts_a_minimal_dataset() {
    let validator = SchemaValidator::new(&schema_document()).unwrap();
    let dataset = json!({
        "ident": "5d3f0c1e",
        "dataset_id": "laura-mb",
        "schema_version": "2.0.0",
        "clones": []
    });
    assert!(validator.is_valid(&dataset));

    let violations = validator.validate(&json!({"dataset_id": 7, "schema_version": "2.0.0"}));
    let rendered = violations
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>();
    assert!(rendered.iter().any(|line| line.contains("ident")), "{rendered:?}");
    assert!(
        rendered.iter().any(|line| line.starts_with("[\"dataset_id\"]")),
        "{rendered:?}"
    );
}
