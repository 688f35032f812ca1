use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use olmsted_prep::config::{ConfigLoader, Overrides};
use olmsted_prep::domain::{Coordinates, ValidationMode};
use olmsted_prep::error::OlmstedError;

fn write_config(dir: &tempfile::TempDir, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("olmsted-prep.json")).unwrap();
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn file_values_apply() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"{"naive_name": "germline", "reroot": true, "validation": "lenient", "coordinates": "zero-based"}"#,
    );
    let resolved =
        ConfigLoader::resolve(Some(path.as_path()), Overrides::default()).unwrap();
    assert_eq!(resolved.assembly.naive_name, "germline");
    assert!(resolved.assembly.reroot);
    assert_eq!(resolved.assembly.validation, ValidationMode::Lenient);
    assert_eq!(resolved.assembly.coordinates, Coordinates::ZeroBased);
}

#[test]
fn file_supplies_companion_tree_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"pcp_trees": "trees/pcp_trees.csv"}"#);
    let resolved =
        ConfigLoader::resolve(Some(path.as_path()), Overrides::default()).unwrap();
    assert_eq!(
        resolved.pcp_trees,
        Some(Utf8PathBuf::from("trees/pcp_trees.csv"))
    );

    let config = ConfigLoader::read(&path).unwrap();
    let written = serde_json::to_value(&config).unwrap();
    assert_eq!(written["pcp_trees"], "trees/pcp_trees.csv");
}

#[test]
fn command_line_wins_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"{"naive_name": "germline", "coordinates": "zero-based", "pcp_trees": "a.csv"}"#,
    );
    let overrides = Overrides {
        naive_name: Some("naive".to_string()),
        coordinates: Some(Coordinates::Airr),
        pcp_trees: Some(Utf8PathBuf::from("b.csv")),
        remove_invalid_clones: true,
        ..Overrides::default()
    };
    let resolved = ConfigLoader::resolve(Some(path.as_path()), overrides).unwrap();
    assert_eq!(resolved.assembly.naive_name, "naive");
    assert_eq!(resolved.assembly.coordinates, Coordinates::Airr);
    assert_eq!(resolved.assembly.validation, ValidationMode::Lenient);
    assert_eq!(resolved.pcp_trees, Some(Utf8PathBuf::from("b.csv")));
}

#[test]
fn bad_json_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "{naive_name: germline}");
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path()), Overrides::default()),
        Err(OlmstedError::ConfigParse(_))
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"naive": "germline"}"#);
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path()), Overrides::default()),
        Err(OlmstedError::ConfigParse(_))
    );
}

#[test]
fn missing_explicit_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.json")).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path()), Overrides::default()),
        Err(OlmstedError::ConfigRead(_))
    );
}
