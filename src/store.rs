use std::fs;
use std::io::Write;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::Builder;
use tracing::info;

use crate::assemble::AssembledDataset;
use crate::domain::{ClonalFamily, Dataset, Tree};
use crate::error::OlmstedError;

static FILE_COMPONENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$"));

/// Ids end up in file names, so they must not carry separators or start with a dot.
pub fn check_file_component<'a>(what: &str, id: &'a str) -> Result<&'a str, OlmstedError> {
    let pattern = FILE_COMPONENT
        .as_ref()
        .map_err(|err| OlmstedError::InvalidInput(err.to_string()))?;
    if pattern.is_match(id) {
        Ok(id)
    } else {
        Err(OlmstedError::InvalidDataset(format!(
            "{what} {id:?} cannot be used in an output file name"
        )))
    }
}

/// Checks every id of `entry` that becomes part of an output file name.
pub fn check_output_names(entry: &AssembledDataset) -> Result<(), OlmstedError> {
    check_file_component("dataset_id", &entry.dataset.dataset_id)?;
    for tree in &entry.trees {
        check_file_component("tree ident", &tree.summary.ident)?;
    }
    Ok(())
}

/// Output directory layout: `datasets.json`, `clones.<dataset_id>.json`, `tree.<ident>.json`.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn datasets_path(&self) -> Utf8PathBuf {
        self.root.join("datasets.json")
    }

    pub fn clones_path(&self, dataset_id: &str) -> Utf8PathBuf {
        self.root.join(format!("clones.{dataset_id}.json"))
    }

    pub fn tree_path(&self, tree_ident: &str) -> Utf8PathBuf {
        self.root.join(format!("tree.{tree_ident}.json"))
    }

    pub fn ensure_root(&self) -> Result<(), OlmstedError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| OlmstedError::Filesystem(format!("create {}: {err}", self.root)))
    }

    /// Writes every dataset, its clones and its trees. Returns the paths written.
    pub fn write_all(
        &self,
        assembled: &[AssembledDataset],
    ) -> Result<Vec<Utf8PathBuf>, OlmstedError> {
        for entry in assembled {
            check_output_names(entry)?;
        }

        self.ensure_root()?;
        let mut written = Vec::new();

        let datasets = assembled
            .iter()
            .map(|entry| &entry.dataset)
            .collect::<Vec<&Dataset>>();
        written.push(self.write_json(&self.datasets_path(), &datasets)?);

        for entry in assembled {
            let clones: &[ClonalFamily] = &entry.clones;
            let path = self.clones_path(&entry.dataset.dataset_id);
            written.push(self.write_json(&path, &clones)?);
            for tree in &entry.trees {
                written.push(self.write_tree(tree)?);
            }
        }
        Ok(written)
    }

    pub fn write_tree(&self, tree: &Tree) -> Result<Utf8PathBuf, OlmstedError> {
        self.write_json(&self.tree_path(&tree.summary.ident), tree)
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Utf8Path,
        value: &T,
    ) -> Result<Utf8PathBuf, OlmstedError> {
        info!("writing {path}");
        write_json_atomic(path, value)?;
        Ok(path.to_path_buf())
    }
}

/// Four-space indented JSON, the layout the viewer's fixtures use.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, OlmstedError> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|err| OlmstedError::Json(err.to_string()))?;
    out.push(b'\n');
    Ok(out)
}

pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), OlmstedError> {
    write_bytes_atomic(path, &to_json_pretty(value)?)
}

/// Writes through a temp file in the destination directory, then persists over `path`.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), OlmstedError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| OlmstedError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = Builder::new()
        .prefix(".olmsted-prep")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| OlmstedError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| OlmstedError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| OlmstedError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn layout_paths() {
        let store = OutputStore::new(Utf8PathBuf::from("out"));
        assert!(store.datasets_path().ends_with("datasets.json"));
        assert!(store.clones_path("laura-mb").ends_with("clones.laura-mb.json"));
        assert!(store.tree_path("abc").ends_with("tree.abc.json"));
    }

    #[test]
    fn file_components_reject_separators() {
        assert!(check_file_component("dataset_id", "laura-mb.v2").is_ok());
        assert!(check_file_component("dataset_id", "../etc").is_err());
        assert!(check_file_component("dataset_id", "a/b").is_err());
        assert!(check_file_component("dataset_id", "").is_err());
        let err = check_file_component("dataset_id", "laura mb").unwrap_err();
        assert!(!err.is_clone_scoped());
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let bytes = to_json_pretty(&json!({"a": 1})).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "{\n    \"a\": 1\n}\n");
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("datasets.json")).unwrap();
        write_json_atomic(&path, &json!([1])).unwrap();
        write_json_atomic(&path, &json!([2])).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains('2'));
        assert!(!text.contains('1'));
    }
}
