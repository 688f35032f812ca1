use std::collections::BTreeMap;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::{Map, Value, json};

use crate::error::{OlmstedError, PathSegment, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    /// A string that may also be null.
    NullableString,
    Integer,
    Number,
    Boolean,
    Null,
}

impl SchemaType {
    fn name(self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String | SchemaType::NullableString => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        }
    }
}

/// Immutable schema node. Built once, never edited after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    title: Option<String>,
    description: Option<String>,
    types: Vec<SchemaType>,
    required: Vec<String>,
    properties: BTreeMap<String, Schema>,
    items: Option<Box<Schema>>,
    values: Option<Box<Schema>>,
    minimum: Option<f64>,
    allowed: Vec<String>,
}

impl Schema {
    fn of(types: &[SchemaType]) -> Self {
        Self {
            title: None,
            description: None,
            types: types.to_vec(),
            required: Vec::new(),
            properties: BTreeMap::new(),
            items: None,
            values: None,
            minimum: None,
            allowed: Vec::new(),
        }
    }

    pub fn object() -> Self {
        Self::of(&[SchemaType::Object])
    }

    pub fn nullable_object() -> Self {
        Self::of(&[SchemaType::Object, SchemaType::Null])
    }

    pub fn array(items: Schema) -> Self {
        let mut schema = Self::of(&[SchemaType::Array]);
        schema.items = Some(Box::new(items));
        schema
    }

    /// Object whose values all match `values`; keys are free.
    pub fn map_of(values: Schema) -> Self {
        let mut schema = Self::object();
        schema.values = Some(Box::new(values));
        schema
    }

    pub fn string() -> Self {
        Self::of(&[SchemaType::String])
    }

    pub fn nullable_string() -> Self {
        Self::of(&[SchemaType::NullableString])
    }

    pub fn integer() -> Self {
        Self::of(&[SchemaType::Integer])
    }

    pub fn nullable_integer() -> Self {
        Self::of(&[SchemaType::Integer, SchemaType::Null])
    }

    pub fn number() -> Self {
        Self::of(&[SchemaType::Number])
    }

    pub fn nullable_number() -> Self {
        Self::of(&[SchemaType::Number, SchemaType::Null])
    }

    pub fn boolean() -> Self {
        Self::of(&[SchemaType::Boolean])
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = allowed.iter().map(|value| value.to_string()).collect();
        self
    }

    pub fn required(mut self, keys: &[&str]) -> Self {
        self.required = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn property(mut self, key: &str, schema: Schema) -> Self {
        self.properties.insert(key.to_string(), schema);
        self
    }

    pub fn property_schema(&self, key: &str) -> Option<&Schema> {
        self.properties.get(key)
    }

    /// Compiles this schema into a draft-04 validator.
    pub fn compile(&self) -> Result<SchemaValidator, OlmstedError> {
        SchemaValidator::new(&self.to_json())
    }

    /// JSON-Schema (draft 4) rendering; the validator compiles from this.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(title) = &self.title {
            out.insert("title".to_string(), json!(title));
        }
        if let Some(description) = &self.description {
            out.insert("description".to_string(), json!(description));
        }
        let mut names = Vec::new();
        for ty in &self.types {
            names.push(ty.name());
            if *ty == SchemaType::NullableString {
                names.push("null");
            }
        }
        names.dedup();
        match names.as_slice() {
            [] => {}
            [single] => {
                out.insert("type".to_string(), json!(single));
            }
            _ => {
                out.insert("type".to_string(), json!(names));
            }
        }
        if !self.required.is_empty() {
            out.insert("required".to_string(), json!(self.required));
        }
        if let Some(minimum) = self.minimum {
            out.insert("minimum".to_string(), json!(minimum));
        }
        if !self.allowed.is_empty() {
            out.insert("enum".to_string(), json!(self.allowed));
        }
        if !self.properties.is_empty() {
            let properties = self
                .properties
                .iter()
                .map(|(key, schema)| (key.clone(), schema.to_json()))
                .collect::<Map<_, _>>();
            out.insert("properties".to_string(), Value::Object(properties));
        }
        if let Some(items) = &self.items {
            out.insert("items".to_string(), items.to_json());
        }
        if let Some(values) = &self.values {
            out.insert("additionalProperties".to_string(), values.to_json());
        }
        Value::Object(out)
    }
}

fn id(description: &str) -> Schema {
    Schema::string().describe(description)
}

fn ident() -> Schema {
    Schema::string().describe("UUID specific to the given object")
}

fn natural_number(description: &str) -> Schema {
    Schema::integer().minimum(0.0).describe(description)
}

fn nullable_natural_number(description: &str) -> Schema {
    Schema::nullable_integer().minimum(0.0).describe(description)
}

fn multiplicity(description: &str) -> Schema {
    Schema::nullable_integer().minimum(0.0).describe(description)
}

pub fn timepoint_multiplicity_schema() -> Schema {
    Schema::object()
        .title("Timepoint multiplicity")
        .describe("Multiplicity at a specific time.")
        .required(&["timepoint_id"])
        .property(
            "timepoint_id",
            id("Id associated with the timepoint in question"),
        )
        .property(
            "multiplicity",
            multiplicity("Number of times sequence was observed at the given timepoint"),
        )
}

pub fn node_schema() -> Schema {
    Schema::object()
        .title("Node")
        .describe("Information about the phylogenetic tree nodes and the sequences they represent")
        .required(&[
            "sequence_id",
            "sequence_alignment",
            "sequence_alignment_aa",
            "type",
            "parent",
            "length",
            "distance",
        ])
        .property(
            "sequence_id",
            id("AIRR: Identifier for this node that matches the id in the newick string."),
        )
        .property(
            "sequence_alignment",
            Schema::nullable_string()
                .describe("AIRR: Nucleotide sequence of the node, aligned to the germline_alignment."),
        )
        .property(
            "sequence_alignment_aa",
            Schema::nullable_string()
                .describe("Amino acid sequence of the node, aligned to the germline_alignment."),
        )
        .property(
            "type",
            Schema::string()
                .one_of(&["root", "node", "leaf"])
                .describe("Position of the node in the tree"),
        )
        .property(
            "parent",
            Schema::nullable_string().describe("Sequence id of the parent node; null for the root"),
        )
        .property(
            "length",
            Schema::number()
                .minimum(0.0)
                .describe("Branch length to the parent node"),
        )
        .property(
            "distance",
            Schema::number()
                .minimum(0.0)
                .describe("Patristic distance to the naive node"),
        )
        .property(
            "timepoint_id",
            Schema::nullable_string().describe("Timepoint associated with sequence, if any."),
        )
        .property(
            "multiplicity",
            multiplicity("Number of times sequence was observed in the sample."),
        )
        .property(
            "cluster_multiplicity",
            multiplicity(
                "If clonal family sequences were downsampled by clustering, the cumulative number of times sequences in cluster were observed.",
            ),
        )
        .property(
            "timepoint_multiplicities",
            Schema::array(timepoint_multiplicity_schema())
                .describe("Sequence multiplicity, broken down by timepoint."),
        )
        .property(
            "cluster_timepoint_multiplicities",
            Schema::array(timepoint_multiplicity_schema()).describe(
                "Sequence multiplicity, broken down by timepoint, including sequences falling in the same cluster.",
            ),
        )
        .property(
            "lbi",
            Schema::nullable_number().describe("Local branching index."),
        )
        .property(
            "lbr",
            Schema::nullable_number().describe("Local branching rate (derivative of lbi)."),
        )
        .property(
            "affinity",
            Schema::nullable_number().describe("Affinity of the antibody for some antigen."),
        )
}

fn tree_properties(schema: Schema) -> Schema {
    schema
        .property("ident", ident())
        .property("tree_id", id("AIRR: Identifier for the tree."))
        .property("clone_id", id("AIRR: Identifier for the clone."))
        .property(
            "downsampling_strategy",
            Schema::string().describe("If applicable, the downsampling method"),
        )
        .property(
            "downsampled_count",
            Schema::integer().minimum(0.0).describe(
                "If applicable, the maximum number of sequences kept in the downsampling process",
            ),
        )
        .property(
            "newick",
            Schema::string().describe("AIRR: Newick string of the tree edges."),
        )
}

pub fn tree_schema() -> Schema {
    tree_properties(
        Schema::object()
            .title("Tree")
            .describe("Phylogenetic tree and possibly ancestral state reconstruction of sequences in a clonal family.")
            .required(&["ident", "clone_id", "newick", "nodes"]),
    )
    .property(
        "nodes",
        Schema::map_of(node_schema())
            .describe("AIRR: Dictionary of nodes in the tree, keyed by sequence_id string."),
    )
}

pub fn tree_summary_schema() -> Schema {
    tree_properties(
        Schema::object()
            .title("Tree summary")
            .describe("Tree record without its nodes, as embedded in clones.")
            .required(&["ident", "clone_id", "newick"]),
    )
}

fn clone_properties(schema: Schema) -> Schema {
    schema
        .property("clone_id", id("AIRR: Identifier for the clone."))
        .property("ident", ident())
        .property(
            "unique_seqs_count",
            Schema::integer()
                .minimum(1.0)
                .describe("Number of unique sequences in the clone"),
        )
        .property(
            "total_read_count",
            Schema::integer()
                .minimum(0.0)
                .describe("Number of total reads represented by sequences in the clone."),
        )
        .property(
            "mean_mut_freq",
            Schema::number()
                .minimum(0.0)
                .describe("Mean mutation frequency across sequences in the clone."),
        )
        .property(
            "germline_alignment",
            Schema::nullable_string()
                .describe("AIRR: Assembled, aligned, full-length inferred ancestor of the clone."),
        )
        .property(
            "has_seed",
            Schema::boolean().describe("Does this clone have a seed sequence in it?"),
        )
        .property(
            "v_alignment_start",
            natural_number("AIRR: Start position of the V segment (1-based closed interval)."),
        )
        .property(
            "v_alignment_end",
            natural_number("AIRR: End position of the V segment (1-based closed interval)."),
        )
        .property(
            "v_call",
            Schema::string().describe("AIRR: V gene with allele of the inferred ancestor."),
        )
        .property(
            "d_alignment_start",
            nullable_natural_number("AIRR: Start position of the D segment (1-based closed interval)."),
        )
        .property(
            "d_alignment_end",
            nullable_natural_number("AIRR: End position of the D segment (1-based closed interval)."),
        )
        .property(
            "d_call",
            Schema::nullable_string().describe("AIRR: D gene with allele of the inferred ancestor."),
        )
        .property(
            "j_alignment_start",
            natural_number("AIRR: Start position of the J segment (1-based closed interval)."),
        )
        .property(
            "j_alignment_end",
            natural_number("AIRR: End position of the J segment (1-based closed interval)."),
        )
        .property(
            "j_call",
            Schema::string().describe("AIRR: J gene with allele of the inferred ancestor."),
        )
        .property(
            "junction_length",
            natural_number("AIRR: Number of nucleotides in the junction."),
        )
        .property(
            "junction_start",
            natural_number("AIRR: Junction region start position in the alignment (1-based closed interval)."),
        )
        .property(
            "sample_id",
            id("Sample id associated with this clonal family."),
        )
        .property(
            "subject_id",
            id("Id of subject from which the clonal family was sampled."),
        )
        .property(
            "seed_id",
            Schema::nullable_string().describe("Seed sequence id if any."),
        )
        .property(
            "dataset_id",
            id("Id of the dataset this clonal family belongs to."),
        )
}

const CLONE_REQUIRED: [&str; 8] = [
    "clone_id",
    "ident",
    "unique_seqs_count",
    "mean_mut_freq",
    "v_alignment_start",
    "v_alignment_end",
    "j_alignment_start",
    "j_alignment_end",
];

/// Clone with full trees, checked before trees are split into their own files.
pub fn clone_schema() -> Schema {
    clone_properties(
        Schema::object()
            .title("Clone")
            .describe("Clonal family of sequences deriving from a particular reassortment event")
            .required(&CLONE_REQUIRED),
    )
    .property(
        "trees",
        Schema::array(tree_schema())
            .describe("Phylogenetic trees, and possibly ancestral sequence reconstructions."),
    )
}

/// Clone as written to the clones file: tree summaries instead of trees.
pub fn clone_summary_schema() -> Schema {
    clone_properties(
        Schema::object()
            .title("Clone")
            .describe("Clonal family as written to the clones file")
            .required(&CLONE_REQUIRED),
    )
    .property("trees", Schema::array(tree_summary_schema()))
}

pub fn sample_schema() -> Schema {
    Schema::object()
        .title("Sample")
        .describe("A sample is generally a collection of sequences.")
        .required(&["sample_id", "locus"])
        .property("ident", ident())
        .property("sample_id", id("Sample id"))
        .property(
            "timepoint_id",
            Schema::string().describe(
                "Timepoint associated with this sample (\"merged\" if data has been combined from multiple timepoints)",
            ),
        )
        .property("locus", Schema::string().describe("B-cell Locus."))
}

pub fn subject_schema() -> Schema {
    Schema::object()
        .title("Subject")
        .describe("Subject from which the clonal family was sampled.")
        .required(&["subject_id"])
        .property("ident", ident())
        .property("subject_id", id("Subject id"))
}

pub fn seed_schema() -> Schema {
    Schema::nullable_object()
        .title("Seed")
        .describe("A sequence of interest among other clonal family members.")
        .required(&["seed_id"])
        .property("ident", ident())
        .property("seed_id", id("Seed id"))
}

pub fn dataset_schema() -> Schema {
    Schema::object()
        .title("Olmsted Dataset")
        .describe("Olmsted dataset record.")
        .required(&["ident", "dataset_id", "schema_version"])
        .property("ident", ident())
        .property(
            "dataset_id",
            id("Unique identifier for a collection of data"),
        )
        .property("schema_version", Schema::string().describe("Schema version"))
        .property("type", Schema::string().describe("Dataset type"))
        .property(
            "build",
            Schema::object()
                .title("Build info")
                .describe("Information about how a dataset was built.")
                .required(&["commit"])
                .property(
                    "commit",
                    Schema::string().describe("Commit sha of the build system used to process the data"),
                )
                .property(
                    "time",
                    Schema::string().describe("Time at which build was initiated"),
                ),
        )
        .property(
            "paper",
            Schema::object()
                .title("Paper info")
                .describe("Information about a paper corresponding to this dataset")
                .required(&["authorstring"])
                .property("url", Schema::string().describe("Link to online version of the paper."))
                .property(
                    "authorstring",
                    Schema::string().describe("String to be displayed citing authors, e.g. \"Doe, et. al.\"."),
                ),
        )
        .property(
            "samples",
            Schema::array(sample_schema()).describe("Information about each of the samples"),
        )
        .property(
            "subjects",
            Schema::array(subject_schema()).describe("Information about each of the subjects"),
        )
        .property(
            "seeds",
            Schema::array(seed_schema()).describe("Information about each of the seed sequences"),
        )
        .property("clone_count", natural_number("Number of clones"))
        .property("subjects_count", natural_number("Number of subjects"))
        .property("timepoints_count", natural_number("Number of timepoints"))
        .property(
            "clones",
            Schema::array(clone_summary_schema())
                .describe("Information about each of the clonal families"),
        )
}

/// Draft-04 validator compiled from a [`Schema`] or an exported schema document.
pub struct SchemaValidator {
    validator: Validator,
}

impl SchemaValidator {
    pub fn new(document: &Value) -> Result<Self, OlmstedError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft4)
            .build(document)
            .map_err(|err| OlmstedError::InvalidSchema(err.to_string()))?;
        Ok(Self { validator })
    }

    /// Checks `instance` and returns every violation, ordered by path.
    pub fn validate(&self, instance: &Value) -> Vec<Violation> {
        let mut violations = self
            .validator
            .iter_errors(instance)
            .map(|error| Violation {
                path: instance_path(instance, &error.instance_path.to_string()),
                message: error.to_string(),
            })
            .collect::<Vec<_>>();
        violations.sort_by(|a, b| a.path.cmp(&b.path));
        violations
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validates `instance`, turning violations into `SchemaValidation` for `object`.
    pub fn ensure_valid(&self, instance: &Value, object: &str) -> Result<(), OlmstedError> {
        let errors = self.validate(instance);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OlmstedError::SchemaValidation {
                object: object.to_string(),
                errors,
            })
        }
    }
}

/// Splits a JSON pointer into path segments, walking `instance` so that numeric object keys
/// stay keys and only array positions become indices.
fn instance_path(instance: &Value, pointer: &str) -> Vec<PathSegment> {
    let mut cursor = Some(instance);
    let mut path = Vec::new();
    for token in pointer.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        match cursor {
            Some(Value::Array(items)) => match token.parse::<usize>() {
                Ok(index) => {
                    cursor = items.get(index);
                    path.push(PathSegment::Index(index));
                }
                Err(_) => {
                    cursor = None;
                    path.push(PathSegment::Key(token));
                }
            },
            Some(Value::Object(map)) => {
                cursor = map.get(&token);
                path.push(PathSegment::Key(token));
            }
            _ => {
                cursor = None;
                path.push(PathSegment::Key(token));
            }
        }
    }
    path
}

pub struct Schemas {
    pub dataset: SchemaValidator,
    pub clone: SchemaValidator,
}

static SCHEMAS: LazyLock<Result<Schemas, String>> = LazyLock::new(|| {
    let dataset = SchemaValidator::new(&schema_document()).map_err(|err| err.to_string())?;
    let clone = clone_schema().compile().map_err(|err| err.to_string())?;
    Ok(Schemas { dataset, clone })
});

/// Validators compiled on first use and shared read-only afterwards.
pub fn schemas() -> Result<&'static Schemas, OlmstedError> {
    SCHEMAS
        .as_ref()
        .map_err(|message| OlmstedError::InvalidSchema(message.clone()))
}

/// Full input-file schema document, for `--write-schema` and `--display-schema`.
pub fn schema_document() -> Value {
    let mut document = match dataset_schema().to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    document.insert(
        "$schema".to_string(),
        json!("http://json-schema.org/draft-04/schema#"),
    );
    document.insert(
        "$id".to_string(),
        json!("https://olmstedviz.org/input.schema.json"),
    );
    Value::Object(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_string_accepts_null() {
        let schema = Schema::object()
            .required(&["name"])
            .property("name", Schema::nullable_string())
            .compile()
            .unwrap();
        assert!(schema.is_valid(&json!({"name": null})));
        assert!(schema.is_valid(&json!({"name": "x"})));
        assert!(!schema.is_valid(&json!({"name": 3})));
        assert!(!schema.is_valid(&json!({})));
    }

    #[test]
    fn errors_are_path_scoped() {
        let schema = Schema::object()
            .property(
                "items",
                Schema::array(
                    Schema::object()
                        .required(&["count"])
                        .property("count", Schema::integer().minimum(1.0)),
                ),
            )
            .compile()
            .unwrap();
        let errors = schema.validate(&json!({"items": [{"count": 1}, {"count": 0}, {}]}));
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0].path,
            vec![
                PathSegment::Key("items".to_string()),
                PathSegment::Index(1),
                PathSegment::Key("count".to_string()),
            ]
        );
        assert_eq!(
            errors[1].path,
            vec![PathSegment::Key("items".to_string()), PathSegment::Index(2)]
        );
        assert!(errors[1].message.contains("count"), "{}", errors[1].message);
    }

    #[test]
    fn numeric_map_keys_stay_keys() {
        let schema = Schema::map_of(Schema::integer()).compile().unwrap();
        let errors = schema.validate(&json!({"1": 1, "2": "two"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, vec![PathSegment::Key("2".to_string())]);
    }

    #[test]
    fn pointer_escapes_are_decoded() {
        let instance = json!({"a/b": {"c~d": [true]}});
        assert_eq!(
            instance_path(&instance, "/a~1b/c~0d/0"),
            vec![
                PathSegment::Key("a/b".to_string()),
                PathSegment::Key("c~d".to_string()),
                PathSegment::Index(0),
            ]
        );
        assert!(instance_path(&instance, "").is_empty());
    }

    #[test]
    fn shared_schemas_compile() {
        let schemas = schemas().unwrap();
        assert!(!schemas.clone.is_valid(&json!({})));
        assert!(!schemas.dataset.is_valid(&json!({"dataset_id": "d"})));
    }

    #[test]
    fn exported_document_marks_nullable_strings() {
        let document = schema_document();
        assert_eq!(document["title"], json!("Olmsted Dataset"));
        let seed_id = &document["properties"]["clones"]["items"]["properties"]["seed_id"];
        assert_eq!(seed_id["type"], json!(["string", "null"]));
    }
}
