use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::assemble::{AssembledDataset, AssemblyOptions, DatasetReport, assemble_dataset};
use crate::config::ResolvedConfig;
use crate::domain::{InputFormat, ValidationMode};
use crate::error::OlmstedError;
use crate::fs_util::{load_document, read_text};
use crate::sources::pcp::parse_pcp_trees;
use crate::sources::{PcpTrees, adapter_for};
use crate::store::{OutputStore, check_output_names};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: String,
    pub format: InputFormat,
    #[serde(flatten)]
    pub dataset: DatasetReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub datasets: Vec<FileReport>,
    pub failed_files: Vec<FileFailure>,
    pub written: Vec<String>,
}

impl RunReport {
    /// True when every input file produced a dataset.
    pub fn is_success(&self) -> bool {
        self.failed_files.is_empty()
    }
}

/// Batch driver: loads, adapts, assembles and writes every input file.
#[derive(Debug, Clone)]
pub struct App {
    store: Option<OutputStore>,
}

impl App {
    pub fn new(store: Option<OutputStore>) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, OlmstedError> {
        let pcp_trees = match &config.pcp_trees {
            Some(path) => Some(load_pcp_trees(path)?),
            None => None,
        };

        let mut assembled = Vec::new();
        let mut datasets = Vec::new();
        let mut failed_files = Vec::new();
        let mut seen_ids = BTreeSet::new();

        for path in &config.inputs {
            sink.event(ProgressEvent {
                message: format!("phase=Load; processing infile {path}"),
                elapsed: None,
            });
            let start = Instant::now();
            match process_file(path, pcp_trees.as_ref(), &config.assembly) {
                Ok((format, dataset)) => {
                    if !seen_ids.insert(dataset.dataset.dataset_id.clone()) {
                        warn!(
                            "dataset id {} appears in more than one input; later clones file wins",
                            dataset.dataset.dataset_id
                        );
                    }
                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Assemble; {}: {} clones kept, {} dropped",
                            dataset.dataset.dataset_id,
                            dataset.clones.len(),
                            dataset.report.dropped_clones
                        ),
                        elapsed: Some(start.elapsed()),
                    });
                    datasets.push(FileReport {
                        path: path.to_string(),
                        format,
                        dataset: dataset.report.clone(),
                    });
                    assembled.push(dataset);
                }
                Err(err) if aborts_run(&err, config.assembly.validation) => return Err(err),
                Err(err) => {
                    warn!("unable to process infile {path}: {err}");
                    failed_files.push(FileFailure {
                        path: path.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let written = match &self.store {
            Some(store) if !assembled.is_empty() => {
                sink.event(ProgressEvent {
                    message: format!("phase=Write; writing to {}", store.root()),
                    elapsed: None,
                });
                store
                    .write_all(&assembled)?
                    .into_iter()
                    .map(|path| path.to_string())
                    .collect()
            }
            _ => Vec::new(),
        };
        info!(
            "processed {} of {} input files",
            datasets.len(),
            config.inputs.len()
        );

        Ok(RunReport {
            datasets,
            failed_files,
            written,
        })
    }
}

/// Loads, classifies, adapts and assembles a single input file.
///
/// Ids that cannot become output file names fail this file only.
pub fn process_file(
    path: &Utf8Path,
    pcp_trees: Option<&PcpTrees>,
    options: &AssemblyOptions,
) -> Result<(InputFormat, AssembledDataset), OlmstedError> {
    let document = load_document(path)?;
    let format = InputFormat::classify(&document)?;
    info!("{path}: detected {format} input");
    let source = adapter_for(format, pcp_trees).adapt(document)?;
    let dataset = assemble_dataset(source, options)?;
    check_output_names(&dataset)?;
    Ok((format, dataset))
}

pub fn load_pcp_trees(path: &Utf8PathBuf) -> Result<PcpTrees, OlmstedError> {
    let trees = parse_pcp_trees(&read_text(path)?)?;
    info!("loaded {} companion trees from {path}", trees.len());
    Ok(trees)
}

/// Strict mode stops the batch on the first validation or assembly failure.
fn aborts_run(err: &OlmstedError, validation: ValidationMode) -> bool {
    validation == ValidationMode::Strict && err.is_clone_scoped()
}
