use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use olmsted_prep::app::{App, ProgressSink, RunReport};
use olmsted_prep::config::{ConfigLoader, Overrides};
use olmsted_prep::domain::Coordinates;
use olmsted_prep::error::OlmstedError;
use olmsted_prep::output::{JsonOutput, TextOutput};
use olmsted_prep::schema::schema_document;
use olmsted_prep::store::{OutputStore, write_json_atomic};

#[derive(Parser)]
#[command(name = "olmsted-prep")]
#[command(about = "Normalize B-cell lineage data into validated Olmsted datasets, clones and trees")]
#[command(version, author)]
struct Cli {
    /// Input files: triple-store pulls or AIRR JSON (.json[.gz]), PCP tables (.csv[.gz])
    #[arg(short, long, num_args = 1..)]
    inputs: Vec<Utf8PathBuf>,

    /// Directory receiving datasets.json, clones.<id>.json and tree.<ident>.json
    #[arg(short, long, alias = "data-outdir")]
    output_dir: Option<Utf8PathBuf>,

    /// Name of the naive (germline) node in every tree
    #[arg(short, long)]
    naive_name: Option<String>,

    /// Reroot trees on the naive node
    #[arg(short, long, alias = "root-trees")]
    reroot: bool,

    /// Drop clones that fail validation instead of aborting
    #[arg(short = 'c', long)]
    remove_invalid_clones: bool,

    /// Interval convention for start positions in the written output
    #[arg(long, value_enum)]
    coordinates: Option<Coordinates>,

    /// Companion CSV (family_name,newick_tree) for PCP inputs
    #[arg(short = 't', long)]
    pcp_trees: Option<Utf8PathBuf>,

    /// JSON config file; defaults to ./olmsted-prep.json or the per-user file
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Write the dataset JSON schema to this path
    #[arg(long)]
    write_schema: Option<Utf8PathBuf>,

    /// Print the dataset JSON schema
    #[arg(long)]
    display_schema: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<OlmstedError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &OlmstedError) -> u8 {
    match error {
        OlmstedError::ConfigRead(_) | OlmstedError::ConfigParse(_) => 2,
        error if error.is_clone_scoped() => 2,
        _ => 1,
    }
}

/// Returns `Ok(false)` when the run completed but some input could not be processed.
fn run() -> miette::Result<bool> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.display_schema {
        JsonOutput::print_json(&schema_document()).into_diagnostic()?;
    }
    if let Some(path) = &cli.write_schema {
        write_json_atomic(path, &schema_document())?;
    }

    let overrides = Overrides {
        inputs: cli.inputs,
        output_dir: cli.output_dir,
        naive_name: cli.naive_name,
        reroot: cli.reroot,
        remove_invalid_clones: cli.remove_invalid_clones,
        coordinates: cli.coordinates,
        pcp_trees: cli.pcp_trees,
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;
    if resolved.inputs.is_empty() {
        return Ok(true);
    }

    let app = App::new(resolved.output_dir.clone().map(OutputStore::new));
    let sink: &dyn ProgressSink = if cli.json { &JsonOutput } else { &TextOutput };
    let report = app.run(&resolved, sink)?;
    print_report(&report, cli.json).into_diagnostic()?;
    Ok(report.is_success())
}

fn print_report(report: &RunReport, json: bool) -> std::io::Result<()> {
    if json {
        JsonOutput::print_report(report)
    } else {
        TextOutput::print_report(report)
    }
}
