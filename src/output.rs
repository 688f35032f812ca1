use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, RunReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable summary on stdout; progress goes to the log.
pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(render_report(report).as_bytes())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => info!("{}", event.message),
        }
    }
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for file in &report.datasets {
        let dataset = &file.dataset;
        out.push_str(&format!(
            "{} ({}): dataset {} with {} of {} clones\n",
            file.path,
            file.format,
            dataset.dataset_id,
            dataset.total_clones - dataset.dropped_clones,
            dataset.total_clones
        ));
        for failure in &dataset.failures {
            let reason = failure.reason.lines().next().unwrap_or_default();
            out.push_str(&format!("  dropped {}: {reason}\n", failure.clone_id));
        }
    }
    for failure in &report.failed_files {
        out.push_str(&format!("{}: FAILED: {}\n", failure.path, failure.reason));
    }
    if !report.written.is_empty() {
        out.push_str(&format!("wrote {} files\n", report.written.len()));
    }
    out
}
