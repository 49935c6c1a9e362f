//! Reporting of ingestion results: log lines and the optional CSV sample log.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::stats::{IngestReport, ProviderSample};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs one line per provider and a round summary.
pub fn log_report(report: &IngestReport) {
    for sample in &report.samples {
        match (&sample.error_type, &sample.error_message) {
            (None, _) => info!(
                location = %sample.location,
                bikes = sample.bikes,
                "Provider ingested"
            ),
            (Some(stage), message) => warn!(
                location = %sample.location,
                url = %sample.url,
                stage = %stage,
                error = message.as_deref().unwrap_or(""),
                "Provider skipped"
            ),
        }
    }

    info!(
        providers = report.samples.len(),
        failed = report.failed(),
        total_bikes = report.total_bikes(),
        "Ingestion round complete"
    );
}

/// Appends a [`ProviderSample`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &Path, sample: &ProviderSample) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(sample)?;
    writer.flush()?;

    Ok(())
}

/// Appends every sample of a round.
pub fn append_report(path: &Path, report: &IngestReport) -> Result<()> {
    for sample in &report.samples {
        append_record(path, sample)?;
    }
    Ok(())
}
