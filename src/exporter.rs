//! Publication of ingestion results through the `metrics` facade, rendered in
//! Prometheus text format by `metrics-exporter-prometheus`.

use anyhow::Result;
use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::stats::IngestReport;

pub const AVAILABLE_BIKES: &str = "available_bikes";
pub const TOTAL_AVAILABLE_BIKES: &str = "total_available_bikes";
pub const PROVIDER_ERRORS: &str = "gbfs_provider_errors_total";
pub const INGEST_ROUNDS: &str = "gbfs_ingest_rounds_total";
pub const LAST_INGEST_TIMESTAMP: &str = "gbfs_last_ingest_timestamp_seconds";
pub const INGEST_DURATION: &str = "gbfs_ingest_duration_seconds";

const INGEST_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Prometheus builder with histogram buckets for the round duration.
pub fn builder() -> Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(INGEST_DURATION.to_string()),
        INGEST_DURATION_BUCKETS,
    )?)
}

/// Installs the global Prometheus recorder and registers metric descriptions.
pub fn install() -> Result<PrometheusHandle> {
    let handle = builder()?.install_recorder()?;
    describe();
    Ok(handle)
}

pub fn describe() {
    describe_gauge!(
        AVAILABLE_BIKES,
        Unit::Count,
        "Number of bikes available from providers"
    );
    describe_gauge!(
        TOTAL_AVAILABLE_BIKES,
        Unit::Count,
        "Total number of bikes available across all providers"
    );
    describe_counter!(
        PROVIDER_ERRORS,
        "Providers skipped during ingestion, by failing stage"
    );
    describe_counter!(INGEST_ROUNDS, "Completed ingestion rounds");
    describe_gauge!(
        LAST_INGEST_TIMESTAMP,
        Unit::Seconds,
        "Unix time the last ingestion round finished"
    );
    describe_histogram!(
        INGEST_DURATION,
        Unit::Seconds,
        "Wall time of an ingestion round"
    );
}

/// Sets the per-provider and total gauges from a finished round.
///
/// Failed providers only bump the error counter; their `available_bikes`
/// series keeps the last successful value.
pub fn publish(report: &IngestReport) {
    for sample in &report.samples {
        match &sample.error_type {
            None => {
                gauge!(
                    AVAILABLE_BIKES,
                    "location" => sample.location.clone(),
                    "url" => sample.url.clone()
                )
                .set(sample.bikes as f64);
            }
            Some(stage) => {
                counter!(
                    PROVIDER_ERRORS,
                    "location" => sample.location.clone(),
                    "stage" => stage.clone()
                )
                .increment(1);
            }
        }
    }

    gauge!(TOTAL_AVAILABLE_BIKES).set(report.total_bikes() as f64);
    counter!(INGEST_ROUNDS).increment(1);
    gauge!(LAST_INGEST_TIMESTAMP).set(report.finished_at.timestamp() as f64);
    histogram!(INGEST_DURATION).record(report.duration_secs());
}

/// Value of the first rendered series whose line starts with `name` and
/// contains every fragment.
#[cfg(test)]
pub(crate) fn series_value(rendered: &str, name: &str, fragments: &[&str]) -> Option<f64> {
    rendered
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter(|l| l.starts_with(&format!("{name}{{")) || l.starts_with(&format!("{name} ")))
        .find(|l| fragments.iter().all(|f| l.contains(f)))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}
