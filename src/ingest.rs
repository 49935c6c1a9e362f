//! The ingestion routine: provider list → discovery document → vehicle status
//! sub-feed → count → gauges.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info};

use crate::config::{Provider, ProviderSource};
use crate::exporter;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::gbfs::{parse_discovery, parse_vehicle_status};
use crate::output;
use crate::stats::{DISCOVERY_ERROR, IngestReport, ProviderSample, STATUS_ERROR};

/// Ingests a single provider. Failures are folded into the returned sample.
pub async fn ingest_provider<C: HttpClient>(client: &C, provider: &Provider) -> ProviderSample {
    let status_url = match resolve_status_url(client, &provider.url).await {
        Ok(url) => url,
        Err(e) => {
            error!(
                url = %provider.url,
                error = %format!("{e:#}"),
                "Error fetching free bike status URL"
            );
            return ProviderSample::from_error(provider, DISCOVERY_ERROR, &format!("{e:#}"));
        }
    };

    match count_vehicles(client, &status_url).await {
        Ok(bikes) => ProviderSample::from_count(provider, &status_url, bikes),
        Err(e) => {
            error!(
                url = %status_url,
                error = %format!("{e:#}"),
                "Error fetching free bike status data"
            );
            ProviderSample::from_error(provider, STATUS_ERROR, &format!("{e:#}"))
                .with_status_url(&status_url)
        }
    }
}

async fn resolve_status_url<C: HttpClient>(client: &C, discovery_url: &str) -> Result<String> {
    let bytes = fetch_bytes(client, discovery_url).await?;
    let discovery = parse_discovery(&bytes)?;
    let url = discovery.vehicle_status_url(discovery_url)?;
    debug!(status_url = url, "Resolved vehicle status feed");
    Ok(url.to_string())
}

async fn count_vehicles<C: HttpClient>(client: &C, status_url: &str) -> Result<usize> {
    let bytes = fetch_bytes(client, status_url).await?;
    debug!(bytes = bytes.len(), "Vehicle status received, parsing");
    Ok(parse_vehicle_status(&bytes)?.count())
}

/// Runs ingestion rounds against a provider source and publishes the results.
pub struct Ingestor<C> {
    client: C,
    source: ProviderSource,
    record: Option<PathBuf>,
    round: Mutex<()>,
}

impl<C: HttpClient> Ingestor<C> {
    pub fn new(client: C, source: ProviderSource) -> Self {
        Self {
            client,
            source,
            record: None,
            round: Mutex::new(()),
        }
    }

    /// Appends every provider sample to a CSV file after each round.
    pub fn with_record(mut self, path: PathBuf) -> Self {
        self.record = Some(path);
        self
    }

    /// Fetches every configured provider in order without touching metrics.
    pub async fn collect(&self) -> Result<IngestReport> {
        let providers = self.source.load()?;
        let started_at = Utc::now();

        let mut samples = Vec::with_capacity(providers.len());
        for provider in &providers {
            let span = tracing::info_span!("provider", location = %provider.location);
            samples.push(ingest_provider(&self.client, provider).instrument(span).await);
        }

        Ok(IngestReport {
            started_at,
            finished_at: Utc::now(),
            samples,
        })
    }

    /// One full round: collect, publish gauges, log, and record.
    ///
    /// Rounds never overlap. If the provider list cannot be loaded the error is
    /// returned and no metric is touched.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<IngestReport> {
        let _round = self.round.lock().await;

        let report = self.collect().await.inspect_err(|e| {
            error!(error = %format!("{e:#}"), "Error retrieving providers");
        })?;

        exporter::publish(&report);
        output::log_report(&report);

        if let Some(path) = &self.record {
            if let Err(e) = output::append_report(path, &report) {
                error!(
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "Failed to record samples"
                );
            }
        }

        Ok(report)
    }

    /// Runs a round immediately, then one more each time `interval` has
    /// elapsed after the previous round finished.
    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Starting automated ingestion");
        loop {
            // errors are already logged by run_once
            let _ = self.run_once().await;
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{AVAILABLE_BIKES, INGEST_ROUNDS, TOTAL_AVAILABLE_BIKES, series_value};
    use crate::fetch::BasicClient;
    use async_trait::async_trait;
    use axum::http;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DISCOVERY: &str = r#"{"data": {"en": {"feeds": [
        {"name": "free_bike_status", "url": "https://oslo.example/free_bike_status.json"}
    ]}}}"#;
    const FREE_BIKE_STATUS: &str = r#"{"data": {"bikes": [{}, {}, {}]}}"#;

    #[derive(Default)]
    struct Counters {
        requests: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Serves canned bodies by URL, 404 otherwise.
    struct StubClient {
        bodies: HashMap<String, String>,
        delay: Duration,
        counters: Arc<Counters>,
    }

    impl StubClient {
        fn oslo(delay: Duration) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let bodies = HashMap::from([
                ("https://oslo.example/gbfs.json".to_string(), DISCOVERY.to_string()),
                (
                    "https://oslo.example/free_bike_status.json".to_string(),
                    FREE_BIKE_STATUS.to_string(),
                ),
            ]);
            let client = Self {
                bodies,
                delay,
                counters: counters.clone(),
            };
            (client, counters)
        }
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let c = &self.counters;
            c.requests.fetch_add(1, Ordering::SeqCst);
            let now = c.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            c.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            c.in_flight.fetch_sub(1, Ordering::SeqCst);

            let resp = match self.bodies.get(req.url().as_str()) {
                Some(body) => http::Response::new(body.clone()),
                None => http::Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(String::new())
                    .unwrap(),
            };
            Ok(reqwest::Response::from(resp))
        }
    }

    fn providers_file(name: &str, providers: &[Provider]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gbfs_exporter_ingest_{name}.json"));
        std::fs::write(&path, serde_json::to_string(providers).unwrap()).unwrap();
        path
    }

    fn oslo() -> Provider {
        Provider::new("oslo", "https://oslo.example/gbfs.json")
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) < at_least {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_unreachable_provider_becomes_discovery_error() {
        // nothing listens on the discard port
        let provider = Provider::new("oslo", "http://127.0.0.1:9/gbfs.json");
        let client = BasicClient::with_timeout(Duration::from_secs(2)).unwrap();
        let sample = ingest_provider(&client, &provider).await;

        assert!(!sample.is_ok());
        assert_eq!(sample.error_type.as_deref(), Some(DISCOVERY_ERROR));
        assert_eq!(sample.location, "oslo");
        assert!(sample.status_url.is_none());
    }

    #[tokio::test]
    async fn test_collect_without_providers_fails() {
        let path = std::env::temp_dir().join("gbfs_exporter_test_empty_providers.json");
        std::fs::write(&path, "[]").unwrap();

        let ingestor = Ingestor::new(
            BasicClient::new().unwrap(),
            ProviderSource::File(path.clone()),
        );
        let err = ingestor.collect().await.unwrap_err();
        assert!(err.to_string().contains("no providers found"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unloadable_providers_leave_metrics_untouched() {
        let path = providers_file("untouched", &[oslo()]);
        let missing = std::env::temp_dir().join("gbfs_exporter_ingest_missing.json");
        let _ = std::fs::remove_file(&missing);

        let (client, _) = StubClient::oslo(Duration::ZERO);
        let healthy = Ingestor::new(client, ProviderSource::File(path.clone()));
        let (client, _) = StubClient::oslo(Duration::ZERO);
        let broken = Ingestor::new(client, ProviderSource::File(missing));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                assert_eq!(healthy.run_once().await.unwrap().total_bikes(), 3);
                assert!(broken.run_once().await.is_err());
            })
        });

        let rendered = handle.render();
        assert_eq!(
            series_value(&rendered, AVAILABLE_BIKES, &[r#"location="oslo""#]),
            Some(3.0)
        );
        assert_eq!(series_value(&rendered, TOTAL_AVAILABLE_BIKES, &[]), Some(3.0));
        assert_eq!(series_value(&rendered, INGEST_ROUNDS, &[]), Some(1.0));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_background_loop_runs_first_round_immediately() {
        let path = providers_file("immediate", &[oslo()]);
        let (client, counters) = StubClient::oslo(Duration::ZERO);
        let ingestor = Arc::new(Ingestor::new(client, ProviderSource::File(path.clone())));

        let task = tokio::spawn(ingestor.run_forever(Duration::from_secs(3600)));

        // discovery + vehicle status, long before the interval elapses
        assert!(wait_for(&counters.requests, 2).await);

        task.abort();
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_background_loop_continues_after_failed_round() {
        let path = std::env::temp_dir().join("gbfs_exporter_ingest_late.json");
        let _ = std::fs::remove_file(&path);

        let (client, counters) = StubClient::oslo(Duration::ZERO);
        let ingestor = Arc::new(Ingestor::new(client, ProviderSource::File(path.clone())));
        let task = tokio::spawn(ingestor.run_forever(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.requests.load(Ordering::SeqCst), 0);

        providers_file("late", &[oslo()]);
        assert!(wait_for(&counters.requests, 2).await);

        task.abort();
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_rounds_do_not_interleave() {
        let path = providers_file(
            "serialized",
            &[oslo(), Provider::new("oslo-2", "https://oslo.example/gbfs.json")],
        );
        let (client, counters) = StubClient::oslo(Duration::from_millis(10));
        let ingestor = Ingestor::new(client, ProviderSource::File(path.clone()));

        let (a, b) = tokio::join!(ingestor.run_once(), ingestor.run_once());
        assert_eq!(a.unwrap().total_bikes(), 6);
        assert_eq!(b.unwrap().total_bikes(), 6);

        assert_eq!(counters.requests.load(Ordering::SeqCst), 8);
        assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);

        std::fs::remove_file(&path).unwrap();
    }
}
