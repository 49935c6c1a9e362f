//! HTTP surface: Prometheus scrape endpoint, manual ingestion trigger and a
//! liveness check.

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::fetch::HttpClient;
use crate::ingest::Ingestor;

pub struct AppState<C> {
    pub ingestor: Arc<Ingestor<C>>,
    pub metrics: PrometheusHandle,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            ingestor: self.ingestor.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

pub fn router<C: HttpClient + 'static>(state: AppState<C>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics::<C>))
        .route("/ingest", post(manual_ingest::<C>))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<C, F>(listener: TcpListener, state: AppState<C>, shutdown: F) -> Result<()>
where
    C: HttpClient + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn render_metrics<C: HttpClient + 'static>(State(state): State<AppState<C>>) -> String {
    state.metrics.render()
}

async fn manual_ingest<C: HttpClient + 'static>(
    State(state): State<AppState<C>>,
) -> (StatusCode, String) {
    match state.ingestor.run_once().await {
        Ok(_) => (StatusCode::OK, "Manual ingestion complete".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

async fn health() -> &'static str {
    "ok"
}
