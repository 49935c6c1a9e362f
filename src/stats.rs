use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Provider;

/// Failure while resolving the discovery document or the sub-feed URL.
pub const DISCOVERY_ERROR: &str = "discovery_error";
/// Failure while fetching or decoding the vehicle status document.
pub const STATUS_ERROR: &str = "status_error";

/// Outcome of ingesting one provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderSample {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub url: String,
    pub status_url: Option<String>,
    pub bikes: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl ProviderSample {
    pub fn from_count(provider: &Provider, status_url: &str, bikes: usize) -> Self {
        ProviderSample {
            timestamp: Utc::now(),
            location: provider.location.clone(),
            url: provider.url.clone(),
            status_url: Some(status_url.to_string()),
            bikes,
            error_type: None,
            error_message: None,
        }
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(provider: &Provider, error_type: &str, error_message: &str) -> Self {
        ProviderSample {
            timestamp: Utc::now(),
            location: provider.location.clone(),
            url: provider.url.clone(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status_url(mut self, status_url: &str) -> Self {
        self.status_url = Some(status_url.to_string());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error_type.is_none()
    }
}

/// Everything one ingestion round produced, in provider order.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub samples: Vec<ProviderSample>,
}

impl IngestReport {
    /// Sum over providers that succeeded this round.
    pub fn total_bikes(&self) -> usize {
        self.samples.iter().filter(|s| s.is_ok()).map(|s| s.bikes).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.samples.iter().filter(|s| s.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.samples.len() - self.succeeded()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
