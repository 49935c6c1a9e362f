//! Provider configuration.
//!
//! Providers come either from numbered environment variables
//! (`provider1_region` / `provider1_url`, `provider2_region` / ...) or from a
//! JSON file:
//! ```json
//! [
//!   { "location": "oslo", "url": "https://gbfs.urbansharing.com/oslobysykkel.no/gbfs.json" }
//! ]
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A bike-share operator and the URL of its GBFS discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(alias = "region")]
    pub location: String,
    pub url: String,
}

impl Provider {
    pub fn new(location: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            url: url.into(),
        }
    }
}

/// Where the provider list is read from at the start of every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSource {
    Env,
    File(PathBuf),
}

impl ProviderSource {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => ProviderSource::File(path),
            None => ProviderSource::Env,
        }
    }

    pub fn load(&self) -> Result<Vec<Provider>> {
        match self {
            ProviderSource::Env => providers_from_env(),
            ProviderSource::File(path) => providers_from_file(path),
        }
    }
}

/// Reads providers from the process environment.
pub fn providers_from_env() -> Result<Vec<Provider>> {
    providers_from_lookup(|key| std::env::var(key).ok())
}

/// Scans `provider{i}_region` / `provider{i}_url` starting at 1 until an index
/// has neither key set. Indices with only one of the two keys are skipped.
pub fn providers_from_lookup<F>(lookup: F) -> Result<Vec<Provider>>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: String| lookup(key.as_str()).filter(|v| !v.is_empty());
    let mut providers = Vec::new();

    for i in 1.. {
        let location = get(format!("provider{i}_region"));
        let url = get(format!("provider{i}_url"));

        match (location, url) {
            (None, None) => break,
            (Some(location), Some(url)) => providers.push(Provider { location, url }),
            _ => tracing::warn!(index = i, "Provider entry is missing region or url, skipping"),
        }
    }

    if providers.is_empty() {
        bail!("no providers found in environment variables");
    }
    Ok(providers)
}

/// Loads providers from a JSON array on disk.
pub fn providers_from_file(path: &Path) -> Result<Vec<Provider>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read provider file {}", path.display()))?;
    let entries: Vec<Provider> = serde_json::from_str(&content)
        .with_context(|| format!("invalid provider file {}", path.display()))?;

    let providers: Vec<Provider> = entries
        .into_iter()
        .filter(|p| !p.location.is_empty() && !p.url.is_empty())
        .collect();

    if providers.is_empty() {
        bail!("no providers found in {}", path.display());
    }
    Ok(providers)
}
