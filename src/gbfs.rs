//! The two GBFS documents the exporter consumes: the discovery document
//! (`gbfs.json`) and the vehicle status feed it points at.
//!
//! Both GBFS 2.x (`free_bike_status`, language-keyed discovery, `bikes`) and
//! GBFS 3.x (`vehicle_status`, flat discovery, `vehicles`) layouts are
//! accepted. Nothing beyond the fields needed to count vehicles is validated.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;

/// Sub-feed names that carry the vehicle list, in order of preference.
pub const VEHICLE_STATUS_FEEDS: &[&str] = &["free_bike_status", "vehicle_status"];

const PREFERRED_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedLink {
    pub name: String,
    pub url: String,
}

/// Wire shape of `gbfs.json`. `data` stays untyped so that only the feed list
/// actually used is decoded.
#[derive(Deserialize)]
struct RawDiscovery {
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    data: Value,
}

/// `gbfs.json`
#[derive(Debug, Deserialize)]
#[serde(from = "RawDiscovery")]
pub struct Discovery {
    pub version: Option<String>,
    feeds: Vec<FeedLink>,
}

impl From<RawDiscovery> for Discovery {
    fn from(raw: RawDiscovery) -> Self {
        let version = raw.version.and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Self {
            version,
            feeds: select_feeds(&raw.data),
        }
    }
}

/// Picks the flat 3.x list, else the English list, else the first language
/// (by name) whose entry is an object.
fn select_feeds(data: &Value) -> Vec<FeedLink> {
    let Some(data) = data.as_object() else {
        return Vec::new();
    };

    if let Some(feeds) = data.get("feeds") {
        return feed_links(feeds);
    }

    if let Some(feeds) = data.get(PREFERRED_LANGUAGE).and_then(language_feeds) {
        return feeds;
    }

    let mut languages: Vec<_> = data.iter().collect();
    languages.sort_by(|a, b| a.0.cmp(b.0));
    languages
        .into_iter()
        .find_map(|(_, value)| language_feeds(value))
        .unwrap_or_default()
}

fn language_feeds(value: &Value) -> Option<Vec<FeedLink>> {
    let language = value.as_object()?;
    Some(language.get("feeds").map(feed_links).unwrap_or_default())
}

/// Entries without a string `name` and `url` are dropped.
fn feed_links(feeds: &Value) -> Vec<FeedLink> {
    feeds
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| FeedLink::deserialize(entry).ok())
                .collect()
        })
        .unwrap_or_default()
}

impl Discovery {
    /// Sub-feeds advertised by the document. Localized documents use the
    /// English list when present, otherwise the first language by name.
    pub fn feeds(&self) -> &[FeedLink] {
        &self.feeds
    }

    /// URL of the vehicle status sub-feed. `source` is only used in the error.
    pub fn vehicle_status_url(&self, source: &str) -> Result<&str> {
        VEHICLE_STATUS_FEEDS
            .iter()
            .find_map(|name| self.feeds.iter().find(|f| f.name == *name))
            .map(|f| f.url.as_str())
            .ok_or_else(|| anyhow!("free_bike_status not found in {source}"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct VehicleStatusData {
    #[serde(default)]
    bikes: Option<Vec<IgnoredAny>>,
    #[serde(default)]
    vehicles: Option<Vec<IgnoredAny>>,
}

/// `free_bike_status.json` / `vehicle_status.json`
#[derive(Debug, Default, Deserialize)]
pub struct VehicleStatus {
    #[serde(default)]
    data: Option<VehicleStatusData>,
}

impl VehicleStatus {
    /// Number of listed vehicles. Absent arrays count as zero.
    pub fn count(&self) -> usize {
        self.data.as_ref().map_or(0, |d| {
            d.bikes.as_ref().map_or(0, Vec::len) + d.vehicles.as_ref().map_or(0, Vec::len)
        })
    }
}

/// Decodes a discovery document from raw bytes.
pub fn parse_discovery(bytes: &[u8]) -> Result<Discovery> {
    serde_json::from_slice(bytes).context("invalid GBFS discovery document")
}

/// Decodes a vehicle status document from raw bytes.
pub fn parse_vehicle_status(bytes: &[u8]) -> Result<VehicleStatus> {
    serde_json::from_slice(bytes).context("invalid GBFS vehicle status document")
}
