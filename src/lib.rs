pub mod config;
pub mod exporter;
pub mod fetch;
pub mod gbfs;
pub mod ingest;
pub mod logging;
pub mod output;
pub mod server;
pub mod stats;
