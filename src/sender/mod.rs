//! Forwarder sinks.
//!
//! Every configured sink receives each flushed batch through the same
//! fire-and-forget contract: `forwards` logs its own failures and never
//! propagates them, so one broken sink cannot stall the pipeline or the
//! other sinks. A failed flush is discarded, not requeued.

pub mod influxdb;
pub mod line_protocol;
pub mod postgresql;
pub mod questdb;

pub use influxdb::InfluxdbClient;
pub use postgresql::PostgresqlWriter;
pub use questdb::QuestdbClient;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::HttpLog;

/// Connection parameters for one sink, as resolved by the configuration
/// layer. Unused fields stay empty for sinks that do not need them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Endpoint URL (InfluxDB base URL, QuestDB `udp://host:port`,
    /// PostgreSQL DSN).
    pub url: String,
    /// InfluxDB write API version, `v1` or `v2`; anything else means `v2`.
    pub version: String,
    /// InfluxDB bucket (v2) or database (v1).
    pub bucket: String,
    // InfluxDB v1 credentials.
    pub user: String,
    pub pass: String,
    // InfluxDB v2 credentials.
    pub org: String,
    pub token: String,
}

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("organization is required for the InfluxDB v2 API")]
    MissingOrg,
    #[error("failed to encode batch: {0}")]
    Encode(#[from] std::fmt::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("UDP write failed: {0}")]
    Udp(#[from] std::io::Error),
    #[error("write timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A configured sink. Each variant owns its transport handle and reused
/// output buffer; nothing is shared between sinks.
pub enum Forwarder {
    Influxdb(InfluxdbClient),
    Questdb(QuestdbClient),
    Postgresql(PostgresqlWriter),
}

impl Forwarder {
    /// Hand one flushed batch to the sink, best effort.
    pub async fn forwards(&mut self, batch: &[HttpLog]) {
        match self {
            Forwarder::Influxdb(client) => client.forwards(batch).await,
            Forwarder::Questdb(client) => client.forwards(batch).await,
            Forwarder::Postgresql(writer) => writer.forwards(batch).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Forwarder::Influxdb(_) => "influxdb",
            Forwarder::Questdb(_) => "questdb",
            Forwarder::Postgresql(_) => "postgresql",
        }
    }
}
