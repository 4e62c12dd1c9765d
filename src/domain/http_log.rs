use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// One fully parsed HAProxy HTTP access-log record.
///
/// This is the canonical representation of a log record throughout the
/// pipeline, from parser output through to sink input. The parser either
/// fills every field or rejects the whole line; a partially populated
/// record never leaves it.
///
/// Field reference: <https://cbonte.github.io/haproxy-dconv/1.7/configuration.html#8.2.3>
#[derive(Debug, Clone, PartialEq)]
pub struct HttpLog {
    /// Request timestamp, accepted at millisecond precision.
    pub timestamp: DateTime<Utc>,

    pub client_ip: String,
    pub client_port: i32,

    pub frontend_name: String,
    pub backend_name: String,
    pub server_name: String,

    // Timing breakdown, in milliseconds.
    pub time_request: i32,
    pub time_wait: i32,
    pub time_connect: i32,
    pub time_response: i32,
    pub time_all: i32,

    pub bytes_read: i64,

    pub cookie_request: String,
    pub cookie_response: String,

    /// HAProxy's encoded reason for how the session ended, e.g. `----`.
    pub termination_state: String,

    // Connection counters at the time the log was emitted.
    pub conn_active: i32,
    pub conn_frontend: i32,
    pub conn_backend: i32,
    pub conn_server: i32,
    pub retries: i32,

    pub queue_server: i32,
    pub queue_backend: i32,

    /// Captured request headers, zipped positionally against the configured
    /// header names. Empty when no capture is configured or present.
    pub request_headers: BTreeMap<String, String>,

    pub http_status: i32,
    pub http_method: String,
    pub http_url: String,
    pub http_query: String,
    pub http_proto: String,

    /// Normalized copy of `http_url` used only for low-cardinality tagging;
    /// set by the pipeline after the tag rules run, empty before that.
    pub tag_http_url: String,
}

impl HttpLog {
    /// Unix timestamp in nanoseconds, as written by the line-protocol sinks.
    pub fn unix_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or_default()
    }

    /// The URL value used for tagging: the normalized copy when the tag
    /// rules produced one, the raw URL otherwise.
    pub fn tag_url(&self) -> &str {
        if self.tag_http_url.is_empty() {
            &self.http_url
        } else {
            &self.tag_http_url
        }
    }
}
