//! HTTP line-protocol sink for the InfluxDB v1/v2 write APIs.

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, error};
use url::Url;

use super::{ForwarderConfig, SenderError, line_protocol};
use crate::domain::HttpLog;

pub const API_VERSION_1: &str = "v1";
pub const API_VERSION_2: &str = "v2";

const DEF_BUCKET: &str = "haproxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiVersion {
    V1,
    V2,
}

/// Writes each flushed batch as one line-protocol POST.
pub struct InfluxdbClient {
    client: Client,
    write_url: Url,
    version: ApiVersion,
    token_header: String,
    hostname: String,
    buf: String,
}

impl InfluxdbClient {
    /// Validate the sink configuration and precompute the write endpoint.
    ///
    /// Unknown versions fall back to v2, which requires an organization;
    /// an empty bucket defaults to `haproxy`.
    pub fn new(cfg: &ForwarderConfig, hostname: &str) -> Result<Self, SenderError> {
        let version = match cfg.version.as_str() {
            API_VERSION_1 => ApiVersion::V1,
            _ => ApiVersion::V2,
        };
        let bucket = if cfg.bucket.is_empty() {
            DEF_BUCKET
        } else {
            &cfg.bucket
        };

        let mut write_url = Url::parse(&cfg.url).map_err(|err| SenderError::InvalidEndpoint {
            url: cfg.url.clone(),
            reason: err.to_string(),
        })?;

        match version {
            ApiVersion::V1 => {
                write_url.set_path("/write");
                let mut query = write_url.query_pairs_mut();
                query.clear();
                query.append_pair("precision", "ns");
                query.append_pair("db", bucket);
                if !cfg.user.is_empty() && !cfg.pass.is_empty() {
                    query.append_pair("u", &cfg.user);
                    query.append_pair("p", &cfg.pass);
                }
            }
            ApiVersion::V2 => {
                if cfg.org.is_empty() {
                    return Err(SenderError::MissingOrg);
                }
                write_url.set_path("/api/v2/write");
                let mut query = write_url.query_pairs_mut();
                query.clear();
                query.append_pair("precision", "ns");
                query.append_pair("org", &cfg.org);
                query.append_pair("bucket", bucket);
            }
        }

        Ok(Self {
            client: Client::new(),
            write_url,
            version,
            token_header: format!("Token {}", cfg.token),
            hostname: hostname.to_string(),
            buf: String::new(),
        })
    }

    /// Best-effort write; failures are logged and the batch is dropped.
    pub async fn forwards(&mut self, batch: &[HttpLog]) {
        if let Err(err) = self.try_forwards(batch).await {
            error!("influxdb: forward failed: {err}");
        }
    }

    async fn try_forwards(&mut self, batch: &[HttpLog]) -> Result<(), SenderError> {
        line_protocol::encode_batch(&mut self.buf, &self.hostname, batch)?;

        let request = self
            .client
            .post(self.write_url.clone())
            .header(ACCEPT, "application/json");
        let request = match self.version {
            ApiVersion::V1 => request.header(CONTENT_TYPE, "application/octet-stream"),
            ApiVersion::V2 => request
                .header(AUTHORIZATION, self.token_header.as_str())
                .header(CONTENT_TYPE, "text/plain; charset=utf-8"),
        };

        let response = request.body(self.buf.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SenderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(records = batch.len(), "influxdb: batch written");
        Ok(())
    }
}
