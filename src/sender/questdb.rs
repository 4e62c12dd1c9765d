//! UDP line-protocol sink for QuestDB's ILP ingestion port.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, error};
use url::Url;

use super::{ForwarderConfig, SenderError, line_protocol};
use crate::domain::HttpLog;

const DEF_SCHEME: &str = "udp";
const DEF_PORT: u16 = 9009;
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Writes each flushed batch as one connectionless datagram send.
pub struct QuestdbClient {
    socket: UdpSocket,
    hostname: String,
    buf: String,
}

impl QuestdbClient {
    /// Resolve the endpoint and connect the socket once at construction.
    ///
    /// A bare `host:port` is accepted by defaulting the scheme to `udp`;
    /// the port defaults to 9009.
    pub async fn new(cfg: &ForwarderConfig, hostname: &str) -> Result<Self, SenderError> {
        let raw = if cfg.url.contains("://") {
            cfg.url.clone()
        } else {
            format!("{DEF_SCHEME}://{}", cfg.url)
        };

        let invalid = |reason: &str| SenderError::InvalidEndpoint {
            url: cfg.url.clone(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(&raw).map_err(|err| invalid(&err.to_string()))?;
        if parsed.scheme() != DEF_SCHEME {
            return Err(invalid("only the udp scheme is supported"));
        }
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed.port().unwrap_or(DEF_PORT);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;

        Ok(Self {
            socket,
            hostname: hostname.to_string(),
            buf: String::new(),
        })
    }

    /// Best-effort write; failures are logged and the batch is dropped.
    pub async fn forwards(&mut self, batch: &[HttpLog]) {
        if let Err(err) = self.try_forwards(batch).await {
            error!("questdb: forward failed: {err}");
        }
    }

    async fn try_forwards(&mut self, batch: &[HttpLog]) -> Result<(), SenderError> {
        line_protocol::encode_batch(&mut self.buf, &self.hostname, batch)?;

        match timeout(WRITE_DEADLINE, self.socket.send(self.buf.as_bytes())).await {
            Ok(sent) => {
                sent?;
            }
            Err(_) => return Err(SenderError::Timeout(WRITE_DEADLINE)),
        }

        debug!(records = batch.len(), "questdb: batch written");
        Ok(())
    }
}
