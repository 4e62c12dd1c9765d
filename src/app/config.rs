//! Runtime configuration: CLI flags and environment variables, optionally
//! merged with a TOML file. CLI values win over file values.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::parser::{RetagError, TAG_HTTP_URL, TagRule};
use crate::sender::ForwarderConfig;

pub const DEF_LISTEN: &str = "127.0.0.1:5140";
pub const DEF_FORWARD_INTERVAL_SECS: u64 = 15;

/// Flush intervals below the default are clamped up to it; the sinks are
/// sized for coarse batches, not a per-request write path.
pub const MIN_FORWARD_INTERVAL: Duration = Duration::from_secs(DEF_FORWARD_INTERVAL_SECS);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid listen address {addr:?}: {source}")]
    InvalidListen {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Retag(#[from] RetagError),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Ship HAProxy access logs to time-series and SQL sinks", long_about = None)]
pub struct Config {
    /// Address and port to listen on for HAProxy UDP log traffic
    #[arg(long, env = "HALOG_LISTEN", default_value = DEF_LISTEN)]
    pub listen: String,

    /// Backends to accept, comma separated; empty accepts every backend
    #[arg(long, env = "HALOG_ACCEPT_BACKEND", value_delimiter = ',')]
    pub accept_backend: Vec<String>,

    /// Captured request-header names, in capture order, comma separated
    #[arg(long, env = "HALOG_CAPTURE_REQUEST_HEADER", value_delimiter = ',')]
    pub capture_request_header: Vec<String>,

    /// Seconds between flushes to the configured sinks
    #[arg(long, env = "HALOG_FORWARD_INTERVAL", default_value_t = DEF_FORWARD_INTERVAL_SECS)]
    pub forward_interval_secs: u64,

    /// Configuration file path (optional)
    #[arg(long, env = "HALOG_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Derived from `forward_interval_secs`, clamped to the minimum
    #[arg(skip)]
    pub forward_interval: Duration,

    /// Sink connection tables; file-only, no CLI equivalent
    #[arg(skip)]
    pub forwarders: ForwarderTable,

    /// `pattern => replacement` rules for the http_url tag; file-only
    #[arg(skip)]
    pub retag_http_url: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForwarderTable {
    pub influxdb: Option<ForwarderConfig>,
    pub questdb: Option<ForwarderConfig>,
    pub postgresql: Option<ForwarderConfig>,
}

/// On-disk TOML layout. Everything is optional; absent keys keep the CLI or
/// default values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    listen: Option<String>,
    accept_backend: Vec<String>,
    capture_request_header: Vec<String>,
    forward_interval: Option<u64>,
    forwarder: ForwarderTable,
    retag: RetagTable,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RetagTable {
    http_url: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEF_LISTEN.to_string(),
            accept_backend: Vec::new(),
            capture_request_header: Vec::new(),
            forward_interval_secs: DEF_FORWARD_INTERVAL_SECS,
            config_file: None,
            forward_interval: MIN_FORWARD_INTERVAL,
            forwarders: ForwarderTable::default(),
            retag_http_url: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        if let Some(path) = config.config_file.clone() {
            config.merge_file(&path)?;
        }
        config.post_process();
        Ok(config)
    }

    /// Overlay file values under whatever the CLI already set explicitly.
    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if self.listen == DEF_LISTEN
            && let Some(listen) = file.listen
        {
            self.listen = listen;
        }
        if self.accept_backend.is_empty() {
            self.accept_backend = file.accept_backend;
        }
        if self.capture_request_header.is_empty() {
            self.capture_request_header = file.capture_request_header;
        }
        if self.forward_interval_secs == DEF_FORWARD_INTERVAL_SECS
            && let Some(interval) = file.forward_interval
        {
            self.forward_interval_secs = interval;
        }
        self.forwarders = file.forwarder;
        self.retag_http_url = file.retag.http_url;

        Ok(())
    }

    fn post_process(&mut self) {
        self.forward_interval = Duration::from_secs(self.forward_interval_secs);
        if self.forward_interval < MIN_FORWARD_INTERVAL {
            warn!(
                configured = self.forward_interval_secs,
                minimum = DEF_FORWARD_INTERVAL_SECS,
                "forward interval below minimum, clamping"
            );
            self.forward_interval = MIN_FORWARD_INTERVAL;
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|source| ConfigError::InvalidListen {
            addr: self.listen.clone(),
            source,
        })
    }

    /// Compile the configured `http_url` rule strings, skipping blanks.
    pub fn retag_rules(&self) -> Result<Vec<TagRule>, ConfigError> {
        let mut rules = Vec::new();
        for raw in &self.retag_http_url {
            if let Some(rule) = TagRule::parse(TAG_HTTP_URL, raw)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults() {
        let config = Config::from_args(["halog-forwarder"]).unwrap();
        assert_eq!(config.listen, DEF_LISTEN);
        assert_eq!(config.forward_interval, Duration::from_secs(15));
        assert!(config.accept_backend.is_empty());
        assert!(config.forwarders.influxdb.is_none());
    }

    #[test]
    fn listen_addr_parses_and_rejects() {
        let config = Config::from_args(["halog-forwarder", "--listen", "0.0.0.0:5140"]).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 5140);

        let config = Config::from_args(["halog-forwarder", "--listen", "not-an-addr"]).unwrap();
        assert!(matches!(
            config.listen_addr(),
            Err(ConfigError::InvalidListen { .. })
        ));
    }

    #[test]
    fn comma_separated_lists_split() {
        let config = Config::from_args([
            "halog-forwarder",
            "--accept-backend",
            "api,static",
            "--capture-request-header",
            "host,referrer",
        ])
        .unwrap();
        assert_eq!(config.accept_backend, ["api", "static"]);
        assert_eq!(config.capture_request_header, ["host", "referrer"]);
    }

    #[test]
    fn short_interval_is_clamped() {
        let config =
            Config::from_args(["halog-forwarder", "--forward-interval-secs", "5"]).unwrap();
        assert_eq!(config.forward_interval, MIN_FORWARD_INTERVAL);
    }

    #[test]
    fn long_interval_is_kept() {
        let config =
            Config::from_args(["halog-forwarder", "--forward-interval-secs", "60"]).unwrap();
        assert_eq!(config.forward_interval, Duration::from_secs(60));
    }

    #[test]
    fn config_file_fills_unset_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen = "0.0.0.0:10514"
accept_backend = ["api"]
capture_request_header = ["host", "referrer"]
forward_interval = 30

[forwarder.influxdb]
url = "http://127.0.0.1:8086"
version = "v2"
org = "myorg"
token = "secret"

[forwarder.questdb]
url = "udp://127.0.0.1:9009"

[retag]
http_url = ["/[0-9]+ => /-"]
"#
        )
        .unwrap();

        let config = Config::from_args([
            "halog-forwarder",
            "--config-file",
            file.path().to_str().unwrap(),
        ])
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:10514");
        assert_eq!(config.accept_backend, ["api"]);
        assert_eq!(config.forward_interval, Duration::from_secs(30));

        let influxdb = config.forwarders.influxdb.as_ref().unwrap();
        assert_eq!(influxdb.org, "myorg");
        assert_eq!(influxdb.token, "secret");
        assert!(config.forwarders.postgresql.is_none());

        let rules = config.retag_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].apply(TAG_HTTP_URL, "/test/1000"), "/test/-");
    }

    #[test]
    fn cli_values_win_over_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"listen = "0.0.0.0:10514""#).unwrap();

        let config = Config::from_args([
            "halog-forwarder",
            "--listen",
            "127.0.0.1:6000",
            "--config-file",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:6000");
    }

    #[test]
    fn bad_retag_rule_is_an_error() {
        let config = Config {
            retag_http_url: vec!["/[0-9]+ /-".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            config.retag_rules(),
            Err(ConfigError::Retag(RetagError::MissingSeparator(_)))
        ));
    }
}
