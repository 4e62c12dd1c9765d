pub mod config;

pub use config::{Config, ConfigError};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{Pipeline, PipelineConfig};
use crate::sender::{Forwarder, InfluxdbClient, PostgresqlWriter, QuestdbClient};
use crate::tail::TailBroadcaster;

/// The assembled application: pipeline, sinks, and tail broadcaster.
pub struct App {
    pipeline: Pipeline,
    forwarders: Vec<Forwarder>,
    tail: TailBroadcaster,
}

impl App {
    pub async fn from_config(
        config: Config,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let hostname = resolve_hostname();
        let forwarders = build_forwarders(&config, &hostname).await;
        if forwarders.is_empty() {
            info!("no sinks configured, records will only be counted and dropped");
        }

        let pipeline = Pipeline::new(PipelineConfig {
            listen: config.listen_addr()?,
            accept_backend: config.accept_backend.clone(),
            request_headers: config.capture_request_header.clone(),
            forward_interval: config.forward_interval,
            retags: config.retag_rules()?,
        });

        Ok(Self {
            pipeline,
            forwarders,
            tail: TailBroadcaster::start(),
        })
    }

    /// Run until ctrl-c, then stop the pipeline and wait for its workers.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let forwarders = std::mem::take(&mut self.forwarders);
        let publisher = self.tail.publisher();
        self.pipeline.start(forwarders, Some(publisher)).await?;

        tokio::signal::ctrl_c().await?;
        info!("shutting down");

        self.pipeline.stop();
        self.pipeline.join().await;
        Ok(())
    }

    /// Handle for the presentation layer serving live tails.
    pub fn tail(&self) -> &TailBroadcaster {
        &self.tail
    }
}

/// Hostname tag shared by every sink, resolved once at startup: OS hostname,
/// then the `HOSTNAME` variable, then `localhost`.
fn resolve_hostname() -> String {
    match hostname::get() {
        Ok(name) if !name.is_empty() => name.to_string_lossy().into_owned(),
        _ => std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
    }
}

/// Build every sink whose URL is configured. A sink that fails validation
/// is logged and skipped; the pipeline still runs with the remaining ones.
async fn build_forwarders(config: &Config, hostname: &str) -> Vec<Forwarder> {
    let mut forwarders = Vec::new();

    if let Some(cfg) = &config.forwarders.influxdb
        && !cfg.url.is_empty()
    {
        match InfluxdbClient::new(cfg, hostname) {
            Ok(client) => forwarders.push(Forwarder::Influxdb(client)),
            Err(err) => error!("influxdb: sink disabled: {err}"),
        }
    }

    if let Some(cfg) = &config.forwarders.questdb
        && !cfg.url.is_empty()
    {
        match QuestdbClient::new(cfg, hostname).await {
            Ok(client) => forwarders.push(Forwarder::Questdb(client)),
            Err(err) => error!("questdb: sink disabled: {err}"),
        }
    }

    if let Some(cfg) = &config.forwarders.postgresql
        && !cfg.url.is_empty()
    {
        match PostgresqlWriter::new(&cfg.url) {
            Ok(writer) => forwarders.push(Forwarder::Postgresql(writer)),
            Err(err) => error!("postgresql: sink disabled: {err}"),
        }
    }

    for forwarder in &forwarders {
        info!(kind = forwarder.kind(), "sink configured");
    }

    forwarders
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Main entry point for the application.
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_args(std::env::args())?;
    setup_logging();

    info!("starting halog-forwarder v{}", crate::VERSION);
    let app = App::from_config(config).await?;
    app.run().await
}
