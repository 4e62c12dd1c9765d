//! UDP ingestion pipeline: consume datagrams, parse, filter, batch, flush.
//!
//! Two long-running workers joined by one bounded queue: the consumer owns
//! the socket and the producer owns the batch. Delivery is best-effort and
//! at-most-once end to end; when the queue is full the consumer stalls and
//! further datagrams pile up in (or fall out of) the OS socket buffer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::HttpLog;
use crate::parser::{self, TAG_HTTP_URL, TagRule, apply_rules};
use crate::sender::Forwarder;
use crate::tail::TailPublisher;

/// Bytes read per datagram; HAProxy HTTP log lines fit well below this.
const READ_BUFFER_SIZE: usize = 4096;

/// Records buffered between the consumer and the batching stage.
const RECORD_QUEUE_SIZE: usize = 30;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to bind UDP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("pipeline is already running")]
    AlreadyRunning,
}

/// Everything the pipeline needs, resolved ahead of time by the app layer.
pub struct PipelineConfig {
    /// Address the UDP listener binds to.
    pub listen: SocketAddr,
    /// Backends whose traffic is retained; empty retains everything.
    pub accept_backend: Vec<String>,
    /// Captured request-header names, in capture order.
    pub request_headers: Vec<String>,
    /// Period between flushes to the sinks.
    pub forward_interval: Duration,
    /// Normalization rules for the `http_url` tag.
    pub retags: Vec<TagRule>,
}

/// The ingestion pipeline. One cycle: `new` → `start` → `stop` → `join`.
pub struct Pipeline {
    cfg: Arc<PipelineConfig>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self {
            cfg: Arc::new(cfg),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            local_addr: None,
            workers: Vec::new(),
        }
    }

    /// Bind the listener and spawn the consumer and producer workers.
    ///
    /// `forwarders` receive every flushed batch sequentially; `tail`, when
    /// given, receives a non-blocking mirror of every raw datagram.
    pub async fn start(
        &mut self,
        forwarders: Vec<Forwarder>,
        tail: Option<TailPublisher>,
    ) -> Result<(), PipelineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }

        let socket = match UdpSocket::bind(self.cfg.listen).await {
            Ok(socket) => socket,
            Err(source) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(PipelineError::Bind {
                    addr: self.cfg.listen,
                    source,
                });
            }
        };
        self.local_addr = socket.local_addr().ok();
        info!(
            addr = %self.local_addr.unwrap_or(self.cfg.listen),
            "listening for HAProxy logs"
        );

        let (record_tx, record_rx) = mpsc::channel(RECORD_QUEUE_SIZE);

        self.workers.push(tokio::spawn(consume(
            self.cfg.clone(),
            socket,
            record_tx,
            tail,
            self.cancel.clone(),
        )));
        self.workers.push(tokio::spawn(produce(
            self.cfg.clone(),
            record_rx,
            forwarders,
            self.cancel.clone(),
        )));

        Ok(())
    }

    /// Address actually bound; differs from the configured one when port 0
    /// was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent; both workers observe the cancellation at their next loop
    /// boundary. An in-flight sink write is not interrupted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Wait for both workers to finish after `stop`.
    pub async fn join(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

/// A record is dropped when no backend was selected (`-`, e.g. health
/// probes) or, with a non-empty accept-list, when its backend is not an
/// exact member.
fn accept(cfg: &PipelineConfig, log: &HttpLog) -> bool {
    if log.backend_name == "-" {
        return false;
    }
    cfg.accept_backend.is_empty()
        || cfg
            .accept_backend
            .iter()
            .any(|backend| *backend == log.backend_name)
}

/// Consumer worker: read datagrams, mirror them to the tail, parse, filter,
/// and push accepted records onto the bounded queue.
async fn consume(
    cfg: Arc<PipelineConfig>,
    socket: UdpSocket,
    record_tx: mpsc::Sender<HttpLog>,
    tail: Option<TailPublisher>,
    cancel: CancellationToken,
) {
    let mut packet = [0u8; READ_BUFFER_SIZE];

    loop {
        let len = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut packet) => match received {
                Ok((len, _)) => len,
                Err(err) => {
                    // Likely transient (interrupted call); keep consuming.
                    debug!("socket read failed: {err}");
                    continue;
                }
            },
        };
        let raw = &packet[..len];

        if let Some(tail) = &tail {
            tail.publish(String::from_utf8_lossy(raw).into_owned());
        }

        let log = match parser::parse_packet(raw, &cfg.request_headers) {
            Ok(log) => log,
            Err(err) => {
                debug!("dropping datagram: {err}");
                continue;
            }
        };

        if !accept(&cfg, &log) {
            continue;
        }

        // Blocking push: when the batching stage lags, ingestion stalls and
        // the OS socket buffer absorbs the overflow.
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = record_tx.send(log) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!("consumer stopped");
}

/// Producer worker: normalize and accumulate records, flush the batch to
/// every sink on each interval tick.
async fn produce(
    cfg: Arc<PipelineConfig>,
    mut record_rx: mpsc::Receiver<HttpLog>,
    mut forwarders: Vec<Forwarder>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(
        Instant::now() + cfg.forward_interval,
        cfg.forward_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut batch: Vec<HttpLog> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = record_rx.recv() => match received {
                Some(mut log) => {
                    log.tag_http_url = apply_rules(&cfg.retags, TAG_HTTP_URL, &log.http_url);
                    batch.push(log);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if batch.is_empty() {
                    continue;
                }
                debug!(records = batch.len(), "flushing batch");
                for forwarder in &mut forwarders {
                    forwarder.forwards(&batch).await;
                }
                batch.clear();
            }
        }
    }

    debug!("producer stopped");
}
