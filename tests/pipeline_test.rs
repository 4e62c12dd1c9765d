//! End-to-end pipeline tests: a real UDP listener on an ephemeral port, a
//! real UDP sink pointed at a local receiver standing in for QuestDB.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use halog_forwarder::parser::TagRule;
use halog_forwarder::pipeline::{Pipeline, PipelineConfig};
use halog_forwarder::sender::{Forwarder, ForwarderConfig, QuestdbClient};

const SAMPLE: &str = r#"127.0.0.1:4567 [10/Oct/2020:13:55:36.000] frontend backend/server 0/0/0/0/1 200 150 - - ---- 1/1/1/1/0 0/0 "GET /test/1000 HTTP/1.1""#;

const FLUSH_INTERVAL: Duration = Duration::from_millis(200);
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

struct Harness {
    pipeline: Pipeline,
    listen_addr: SocketAddr,
    sink: UdpSocket,
    sender: UdpSocket,
}

/// Start a pipeline on an ephemeral port, forwarding to a local UDP sink.
async fn start_pipeline(accept_backend: Vec<String>, retags: Vec<TagRule>) -> Harness {
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sink_addr = sink.local_addr().unwrap();

    let sink_cfg = ForwarderConfig {
        url: format!("udp://{sink_addr}"),
        ..ForwarderConfig::default()
    };
    let client = QuestdbClient::new(&sink_cfg, "testhost").await.unwrap();

    let mut pipeline = Pipeline::new(PipelineConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        accept_backend,
        request_headers: Vec::new(),
        forward_interval: FLUSH_INTERVAL,
        retags,
    });
    pipeline
        .start(vec![Forwarder::Questdb(client)], None)
        .await
        .unwrap();
    let listen_addr = pipeline.local_addr().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    Harness {
        pipeline,
        listen_addr,
        sink,
        sender,
    }
}

impl Harness {
    async fn send(&self, line: &str) {
        self.sender
            .send_to(line.as_bytes(), self.listen_addr)
            .await
            .unwrap();
    }

    async fn recv_flush(&self) -> String {
        let mut buf = vec![0u8; 16384];
        let len = timeout(RECV_TIMEOUT, self.sink.recv(&mut buf))
            .await
            .expect("no flush arrived")
            .unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    async fn expect_no_flush(&self) {
        let mut buf = vec![0u8; 16384];
        let got = timeout(Duration::from_millis(700), self.sink.recv(&mut buf)).await;
        assert!(got.is_err(), "unexpected flush received");
    }
}

#[tokio::test]
async fn accepted_records_are_flushed_on_the_tick() {
    let harness = start_pipeline(Vec::new(), Vec::new()).await;

    harness.send(SAMPLE).await;
    let flush = harness.recv_flush().await;

    assert!(flush.starts_with("haproxy,host=testhost,"));
    assert!(flush.contains(",backend=backend,"));
    assert!(flush.contains(",http_url=/test/1000,"));
    assert!(flush.contains("bytes_read=150 "));

    harness.pipeline.stop();
}

#[tokio::test]
async fn one_flush_carries_the_whole_batch_in_arrival_order() {
    let harness = start_pipeline(Vec::new(), Vec::new()).await;

    harness.send(SAMPLE).await;
    harness
        .send(&SAMPLE.replace("/test/1000", "/second"))
        .await;
    let flush = harness.recv_flush().await;

    let lines: Vec<&str> = flush.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("http_url=/test/1000"));
    assert!(lines[1].contains("http_url=/second"));

    harness.pipeline.stop();
}

#[tokio::test]
async fn empty_intervals_do_not_flush() {
    let harness = start_pipeline(Vec::new(), Vec::new()).await;
    harness.expect_no_flush().await;
    harness.pipeline.stop();
}

#[tokio::test]
async fn records_without_a_backend_are_dropped() {
    let harness = start_pipeline(Vec::new(), Vec::new()).await;

    harness.send(&SAMPLE.replace("backend/server", "-/server")).await;
    harness.expect_no_flush().await;

    harness.pipeline.stop();
}

#[tokio::test]
async fn accept_list_is_an_exact_membership_gate() {
    let harness = start_pipeline(vec!["other".to_string()], Vec::new()).await;
    harness.send(SAMPLE).await;
    harness.expect_no_flush().await;
    harness.pipeline.stop();

    let harness = start_pipeline(vec!["backend".to_string()], Vec::new()).await;
    harness.send(SAMPLE).await;
    let flush = harness.recv_flush().await;
    assert!(flush.contains(",backend=backend,"));
    harness.pipeline.stop();
}

#[tokio::test]
async fn malformed_datagrams_are_dropped_without_stopping_the_pipeline() {
    let harness = start_pipeline(Vec::new(), Vec::new()).await;

    harness.send("not a log line").await;
    harness.send(SAMPLE).await;
    let flush = harness.recv_flush().await;
    assert_eq!(flush.lines().count(), 1);

    harness.pipeline.stop();
}

#[tokio::test]
async fn url_tag_is_normalized_before_flush() {
    let retag = TagRule::parse("http_url", "/[0-9]+ => /-")
        .unwrap()
        .unwrap();
    let harness = start_pipeline(Vec::new(), vec![retag]).await;

    harness.send(SAMPLE).await;
    let flush = harness.recv_flush().await;

    assert!(flush.contains(",http_url=/test/-,"));
    assert!(!flush.contains("/test/1000"));

    harness.pipeline.stop();
}

#[tokio::test]
async fn stop_is_idempotent_and_workers_exit() {
    let mut harness = start_pipeline(Vec::new(), Vec::new()).await;
    assert!(harness.pipeline.is_running());

    harness.pipeline.stop();
    harness.pipeline.stop();
    assert!(!harness.pipeline.is_running());

    timeout(Duration::from_secs(2), harness.pipeline.join())
        .await
        .expect("workers did not exit");
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let mut harness = start_pipeline(Vec::new(), Vec::new()).await;
    let again = harness.pipeline.start(Vec::new(), None).await;
    assert!(again.is_err());
    harness.pipeline.stop();
}
