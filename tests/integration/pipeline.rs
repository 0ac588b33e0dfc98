//! End-to-end tests: agent -> collector -> sync bridge -> portal store
//!
//! These tests verify that:
//! - Samples of one host collapse into a single online server
//! - The sync bridge imports every record exactly once
//! - One alert row is written per imported record
//! - A rejected handshake or payload drops the link and the next send reconnects
//! - The upload loop retries a failed sample unless a fresher one is waiting

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures::{SinkExt, StreamExt};
use hostwatch::{
    Sample,
    actors::{
        producer::{SnapshotProducer, handoff},
        sync::{SyncBridgeActor, SyncConfig},
        messages::UploaderState,
        uploader::{StreamUploader, UploadError, run_upload_loop},
    },
    monitors::{host::MetricsSource, thresholds::Thresholds},
    protocol::Envelope,
    storage::{CollectorStore, QueryRange, ServerStatus},
    util,
};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use crate::helpers::{SECRET, TestCollector, eventually, portal_store, sample};

struct FixedSource(Sample);

#[async_trait::async_trait]
impl MetricsSource for FixedSource {
    async fn snapshot(&mut self) -> anyhow::Result<Sample> {
        Ok(self.0.clone())
    }
}

/// Ingestion endpoint that authenticates every handshake and answers
/// payloads from a script, then with `ack` once the script runs out
struct ScriptedCollector {
    url: String,
    connections: Arc<AtomicUsize>,
    /// CPU usage of every payload received, in order
    received: Arc<Mutex<Vec<f64>>>,
}

impl ScriptedCollector {
    async fn spawn(replies: &[&'static str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ingest", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(replies.iter().copied().collect::<VecDeque<_>>()));

        let (conns, seen) = (connections.clone(), received.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                conns.fetch_add(1, Ordering::SeqCst);
                let (seen, script) = (seen.clone(), script.clone());

                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(Message::Text(text))) = socket.next().await {
                        let envelope: Envelope<Sample> = serde_json::from_str(&text).unwrap();
                        let reply = match envelope.data {
                            None => "authenticated",
                            Some(sample) => {
                                seen.lock().await.push(sample.cpu.percent_usage);
                                script.lock().await.pop_front().unwrap_or("ack")
                            }
                        };
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            url,
            connections,
            received,
        }
    }

    async fn received(&self) -> Vec<f64> {
        self.received.lock().await.clone()
    }
}

fn around_now() -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let now = util::now();
    (now - ChronoDuration::minutes(10), now + ChronoDuration::minutes(10))
}

#[tokio::test]
async fn test_two_samples_one_server_two_records() {
    let collector = TestCollector::spawn().await;
    let uploader = StreamUploader::new(collector.ws_url(), SECRET, Duration::from_secs(5));

    uploader.send(&sample("10.0.0.5", 10.0)).await.unwrap();
    // records are stamped with second resolution
    tokio::time::sleep(Duration::from_millis(1100)).await;
    uploader.send(&sample("10.0.0.5", 95.0)).await.unwrap();

    let store = collector.store.clone();
    let (start, end) = around_now();
    assert!(eventually(|| {
        let store = store.clone();
        async move {
            let servers = store.list_servers().await.unwrap();
            if servers.len() != 1 {
                return false;
            }
            let range = QueryRange::new(servers[0].id, start, end);
            store.performance_range(range).await.unwrap().len() == 2
        }
    })
    .await);

    let servers = collector.store.list_servers().await.unwrap();
    assert_eq!(servers[0].ip_address, "10.0.0.5");
    assert_eq!(servers[0].status, ServerStatus::Online);

    uploader.close().await;
}

#[tokio::test]
async fn test_sync_imports_once_and_writes_alerts() {
    let collector = TestCollector::spawn().await;
    let uploader = StreamUploader::new(collector.ws_url(), SECRET, Duration::from_secs(5));

    uploader.send(&sample("10.0.0.5", 10.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    uploader.send(&sample("10.0.0.5", 95.0)).await.unwrap();
    uploader.close().await;

    let store = collector.store.clone();
    let (start, end) = around_now();
    assert!(eventually(|| {
        let store = store.clone();
        async move {
            match store.list_servers().await.unwrap().first() {
                Some(server) => {
                    let range = QueryRange::new(server.id, start, end);
                    store.performance_range(range).await.unwrap().len() == 2
                }
                None => false,
            }
        }
    })
    .await);

    let dir = tempfile::tempdir().unwrap();
    let portal = portal_store(&dir).await;
    let (_commands, command_rx) = mpsc::channel(1);
    let bridge = SyncBridgeActor::new(
        SyncConfig {
            collector_url: collector.http_url(),
            interval: Duration::from_secs(60),
            backfill: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(5),
        },
        portal.clone(),
        Thresholds::default(),
        command_rx,
    )
    .unwrap();

    let first = bridge.run_cycle().await.unwrap();
    assert_eq!(first.servers_inserted, 1);
    assert_eq!(first.records_imported, 2);
    assert_eq!(first.alerts_written, 2);

    let second = bridge.run_cycle().await.unwrap();
    assert_eq!(second.servers_inserted, 0);
    assert_eq!(second.servers_updated, 1);
    assert_eq!(second.records_imported, 0);
    assert_eq!(second.alerts_written, 0);

    let server = portal
        .find_server_by_ip("10.0.0.5")
        .await
        .unwrap()
        .expect("server imported");
    let (start, end) = around_now();

    let records = portal
        .performance_range(QueryRange::new(server.id, start, end))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let alerts = portal
        .alerts_range(QueryRange::new(server.id, start, end))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts.iter().filter(|alert| alert.is_valid_alert).count(), 1);
    assert!(alerts.iter().any(|alert| alert.cpu_alert.alert && alert.cpu_alert.current_value == 95.0));
}

#[tokio::test]
async fn test_agent_tasks_feed_collector() {
    let collector = TestCollector::spawn().await;

    let (slot, samples) = handoff();
    let producer = SnapshotProducer::new(
        FixedSource(sample("10.0.0.9", 20.0)),
        slot,
        Duration::from_millis(50),
    );
    let uploader = Arc::new(StreamUploader::new(collector.ws_url(), SECRET, Duration::from_secs(5)));

    let producer_task = tokio::spawn(producer.run());
    let upload_task = tokio::spawn(run_upload_loop(uploader.clone(), samples, Duration::from_millis(50)));

    let store = collector.store.clone();
    let (start, end) = around_now();
    let delivered = eventually(|| {
        let store = store.clone();
        async move {
            match store.list_servers().await.unwrap().first() {
                Some(server) => {
                    let range = QueryRange::new(server.id, start, end);
                    store.performance_range(range).await.unwrap().len() >= 2
                }
                None => false,
            }
        }
    })
    .await;

    producer_task.abort();
    upload_task.abort();
    uploader.close().await;

    assert!(delivered);
    assert_eq!(collector.store.list_servers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let collector = TestCollector::spawn().await;
    let uploader = StreamUploader::new(collector.ws_url(), "wrong-secret", Duration::from_secs(5));

    let result = uploader.connect().await;
    assert!(matches!(&result, Err(UploadError::HandshakeRejected(reply)) if reply == "authentication_failed"));
    assert_eq!(uploader.state(), UploaderState::Disconnected);

    // send connects lazily and fails the same way
    let result = uploader.send(&sample("10.0.0.11", 10.0)).await;
    assert!(matches!(result, Err(UploadError::HandshakeRejected(_))));
    assert_eq!(uploader.state(), UploaderState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collector.store.list_servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_sample_drops_the_link() {
    let collector = ScriptedCollector::spawn(&["error"]).await;
    let uploader = StreamUploader::new(collector.url.clone(), SECRET, Duration::from_secs(5));

    uploader.connect().await.unwrap();
    assert_eq!(uploader.state(), UploaderState::Authenticated);

    let result = uploader.send(&sample("10.0.0.12", 10.0)).await;
    assert!(matches!(&result, Err(UploadError::Rejected(reply)) if reply == "error"));
    assert_eq!(uploader.state(), UploaderState::Disconnected);
    assert_eq!(collector.connections.load(Ordering::SeqCst), 1);

    uploader.send(&sample("10.0.0.12", 20.0)).await.unwrap();
    assert_eq!(uploader.state(), UploaderState::Authenticated);
    assert_eq!(collector.connections.load(Ordering::SeqCst), 2);
    assert_eq!(collector.received().await, vec![10.0, 20.0]);

    uploader.close().await;
}

#[tokio::test]
async fn test_upload_loop_retries_then_prefers_fresh_sample() {
    let collector = ScriptedCollector::spawn(&["error", "error"]).await;
    let uploader = Arc::new(StreamUploader::new(collector.url.clone(), SECRET, Duration::from_secs(5)));
    let (slot, samples) = mpsc::channel(1);

    let upload_task = tokio::spawn(run_upload_loop(uploader.clone(), samples, Duration::from_millis(500)));
    slot.send(sample("10.0.0.13", 10.0)).await.unwrap();

    // the failed sample is sent again while nothing newer is waiting
    let collector_ref = &collector;
    assert!(eventually(|| async move { collector_ref.received().await.len() == 2 }).await);
    slot.send(sample("10.0.0.13", 20.0)).await.unwrap();

    assert!(eventually(|| async move { collector_ref.received().await.len() == 3 }).await);
    assert_eq!(collector.received().await, vec![10.0, 10.0, 20.0]);

    drop(slot);
    tokio::time::timeout(Duration::from_secs(5), upload_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uploader.state(), UploaderState::Disconnected);
}
