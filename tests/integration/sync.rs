//! Integration tests for the sync bridge against a mocked collector
//!
//! These tests verify that:
//! - Server status is mirrored into the portal store
//! - Records already imported are never imported twice
//! - Alerts follow the configured thresholds
//! - A failed alert write keeps neither row and does not stop the cycle

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hostwatch::{
    actors::sync::{SyncBridgeActor, SyncConfig},
    monitors::thresholds::Thresholds,
    storage::{
        PerformanceRecord, PortalStore, QueryRange, ServerRecord, ServerStatus,
        portal::SqlitePortalStore,
    },
    util,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{database_in, portal_store, sample};

fn remote_server(id: i64, ip: &str, status: ServerStatus, last_seen: DateTime<Utc>) -> ServerRecord {
    ServerRecord {
        id,
        name: ServerRecord::display_name(ip),
        platform: "Linux".to_string(),
        os_version: "6.1.0".to_string(),
        ip_address: ip.to_string(),
        status,
        last_seen,
        notes: None,
    }
}

fn remote_records(server_id: i64, ip: &str, base: DateTime<Utc>, cpu: &[f64]) -> Vec<PerformanceRecord> {
    cpu.iter()
        .enumerate()
        .map(|(i, cpu)| {
            let mut record = PerformanceRecord::from_sample(
                server_id,
                base + ChronoDuration::seconds(i as i64 * 5),
                &sample(ip, *cpu),
            );
            record.id = i as i64 + 1;
            record
        })
        .collect()
}

fn bridge(url: String, store: Arc<dyn PortalStore>, thresholds: Thresholds) -> SyncBridgeActor {
    let (_commands, command_rx) = mpsc::channel(1);
    SyncBridgeActor::new(
        SyncConfig {
            collector_url: url,
            interval: Duration::from_secs(3600),
            backfill: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(5),
        },
        store,
        thresholds,
        command_rx,
    )
    .unwrap()
}

async fn mount_collector(mock_server: &MockServer, servers: &[ServerRecord], records: &[PerformanceRecord]) {
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(servers))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/performance"))
        .and(query_param("server_id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_records_are_imported_once() {
    let mock_server = MockServer::start().await;
    let seen = util::now() - ChronoDuration::minutes(1);
    let servers = vec![remote_server(7, "10.1.0.7", ServerStatus::Online, seen)];
    let records = remote_records(7, "10.1.0.7", seen - ChronoDuration::seconds(10), &[10.0, 20.0, 30.0]);
    mount_collector(&mock_server, &servers, &records).await;

    let dir = tempfile::tempdir().unwrap();
    let store = portal_store(&dir).await;
    let bridge = bridge(mock_server.uri(), store.clone(), Thresholds::default());

    let first = bridge.run_cycle().await.unwrap();
    assert_eq!(first.servers_seen, 1);
    assert_eq!(first.records_fetched, 3);
    assert_eq!(first.records_imported, 3);

    // the mock ignores the window, so the same three rows come back
    let second = bridge.run_cycle().await.unwrap();
    assert_eq!(second.records_fetched, 3);
    assert_eq!(second.records_imported, 0);
    assert_eq!(second.alerts_written, 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.servers, 1);
    assert_eq!(stats.performance_records, 3);
    assert_eq!(stats.alerts, 3);
}

#[tokio::test]
async fn test_first_window_starts_at_backfill() {
    let mock_server = MockServer::start().await;
    let seen = util::now();
    let servers = vec![remote_server(7, "10.1.0.7", ServerStatus::Online, seen)];
    mount_collector(&mock_server, &servers, &[]).await;

    let dir = tempfile::tempdir().unwrap();
    let store = portal_store(&dir).await;
    bridge(mock_server.uri(), store, Thresholds::default())
        .run_cycle()
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let performance = requests
        .iter()
        .find(|request| request.url.path() == "/performance")
        .expect("performance was requested");

    let query: std::collections::HashMap<String, String> =
        performance.url.query_pairs().into_owned().collect();
    let start = util::parse_timestamp(&query["start_time"]).unwrap();
    let end = util::parse_timestamp(&query["end_time"]).unwrap();

    let window = end - start;
    assert_eq!(window, ChronoDuration::seconds(3600));
}

#[tokio::test]
async fn test_alerts_follow_thresholds() {
    let mock_server = MockServer::start().await;
    let seen = util::now() - ChronoDuration::minutes(1);
    let servers = vec![remote_server(7, "10.1.0.7", ServerStatus::Online, seen)];
    let records = remote_records(7, "10.1.0.7", seen - ChronoDuration::seconds(10), &[40.0, 60.0]);
    mount_collector(&mock_server, &servers, &records).await;

    let dir = tempfile::tempdir().unwrap();
    let store = portal_store(&dir).await;
    let thresholds = Thresholds {
        cpu_threshold: 50.0,
        ..Thresholds::default()
    };
    bridge(mock_server.uri(), store.clone(), thresholds)
        .run_cycle()
        .await
        .unwrap();

    let server = store.find_server_by_ip("10.1.0.7").await.unwrap().unwrap();
    let alerts = store
        .alerts_range(QueryRange::new(
            server.id,
            seen - ChronoDuration::hours(1),
            seen + ChronoDuration::hours(1),
        ))
        .await
        .unwrap();

    assert_eq!(alerts.len(), 2);
    assert!(!alerts[0].is_valid_alert);
    assert!(alerts[1].is_valid_alert);
    assert_eq!(alerts[1].cpu_alert.threshold, 50.0);
    assert!(!alerts[1].memory_alert.alert);
    assert!(!alerts[1].network_alert.upload_alert);
}

#[tokio::test]
async fn test_status_is_mirrored() {
    let mock_server = MockServer::start().await;
    let seen = util::now() - ChronoDuration::minutes(1);

    let dir = tempfile::tempdir().unwrap();
    let store = portal_store(&dir).await;
    store
        .insert_server(&remote_server(0, "10.1.0.7", ServerStatus::Online, seen - ChronoDuration::hours(1)))
        .await
        .unwrap();

    let servers = vec![remote_server(7, "10.1.0.7", ServerStatus::Offline, seen)];
    mount_collector(&mock_server, &servers, &[]).await;

    let report = bridge(mock_server.uri(), store.clone(), Thresholds::default())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.servers_updated, 1);
    assert_eq!(report.servers_inserted, 0);

    let server = store.find_server_by_ip("10.1.0.7").await.unwrap().unwrap();
    assert_eq!(server.status, ServerStatus::Offline);
    assert_eq!(server.last_seen, seen);
}

#[tokio::test]
async fn test_failed_alert_write_is_retried_next_cycle() {
    let mock_server = MockServer::start().await;
    let seen = util::now() - ChronoDuration::minutes(1);
    let servers = vec![
        remote_server(7, "10.1.0.7", ServerStatus::Online, seen),
        remote_server(8, "10.1.0.8", ServerStatus::Online, seen),
    ];
    let base = seen - ChronoDuration::seconds(10);
    mount_collector(&mock_server, &servers, &remote_records(7, "10.1.0.7", base, &[10.0, 95.0])).await;
    Mock::given(method("GET"))
        .and(path("/performance"))
        .and(query_param("server_id", "8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_records(8, "10.1.0.8", base, &[20.0])))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sqlite = Arc::new(SqlitePortalStore::open(&database_in(&dir, "portal.db")).await.unwrap());
    let store: Arc<dyn PortalStore> = sqlite.clone();
    let first_id = store
        .insert_server(&remote_server(0, "10.1.0.7", ServerStatus::Online, seen))
        .await
        .unwrap()
        .unwrap();

    // alerts of the first server cannot be written for now
    sqlx::query(&format!(
        "CREATE TRIGGER reject_alerts BEFORE INSERT ON alerts \
         WHEN NEW.server_id = {first_id} BEGIN SELECT RAISE(ABORT, 'transient'); END"
    ))
    .execute(sqlite.pool())
    .await
    .unwrap();

    let bridge = bridge(mock_server.uri(), store.clone(), Thresholds::default());

    let first = bridge.run_cycle().await.unwrap();
    assert_eq!(first.failures, 2);
    assert_eq!(first.records_imported, 1);
    assert_eq!(first.alerts_written, 1);

    // neither the records nor their alerts were kept
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.performance_records, 1);
    assert_eq!(stats.alerts, 1);
    assert_eq!(store.latest_timestamp(first_id).await.unwrap(), None);

    sqlx::query("DROP TRIGGER reject_alerts")
        .execute(sqlite.pool())
        .await
        .unwrap();

    let second = bridge.run_cycle().await.unwrap();
    assert_eq!(second.failures, 0);
    assert_eq!(second.records_imported, 2);
    assert_eq!(second.alerts_written, 2);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.performance_records, 3);
    assert_eq!(stats.alerts, 3);

    let alerts = store
        .alerts_range(QueryRange::new(
            first_id,
            seen - ChronoDuration::hours(1),
            seen + ChronoDuration::hours(1),
        ))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
    assert!(alerts[1].is_valid_alert);
}
