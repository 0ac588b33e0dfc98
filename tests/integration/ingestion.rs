//! Integration tests for the agent ingestion socket
//!
//! These tests verify that:
//! - The handshake gates the connection
//! - Every frame gets exactly one reply
//! - Rejected frames leave the connection usable
//! - Accepted samples end up in Store A

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures::StreamExt;
use hostwatch::{
    protocol::{Envelope, Reply},
    storage::{CollectorStore, QueryRange},
    util,
};
use pretty_assertions::assert_eq;
use tokio_tungstenite::tungstenite::Message;

use crate::helpers::{SECRET, TestCollector, eventually, exchange, sample};

fn handshake(secret: &str) -> String {
    serde_json::to_string(&Envelope::<hostwatch::Sample>::handshake(secret)).unwrap()
}

fn payload(secret: &str, ip: &str) -> String {
    serde_json::to_string(&Envelope::payload(secret, sample(ip, 10.0))).unwrap()
}

#[tokio::test]
async fn test_sample_is_acknowledged_and_stored() {
    let collector = TestCollector::spawn().await;
    let mut socket = collector.connect().await;

    assert_eq!(exchange(&mut socket, handshake(SECRET)).await, Reply::Authenticated.as_str());
    assert_eq!(exchange(&mut socket, payload(SECRET, "10.0.0.5")).await, Reply::Ack.as_str());

    let store = collector.store.clone();
    assert!(eventually(|| {
        let store = store.clone();
        async move { store.list_servers().await.unwrap().len() == 1 }
    })
    .await);

    let servers = collector.store.list_servers().await.unwrap();
    assert_eq!(servers[0].ip_address, "10.0.0.5");
    assert_eq!(servers[0].name, "Server-10.0.0.5");

    let now = util::now();
    let range = QueryRange::new(
        servers[0].id,
        now - ChronoDuration::minutes(5),
        now + ChronoDuration::minutes(5),
    );
    let store = collector.store.clone();
    assert!(eventually(|| {
        let store = store.clone();
        let range = range.clone();
        async move { store.performance_range(range).await.unwrap().len() == 1 }
    })
    .await);
}

#[tokio::test]
async fn test_wrong_secret_keeps_connection_open() {
    let collector = TestCollector::spawn().await;
    let mut socket = collector.connect().await;

    assert_eq!(exchange(&mut socket, handshake(SECRET)).await, "authenticated");
    assert_eq!(exchange(&mut socket, payload("nope", "10.0.0.6")).await, "invalid_secret");
    assert_eq!(exchange(&mut socket, "{not json".to_string()).await, "invalid_json");
    assert_eq!(
        exchange(&mut socket, format!(r#"{{"secret":"{SECRET}"}}"#)).await,
        "error"
    );

    // still usable after three rejections
    assert_eq!(exchange(&mut socket, payload(SECRET, "10.0.0.6")).await, "ack");

    let store = collector.store.clone();
    assert!(eventually(|| {
        let store = store.clone();
        async move { store.list_servers().await.unwrap().len() == 1 }
    })
    .await);
}

#[tokio::test]
async fn test_rejected_handshake_closes_connection() {
    let collector = TestCollector::spawn().await;
    let mut socket = collector.connect().await;

    assert_eq!(exchange(&mut socket, handshake("wrong")).await, "authentication_failed");

    let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("connection should close");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

    assert!(collector.store.list_servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_handshake_fails_authentication() {
    let collector = TestCollector::spawn().await;
    let mut socket = collector.connect().await;

    assert_eq!(exchange(&mut socket, "hello".to_string()).await, "authentication_failed");
}

#[tokio::test]
async fn test_same_ip_twice_updates_one_server() {
    let collector = TestCollector::spawn().await;
    let mut socket = collector.connect().await;

    assert_eq!(exchange(&mut socket, handshake(SECRET)).await, "authenticated");
    assert_eq!(exchange(&mut socket, payload(SECRET, "10.0.0.7")).await, "ack");
    assert_eq!(exchange(&mut socket, payload(SECRET, "10.0.0.7")).await, "ack");

    let store = collector.store.clone();
    assert!(eventually(|| {
        let store = store.clone();
        async move {
            let servers = store.list_servers().await.unwrap();
            if servers.len() != 1 {
                return false;
            }
            let now = util::now();
            let range = QueryRange::new(
                servers[0].id,
                now - ChronoDuration::minutes(5),
                now + ChronoDuration::minutes(5),
            );
            store.performance_range(range).await.unwrap().len() == 2
        }
    })
    .await);
}
