//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hostwatch::{
    AddressInformation, CpuInformation, DiskInformation, InterfaceInformation, IoInformation,
    MemoryInformation, Sample,
    actors::ingest::spawn_upsert_worker,
    api::{ApiConfig, CollectorState, ingest::Gatekeeper, spawn_collector_api},
    config::DatabaseConfig,
    storage::{
        CollectorStore, PortalStore, collector::SqliteCollectorStore, portal::SqlitePortalStore,
    },
};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

pub const SECRET: &str = "integration-secret";

pub type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A sample of a host reachable at `ip` with the given CPU usage
pub fn sample(ip: &str, cpu_percent: f64) -> Sample {
    let mut interfaces = BTreeMap::new();
    interfaces.insert(
        "lo".to_string(),
        InterfaceInformation {
            addresses: vec![AddressInformation {
                ip: "127.0.0.1".to_string(),
                netmask: Some("255.0.0.0".to_string()),
                broadcast: None,
            }],
            io: IoInformation::default(),
        },
    );
    interfaces.insert(
        "eth0".to_string(),
        InterfaceInformation {
            addresses: vec![AddressInformation {
                ip: ip.to_string(),
                netmask: Some("255.255.255.0".to_string()),
                broadcast: None,
            }],
            io: IoInformation {
                upload_bps: 1_000.0,
                download_bps: 2_000.0,
                total_upload: 10_000,
                total_download: 20_000,
            },
        },
    );

    Sample {
        platform: "Linux".to_string(),
        os_version: "6.1.0".to_string(),
        cpu: CpuInformation {
            physical_cores: Some(4),
            logical_cores: 8,
            percent_usage: cpu_percent,
        },
        memory: MemoryInformation {
            total: 16_000_000_000,
            available: 8_000_000_000,
            used: 8_000_000_000,
            percent: 50.0,
        },
        disks: vec![DiskInformation {
            device: "/dev/sda1".to_string(),
            mountpoint: "/".to_string(),
            total: 100_000_000_000,
            used: 40_000_000_000,
            free: 60_000_000_000,
            percent: 40.0,
        }],
        interfaces,
        boot_time: "2024-01-01 00:00:00".to_string(),
        process_count: 200,
    }
}

pub fn database_in(dir: &TempDir, name: &str) -> DatabaseConfig {
    DatabaseConfig::at(dir.path().join(name))
}

pub async fn portal_store(dir: &TempDir) -> Arc<dyn PortalStore> {
    Arc::new(
        SqlitePortalStore::open(&database_in(dir, "portal.db"))
            .await
            .unwrap(),
    )
}

/// Collector API on a random port, backed by a temporary Store A
pub struct TestCollector {
    pub addr: SocketAddr,
    pub store: Arc<dyn CollectorStore>,
    _dir: TempDir,
}

impl TestCollector {
    pub async fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CollectorStore> = Arc::new(
            SqliteCollectorStore::open(&database_in(&dir, "collector.db"))
                .await
                .unwrap(),
        );

        let (queue, _worker) = spawn_upsert_worker(store.clone());
        let state = CollectorState::new(store.clone(), Gatekeeper::new(SECRET, queue));
        let config = ApiConfig::new("127.0.0.1:0".parse().unwrap());
        let (addr, _server) = spawn_collector_api(config, state).await.unwrap();

        Self {
            addr,
            store,
            _dir: dir,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ingest", self.addr)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn connect(&self) -> AgentSocket {
        let (socket, _) = tokio_tungstenite::connect_async(self.ws_url()).await.unwrap();
        socket
    }
}

/// Sends one text frame and returns the text reply
pub async fn exchange(socket: &mut AgentSocket, frame: String) -> String {
    socket.send(Message::Text(frame)).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no reply within 5s");

    match reply {
        Some(Ok(Message::Text(text))) => text,
        other => panic!("unexpected reply: {other:?}"),
    }
}

/// Polls `check` until it returns true or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
