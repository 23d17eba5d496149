//! Helper functions for integration tests

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use tally::storage::{JournalConfig, MemoryBackend, MetricsSnapshot, StorageBackend};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Environment variable holding the DSN of a disposable test database
pub const TEST_DSN_VAR: &str = "TALLY_TEST_DATABASE_DSN";

pub fn journal_config(path: &Path, store_interval: Duration) -> JournalConfig {
    JournalConfig {
        path: Some(path.to_path_buf()),
        store_interval,
        restore: true,
    }
}

pub async fn open_memory(path: &Path, store_interval: Duration) -> Arc<MemoryBackend> {
    Arc::new(
        MemoryBackend::open(journal_config(path, store_interval))
            .await
            .unwrap(),
    )
}

pub async fn read_journal(path: &Path) -> MetricsSnapshot {
    let content = tokio::fs::read_to_string(path).await.unwrap();
    serde_json::from_str(&content).unwrap()
}

pub fn journal_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("metrics.json")
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded).unwrap();
    decoded
}

/// DSN of the test database, if one is configured
pub fn test_dsn() -> Option<String> {
    std::env::var(TEST_DSN_VAR).ok().filter(|dsn| !dsn.is_empty())
}

/// TCP relay in front of the test database that can be cut and restored
pub struct DbRelay {
    addr: SocketAddr,
    upstream: String,
    task: Option<JoinHandle<()>>,
}

impl DbRelay {
    pub async fn start(upstream: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(relay(listener, upstream.clone()));

        Self {
            addr,
            upstream,
            task: Some(task),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Close the listener and every relayed connection
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            // Let the aborted connection tasks drop their sockets
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Listen again on the same port
    pub async fn restart(&mut self) {
        self.stop().await;
        let listener = TcpListener::bind(self.addr).await.unwrap();
        self.task = Some(tokio::spawn(relay(listener, self.upstream.clone())));
    }
}

impl Drop for DbRelay {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn relay(listener: TcpListener, upstream: String) {
    // Aborting this task drops the set, which aborts every connection
    let mut connections = JoinSet::new();

    while let Ok((mut inbound, _)) = listener.accept().await {
        let upstream = upstream.clone();
        connections.spawn(async move {
            if let Ok(mut outbound) = TcpStream::connect(&upstream).await {
                let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
            }
        });
    }
}

/// Route `dsn` through a fresh relay, if it names a TCP host
pub async fn relayed_dsn(dsn: &str) -> Option<(DbRelay, String)> {
    let mut url = reqwest::Url::parse(dsn).ok()?;
    let upstream = format!("{}:{}", url.host_str()?, url.port().unwrap_or(5432));

    let relay = DbRelay::start(upstream).await;
    url.set_host(Some("127.0.0.1")).ok()?;
    url.set_port(Some(relay.port())).ok()?;

    Some((relay, url.to_string()))
}

/// Metric name unlikely to collide with other test runs sharing a database
pub fn unique_name(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}_{}_{nanos}", std::process::id())
}

#[cfg(feature = "api")]
pub async fn spawn_test_api(storage: Arc<dyn StorageBackend>) -> String {
    use tally::api::{ApiConfig, ApiState, spawn_api_server};

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
    };

    let addr = spawn_api_server(config, ApiState::new(storage))
        .await
        .unwrap();
    format!("http://{addr}")
}
