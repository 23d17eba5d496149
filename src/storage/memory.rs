//! In-memory storage backend with optional file journal
//!
//! Gauges and counters live in two maps guarded by one read/write lock.
//! When a journal path is configured, the full state is serialized to a JSON
//! file (see [`MetricsSnapshot`] for the format).
//!
//! ## Persistence Modes
//!
//! - **Write-through** (`store_interval == 0`): every mutation flushes the
//!   whole state before returning; the caller sees the flush error
//! - **Periodic** (`store_interval > 0`): mutations only touch memory and a
//!   background task flushes every interval; its errors are only logged
//!
//! `close` always performs a final synchronous flush.
//!
//! ## Locking
//!
//! A separate mutex serializes journal writes so a periodic flush and a
//! write-through flush never interleave. The state is copied under the read
//! lock and serialized after releasing it, so writers are only blocked for
//! the duration of the copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{MetricKind, MetricUpdate, MetricsSnapshot};

/// Journal settings for [`MemoryBackend::open`]
#[derive(Debug, Clone, Default)]
pub struct JournalConfig {
    /// JSON file to persist to (`None` disables persistence)
    pub path: Option<PathBuf>,

    /// Flush period; zero means write-through
    pub store_interval: Duration,

    /// Hydrate from the file at startup
    pub restore: bool,
}

/// State shared between the backend and its flush task
#[derive(Debug)]
struct MemoryState {
    metrics: RwLock<MetricsSnapshot>,
    journal: Option<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,

    /// Serializes file writes; held for the whole copy-serialize-write cycle
    write_lock: Mutex<()>,
}

impl MemoryState {
    async fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.read().await.clone()
    }

    /// Write the full state to the journal, if one is configured
    async fn flush(&self) -> StorageResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let _guard = journal.write_lock.lock().await;

        // Copy taken after acquiring the write lock, so a later flush can
        // never be overwritten by an older snapshot
        let snapshot = self.snapshot().await;
        let mut data = serde_json::to_vec_pretty(&snapshot)?;
        data.push(b'\n');

        write_atomically(&journal.path, &data).await?;

        trace!(
            "journal flushed ({} metrics) to {}",
            snapshot.len(),
            journal.path.display()
        );
        Ok(())
    }
}

/// Write `data` next to `path` and rename it into place
async fn write_atomically(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Read a journal file; a missing file yields an empty snapshot
async fn load_journal(path: &Path) -> StorageResult<MetricsSnapshot> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("no journal at {}, starting empty", path.display());
            return Ok(MetricsSnapshot::default());
        }
        Err(err) => return Err(err.into()),
    };

    serde_json::from_str(&content).map_err(|e| {
        StorageError::SerializationError(format!(
            "malformed journal {}: {}",
            path.display(),
            e
        ))
    })
}

/// Background task handle for periodic flushing
#[derive(Debug)]
struct FlushTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic flush loop; exits on shutdown or when the backend is dropped
async fn run_periodic_flush(
    state: Arc<MemoryState>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    debug!("starting periodic journal flush every {period:?}");

    let mut ticker = time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.flush().await {
                    error!("periodic journal flush failed: {}", e);
                }
            }

            _ = &mut shutdown => {
                break;
            }
        }
    }

    debug!("periodic journal flush stopped");
}

/// In-memory storage backend
///
/// Construct with [`MemoryBackend::new`] for a purely volatile store, or with
/// [`MemoryBackend::open`] to attach a journal file.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,

    /// Write-through when true
    sync_writes: bool,

    /// Periodic flush task (only in periodic mode with a journal)
    flusher: Mutex<Option<FlushTask>>,
}

impl MemoryBackend {
    /// Create a volatile backend without persistence
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                metrics: RwLock::new(MetricsSnapshot::default()),
                journal: None,
            }),
            sync_writes: false,
            flusher: Mutex::new(None),
        }
    }

    /// Create a backend backed by a journal file
    ///
    /// With `restore` set, an existing file fully replaces the (empty)
    /// initial state. A missing file is not an error; a malformed one is.
    /// In periodic mode this spawns the flush task, so it must be called
    /// from within a Tokio runtime.
    #[instrument(skip_all)]
    pub async fn open(config: JournalConfig) -> StorageResult<Self> {
        let JournalConfig {
            path,
            store_interval,
            restore,
        } = config;

        let path = path.filter(|p| !p.as_os_str().is_empty());

        let initial = match (&path, restore) {
            (Some(path), true) => {
                let snapshot = load_journal(path).await?;
                info!(
                    "restored {} gauges and {} counters from {}",
                    snapshot.gauges.len(),
                    snapshot.counters.len(),
                    path.display()
                );
                snapshot
            }
            _ => MetricsSnapshot::default(),
        };

        let state = Arc::new(MemoryState {
            metrics: RwLock::new(initial),
            journal: path.map(|path| Journal {
                path,
                write_lock: Mutex::new(()),
            }),
        });

        let sync_writes = store_interval.is_zero();

        let flusher = if state.journal.is_some() && !sync_writes {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(run_periodic_flush(
                Arc::clone(&state),
                store_interval,
                shutdown_rx,
            ));
            Some(FlushTask {
                shutdown: shutdown_tx,
                handle,
            })
        } else {
            None
        };

        debug!(
            "memory backend ready (journal: {}, mode: {})",
            state
                .journal
                .as_ref()
                .map(|j| j.path.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            if sync_writes { "write-through" } else { "periodic" }
        );

        Ok(Self {
            state,
            sync_writes,
            flusher: Mutex::new(flusher),
        })
    }

    /// Journal path, if persistence is enabled
    pub fn journal_path(&self) -> Option<&Path> {
        self.state.journal.as_ref().map(|j| j.path.as_path())
    }

    /// Flush the full state to the journal immediately
    pub async fn save(&self) -> StorageResult<()> {
        self.state.flush().await
    }

    async fn flush_if_write_through(&self) -> StorageResult<()> {
        if self.sync_writes {
            self.state.flush().await
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_gauge(&self, name: &str, value: f64) -> StorageResult<()> {
        self.state
            .metrics
            .write()
            .await
            .apply(MetricUpdate::gauge(name, value))?;

        self.flush_if_write_through().await
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<f64> {
        self.state
            .metrics
            .read()
            .await
            .gauges
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::not_found(MetricKind::Gauge, name))
    }

    async fn set_counter(&self, name: &str, delta: i64) -> StorageResult<()> {
        self.state
            .metrics
            .write()
            .await
            .apply(MetricUpdate::counter(name, delta))?;

        self.flush_if_write_through().await
    }

    async fn get_counter(&self, name: &str) -> StorageResult<i64> {
        self.state
            .metrics
            .read()
            .await
            .counters
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::not_found(MetricKind::Counter, name))
    }

    async fn get_all(&self) -> StorageResult<MetricsSnapshot> {
        Ok(self.state.snapshot().await)
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_metrics_batch(&self, updates: Vec<MetricUpdate>) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        self.state.metrics.write().await.apply_all(updates)?;

        self.flush_if_write_through().await
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(task) = self.flusher.lock().await.take() {
            let _ = task.shutdown.send(());
            if let Err(e) = task.handle.await {
                error!("periodic flush task failed: {}", e);
            }
        }

        debug!("closing memory backend");
        self.state.flush().await
    }
}
