//! PostgreSQL storage backend implementation
//!
//! ## Connection Lifecycle
//!
//! The backend starts disconnected. Any operation connects on demand: it
//! opens a pool, pings the server within [`CONNECT_TIMEOUT`] and creates the
//! `metrics` table if needed. A failure at any step leaves the backend
//! disconnected.
//!
//! When a statement fails with a connection-class error the pool is closed
//! and discarded, so the next call reconnects. Writes run under the
//! [`RetryPolicy`], which makes a reconnect-and-retry transparent within one
//! call. Reads fail fast.
//!
//! ## Serialization
//!
//! The pool handle lives behind a mutex that is held for the whole
//! statement, so every query on one backend instance is serialized on the
//! client side. Counter accumulation still happens in the database, which
//! keeps concurrent writers from several processes correct.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::retry::RetryPolicy;
use super::schema::{MetricKind, MetricUpdate, MetricsSnapshot};

/// Upper bound for opening and verifying a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id SERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        kind VARCHAR(10) NOT NULL,
        delta BIGINT,
        value DOUBLE PRECISION,
        UNIQUE (name, kind)
    )
"#;

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (name, kind, value)
    VALUES ($1, 'gauge', $2)
    ON CONFLICT (name, kind) DO UPDATE SET value = EXCLUDED.value
"#;

const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (name, kind, delta)
    VALUES ($1, 'counter', $2)
    ON CONFLICT (name, kind) DO UPDATE SET delta = COALESCE(metrics.delta, 0) + EXCLUDED.delta
"#;

const SELECT_GAUGE: &str = "SELECT value FROM metrics WHERE name = $1 AND kind = 'gauge'";
const SELECT_COUNTER: &str = "SELECT delta FROM metrics WHERE name = $1 AND kind = 'counter'";
const SELECT_ALL: &str = "SELECT name, kind, value, delta FROM metrics";

/// Whether a driver error means the connection itself is gone
///
/// Covers the pool and I/O failures sqlx reports when the server went away,
/// SQLSTATE class 08, and any error whose text mentions the connection.
pub(crate) fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err)
            if db_err.code().is_some_and(|code| code.starts_with("08")) =>
        {
            true
        }
        other => other.to_string().to_lowercase().contains("connection"),
    }
}

/// SQLSTATE `22003` numeric_value_out_of_range
fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("22003"))
}

/// PostgreSQL storage backend
///
/// One row per `(name, kind)` in the `metrics` table. Gauges use the `value`
/// column, counters use `delta`.
pub struct PostgresBackend {
    dsn: String,

    /// `Some` while connected
    pool: Mutex<Option<PgPool>>,

    retry: RetryPolicy,

    /// Set by the first `close`
    closed: AtomicBool,
}

impl PostgresBackend {
    /// Create a disconnected backend for `dsn`
    ///
    /// Nothing is opened until the first operation. An empty DSN is
    /// accepted here; every operation then reports `NotConnected`.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            pool: Mutex::new(None),
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Open a pool, verify it and create the table
    #[instrument(skip_all)]
    async fn connect(&self) -> StorageResult<PgPool> {
        debug!("connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_lazy(&self.dsn)
            .map_err(|e| StorageError::ConnectionFailed(format!("invalid DSN: {}", e)))?;

        let verify = async {
            sqlx::query("SELECT 1").execute(&pool).await?;
            sqlx::query(CREATE_TABLE).execute(&pool).await?;
            Ok::<_, sqlx::Error>(())
        };

        let failure = match tokio::time::timeout(CONNECT_TIMEOUT, verify).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", CONNECT_TIMEOUT)),
        };

        if let Some(reason) = failure {
            pool.close().await;
            return Err(StorageError::ConnectionFailed(reason));
        }

        info!("connected to database");
        Ok(pool)
    }

    /// Return the live pool, connecting first if necessary
    async fn ensure_connected(&self, slot: &mut Option<PgPool>) -> StorageResult<PgPool> {
        if self.dsn.is_empty() || self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::NotConnected);
        }

        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.connect().await?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Run one database operation while holding the connection lock
    ///
    /// A connection-class failure closes and discards the pool before the
    /// error is returned.
    async fn run_locked<T, F, Fut>(&self, operation: F) -> StorageResult<T>
    where
        F: FnOnce(PgPool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut slot = self.pool.lock().await;
        let pool = self.ensure_connected(&mut slot).await?;

        match operation(pool).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if is_out_of_range(&err) {
                    return Err(StorageError::OutOfRange(err.to_string()));
                }
                if is_connection_error(&err) {
                    warn!("lost database connection, resetting: {}", err);
                    if let Some(pool) = slot.take() {
                        pool.close().await;
                    }
                }
                Err(StorageError::Database(err))
            }
        }
    }
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The DSN may carry a password
        f.debug_struct("PostgresBackend")
            .field("retry", &self.retry)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn set_gauge(&self, name: &str, value: f64) -> StorageResult<()> {
        self.retry
            .run(
                move || {
                    self.run_locked(move |pool| async move {
                        sqlx::query(UPSERT_GAUGE)
                            .bind(name)
                            .bind(value)
                            .execute(&pool)
                            .await
                            .map(|_| ())
                    })
                },
                StorageError::is_retriable,
            )
            .await
    }

    #[instrument(skip(self))]
    async fn get_gauge(&self, name: &str) -> StorageResult<f64> {
        let row = self
            .run_locked(move |pool| async move {
                sqlx::query_scalar::<_, Option<f64>>(SELECT_GAUGE)
                    .bind(name)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;

        row.flatten()
            .ok_or_else(|| StorageError::not_found(MetricKind::Gauge, name))
    }

    #[instrument(skip(self))]
    async fn set_counter(&self, name: &str, delta: i64) -> StorageResult<()> {
        self.retry
            .run(
                move || {
                    self.run_locked(move |pool| async move {
                        sqlx::query(UPSERT_COUNTER)
                            .bind(name)
                            .bind(delta)
                            .execute(&pool)
                            .await
                            .map(|_| ())
                    })
                },
                StorageError::is_retriable,
            )
            .await
    }

    #[instrument(skip(self))]
    async fn get_counter(&self, name: &str) -> StorageResult<i64> {
        let row = self
            .run_locked(move |pool| async move {
                sqlx::query_scalar::<_, Option<i64>>(SELECT_COUNTER)
                    .bind(name)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;

        row.flatten()
            .ok_or_else(|| StorageError::not_found(MetricKind::Counter, name))
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> StorageResult<MetricsSnapshot> {
        let rows = self
            .run_locked(|pool| async move {
                sqlx::query_as::<_, (String, String, Option<f64>, Option<i64>)>(SELECT_ALL)
                    .fetch_all(&pool)
                    .await
            })
            .await?;

        let mut snapshot = MetricsSnapshot::default();
        for (name, kind, value, delta) in rows {
            match (kind.parse::<MetricKind>(), value, delta) {
                (Ok(MetricKind::Gauge), Some(value), _) => {
                    snapshot.gauges.insert(name, value);
                }
                (Ok(MetricKind::Counter), _, Some(delta)) => {
                    snapshot.counters.insert(name, delta);
                }
                _ => trace!("skipping incomplete row {} ({})", name, kind),
            }
        }

        Ok(snapshot)
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_metrics_batch(&self, updates: Vec<MetricUpdate>) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let updates = &updates;
        self.retry
            .run(
                move || {
                    self.run_locked(move |pool| async move {
                        // Dropping an uncommitted transaction rolls it back
                        let mut tx = pool.begin().await?;

                        for update in updates {
                            let statement = match update {
                                MetricUpdate::Gauge { name, value } => {
                                    sqlx::query(UPSERT_GAUGE).bind(name.as_str()).bind(*value)
                                }
                                MetricUpdate::Counter { name, delta } => {
                                    sqlx::query(UPSERT_COUNTER).bind(name.as_str()).bind(*delta)
                                }
                            };
                            statement.execute(&mut *tx).await?;
                        }

                        tx.commit().await
                    })
                },
                StorageError::is_retriable,
            )
            .await?;

        debug!("applied batch of {} updates", updates.len());
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.run_locked(|pool| async move { sqlx::query("SELECT 1").execute(&pool).await })
            .await
            .map(|_| ())
            .map_err(|e| match e {
                StorageError::ConnectionFailed(reason) => {
                    debug!("ping failed to connect: {}", reason);
                    StorageError::NotConnected
                }
                other => other,
            })
    }

    async fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(pool) = self.pool.lock().await.take() {
            debug!("closing database pool");
            pool.close().await;
        }

        Ok(())
    }
}
