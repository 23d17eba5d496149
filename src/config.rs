use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::signing::{InvalidKey, Signer};
use crate::storage::{JournalConfig, MemoryBackend, StorageBackend, StorageResult};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory maps with an optional JSON journal
    Memory {
        /// Journal file (empty or absent disables persistence)
        #[serde(default = "default_storage_path")]
        path: Option<PathBuf>,

        /// Seconds between journal flushes, 0 for write-through
        #[serde(default = "default_store_interval")]
        store_interval_secs: u64,

        /// Load the journal at startup
        #[serde(default = "default_restore")]
        restore: bool,
    },

    /// PostgreSQL database
    Postgres { dsn: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            path: default_storage_path(),
            store_interval_secs: default_store_interval(),
            restore: default_restore(),
        }
    }
}

fn default_storage_path() -> Option<PathBuf> {
    Some(PathBuf::from("/tmp/metrics-db.json"))
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

/// Storage settings given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct StorageOverrides {
    pub file_storage_path: Option<PathBuf>,
    pub store_interval_secs: Option<u64>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
}

impl StorageConfig {
    /// Apply command line and environment settings on top of this config
    ///
    /// A non-empty DSN selects PostgreSQL. An explicitly empty DSN falls back
    /// to the in-memory backend.
    pub fn with_overrides(self, overrides: StorageOverrides) -> Self {
        let StorageOverrides {
            file_storage_path,
            store_interval_secs,
            restore,
            database_dsn,
        } = overrides;

        match database_dsn {
            Some(dsn) if !dsn.is_empty() => return StorageConfig::Postgres { dsn },
            Some(_) => {}
            None => {
                if let StorageConfig::Postgres { .. } = self {
                    return self;
                }
            }
        }

        let (path, interval, restore_flag) = match self {
            StorageConfig::Memory {
                path,
                store_interval_secs,
                restore,
            } => (path, store_interval_secs, restore),
            StorageConfig::Postgres { .. } => (
                default_storage_path(),
                default_store_interval(),
                default_restore(),
            ),
        };

        StorageConfig::Memory {
            path: file_storage_path.or(path),
            store_interval_secs: store_interval_secs.unwrap_or(interval),
            restore: restore.unwrap_or(restore_flag),
        }
    }

    /// Construct the configured backend
    ///
    /// Fails when an existing journal cannot be parsed. A PostgreSQL backend
    /// is returned disconnected and connects on first use.
    pub async fn open(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        match self {
            StorageConfig::Memory {
                path,
                store_interval_secs,
                restore,
            } => {
                debug!("using in-memory storage");
                let backend = MemoryBackend::open(JournalConfig {
                    path: path.clone(),
                    store_interval: Duration::from_secs(*store_interval_secs),
                    restore: *restore,
                })
                .await?;
                Ok(Arc::new(backend))
            }

            #[cfg(feature = "storage-postgres")]
            StorageConfig::Postgres { dsn } => {
                debug!("using PostgreSQL storage");
                Ok(Arc::new(crate::storage::PostgresBackend::new(dsn.clone())))
            }

            #[cfg(not(feature = "storage-postgres"))]
            StorageConfig::Postgres { .. } => Err(crate::storage::StorageError::InvalidConfig(
                "PostgreSQL support is not compiled in (enable feature `storage-postgres`)"
                    .to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub storage: StorageConfig,

    /// HMAC key for signing responses (empty or absent disables signing)
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            storage: StorageConfig::default(),
            key: None,
        }
    }
}

impl ServerConfig {
    pub fn signer(&self) -> Result<Option<Signer>, InvalidKey> {
        Signer::from_key(self.key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub server_address: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Maximum number of concurrent requests to the server
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    /// HMAC key for signing request bodies (empty or absent disables signing)
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            key: None,
        }
    }
}

impl AgentConfig {
    pub fn signer(&self) -> Result<Option<Signer>, InvalidKey> {
        Signer::from_key(self.key.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    /// Base URL of the server, adding `http://` when no scheme is given
    pub fn server_url(&self) -> String {
        let address = self.server_address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    10
}

pub fn read_config_file<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + std::fmt::Debug,
{
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file {}: {}", path.display(), e))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
