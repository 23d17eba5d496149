use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tally::{
    api::{self, ApiState},
    config::{ServerConfig, StorageOverrides, read_config_file},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Metrics collection server")]
struct Args {
    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Journal file of the in-memory store (empty disables it)
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Seconds between journal flushes, 0 writes on every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Load the journal on startup
    #[arg(short, long, env = "RESTORE")]
    restore: Option<bool>,

    /// PostgreSQL DSN; selects the database backend when set
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// HMAC-SHA256 key; signs response bodies when set
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("tally", level),
        ("tally_server", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let mut config = match &args.config {
        Some(path) => read_config_file::<ServerConfig>(path)?,
        None => ServerConfig::default(),
    };

    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(key) = args.key {
        config.key = Some(key);
    }
    config.storage = config.storage.with_overrides(StorageOverrides {
        file_storage_path: args.file_storage_path,
        store_interval_secs: args.store_interval,
        restore: args.restore,
        database_dsn: args.database_dsn,
    });
    debug!("effective config: {config:?}");

    let storage = config
        .storage
        .open()
        .await
        .context("failed to open metric storage")?;
    info!("using {} storage", storage.name());

    let signer = config.signer().context("invalid signing key")?;
    if signer.is_some() {
        info!("signing responses with HMAC-SHA256");
    }
    let app = api::router(ApiState::new(storage.clone()).with_signer(signer));

    let listener = tokio::net::TcpListener::bind(config.address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    info!("listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Flush the journal even when serving failed
    let closed = storage.close().await;

    served.context("server error")?;
    closed.context("failed to close metric storage")?;

    info!("server stopped");
    Ok(())
}
