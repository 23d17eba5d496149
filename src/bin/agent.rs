use std::path::PathBuf;

use clap::Parser;
use tally::{
    agent::{HostSampler, ReporterHandle},
    config::{AgentConfig, read_config_file},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Host metrics reporting agent")]
struct Args {
    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Server address (host:port or URL)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between host samples
    #[arg(short, long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Seconds between reports to the server
    #[arg(short, long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Maximum concurrent requests to the server
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// HMAC-SHA256 key; signs request bodies when set
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter =
        filter::Targets::new().with_targets(vec![("tally", level), ("tally_agent", level)]);
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let mut config = match &args.config {
        Some(path) => read_config_file::<AgentConfig>(path)?,
        None => AgentConfig::default(),
    };

    if let Some(address) = args.address {
        config.server_address = address;
    }
    if let Some(poll_interval) = args.poll_interval {
        config.poll_interval_secs = poll_interval;
    }
    if let Some(report_interval) = args.report_interval {
        config.report_interval_secs = report_interval;
    }
    if let Some(rate_limit) = args.rate_limit {
        config.rate_limit = rate_limit;
    }
    if let Some(key) = args.key {
        config.key = Some(key);
    }
    debug!("effective config: {config:?}");

    let reporter = ReporterHandle::spawn(&config, HostSampler::new())?;
    info!(
        "reporting to {} every {}s (polling every {}s)",
        config.server_url(),
        config.report_interval_secs,
        config.poll_interval_secs
    );

    shutdown_signal().await;
    info!("shutting down");
    reporter.shutdown().await?;

    Ok(())
}
