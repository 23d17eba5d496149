//! ReporterActor - Polls the host and ships metrics to the server
//!
//! ## Delivery
//!
//! Every report drains the pending `PollCount` delta and sends the latest
//! gauges plus that delta as one gzipped JSON array to `/updates/`. When the
//! batch is rejected, each metric is posted to `/update/` on its own with at
//! most `rate_limit` requests in flight. If `PollCount` could not be
//! delivered, its delta is credited back so the next report carries it.
//!
//! Timeouts and connection failures are retried with the storage
//! [`RetryPolicy`]; HTTP error statuses are not.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::Metric;
use crate::config::AgentConfig;
use crate::signing::{HASH_HEADER, Signer};
use crate::storage::RetryPolicy;

use super::collector::{HostSampler, POLL_COUNT};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands that can be sent to the ReporterActor
#[derive(Debug)]
pub enum ReporterCommand {
    /// Sample the host immediately
    PollNow { respond_to: oneshot::Sender<()> },

    /// Report immediately, bypassing the report timer
    ReportNow {
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// Stop the actor
    Shutdown,
}

/// Retry predicate for agent requests
fn is_retriable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Posts gzipped JSON to the server
///
/// Cheap to clone; every clone shares the underlying connection pool.
#[derive(Debug, Clone)]
struct Transport {
    client: reqwest::Client,
    retry: RetryPolicy,
    signer: Option<Signer>,
}

impl Transport {
    /// Serialize, sign, compress and post `value`, retrying transient failures
    async fn post_json<T: serde::Serialize + ?Sized>(&self, url: &str, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value).context("failed to serialize metrics")?;
        let signature = self.signer.as_ref().map(|signer| signer.sign(&json));
        let body = gzip(&json)?;

        self.retry
            .run(
                || {
                    let mut request = self
                        .client
                        .post(url)
                        .header(CONTENT_TYPE, "application/json")
                        .header(CONTENT_ENCODING, "gzip")
                        .body(body.clone());
                    if let Some(signature) = &signature {
                        request = request.header(HASH_HEADER, signature.as_str());
                    }
                    request.send()
                },
                is_retriable,
            )
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Actor that owns the sampler and talks to the server
pub struct ReporterActor {
    sampler: HostSampler,

    transport: Transport,

    /// Base URL without trailing slash
    server_url: String,

    rate_limit: usize,

    poll_interval: Duration,

    report_interval: Duration,

    command_rx: mpsc::Receiver<ReporterCommand>,
}

impl ReporterActor {
    pub fn new(
        config: &AgentConfig,
        sampler: HostSampler,
        retry: RetryPolicy,
        command_rx: mpsc::Receiver<ReporterCommand>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let signer = config.signer().context("invalid signing key")?;

        Ok(Self {
            sampler,
            transport: Transport {
                client,
                retry,
                signer,
            },
            server_url: config.server_url(),
            rate_limit: config.rate_limit.max(1),
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            command_rx,
        })
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self), fields(server = %self.server_url))]
    pub async fn run(mut self) {
        debug!("starting reporter actor");

        // First ticks after one full period
        let mut poll_ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        let mut report_ticker =
            interval_at(Instant::now() + self.report_interval, self.report_interval);

        loop {
            tokio::select! {
                _ = poll_ticker.tick() => {
                    self.sampler.poll();
                }

                _ = report_ticker.tick() => {
                    if let Err(e) = self.report().await {
                        error!("failed to report metrics: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ReporterCommand::PollNow { respond_to } => {
                            self.sampler.poll();
                            let _ = respond_to.send(());
                        }

                        ReporterCommand::ReportNow { respond_to } => {
                            debug!("received ReportNow command");
                            let result = self.report().await;
                            let _ = respond_to.send(result);
                        }

                        ReporterCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("reporter actor stopped");
    }

    /// Send the latest gauges and the pending poll count
    async fn report(&mut self) -> Result<()> {
        let (metrics, delta) = self.sampler.drain_report();

        let undelivered = match self.send_batch(&metrics).await {
            Ok(()) => {
                trace!("reported {} metrics in one batch", metrics.len());
                return Ok(());
            }
            Err(e) => {
                warn!("batch report failed, sending metrics one by one: {:#}", e);
                self.send_individually(&metrics).await
            }
        };

        if undelivered.is_empty() {
            return Ok(());
        }

        if undelivered.iter().any(|name| name == POLL_COUNT) {
            self.sampler.restore_poll_count(delta);
        }

        anyhow::bail!(
            "{} of {} metrics were not delivered",
            undelivered.len(),
            metrics.len()
        )
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        let url = format!("{}/updates/", self.server_url);
        self.transport.post_json(&url, metrics).await
    }

    /// Post each metric separately, returning the names that failed
    async fn send_individually(&self, metrics: &[Metric]) -> Vec<String> {
        let url = format!("{}/update/", self.server_url);
        let transport = self.transport.clone();

        let results: Vec<(String, Result<()>)> = stream::iter(metrics.to_vec())
            .map(move |metric| {
                let transport = transport.clone();
                let url = url.clone();
                async move {
                    let result = transport.post_json(&url, &metric).await;
                    (metric.id, result)
                }
            })
            .buffer_unordered(self.rate_limit)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(name, result)| {
                let e = result.err()?;
                debug!("failed to send {}: {:#}", name, e);
                Some(name)
            })
            .collect()
    }
}

/// Handle for controlling a ReporterActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct ReporterHandle {
    sender: mpsc::Sender<ReporterCommand>,
}

impl ReporterHandle {
    /// Spawn a reporter with the default retry schedule
    pub fn spawn(config: &AgentConfig, sampler: HostSampler) -> Result<Self> {
        Self::spawn_with_retry(config, sampler, RetryPolicy::default())
    }

    pub fn spawn_with_retry(
        config: &AgentConfig,
        sampler: HostSampler,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ReporterActor::new(config, sampler, retry, cmd_rx)?;
        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Trigger an immediate poll
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")?;
        Ok(())
    }

    /// Trigger an immediate report and wait for its outcome
    pub async fn report_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::ReportNow { respond_to: tx })
            .await
            .context("failed to send ReportNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Gracefully shut down the reporter
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ReporterCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
