//! Integration tests for the reporting agent
//!
//! These tests verify that:
//! - Reports are gzipped JSON batches posted to `/updates/`
//! - A rejected batch falls back to one request per metric
//! - An undelivered PollCount is carried into the next report
//! - Request bodies are signed when a key is configured
//! - Agent and server work end to end

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tally::Metric;
use tally::agent::{HostSampler, ReporterHandle};
use tally::config::AgentConfig;
use tally::signing::Signer;
use tally::storage::{MemoryBackend, RetryPolicy, StorageBackend};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::helpers::*;

fn agent_config(server_address: String) -> AgentConfig {
    AgentConfig {
        server_address,
        // Timers stay out of the way; tests drive the actor by command
        poll_interval_secs: 3600,
        report_interval_secs: 3600,
        rate_limit: 3,
        key: None,
    }
}

fn spawn_reporter(server_address: String) -> ReporterHandle {
    spawn_configured(agent_config(server_address))
}

fn spawn_configured(config: AgentConfig) -> ReporterHandle {
    ReporterHandle::spawn_with_retry(&config, HostSampler::new(), RetryPolicy::none()).unwrap()
}

fn decode_batch(request: &Request) -> Vec<Metric> {
    serde_json::from_slice(&gunzip(&request.body)).unwrap()
}

fn poll_count_of(metrics: &[Metric]) -> Option<i64> {
    metrics
        .iter()
        .find(|m| m.id == "PollCount")
        .and_then(|m| m.delta)
}

async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

#[tokio::test]
async fn test_report_sends_gzipped_batch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let reporter = spawn_reporter(mock_server.uri());
    reporter.poll_now().await.unwrap();
    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    let requests = requests_to(&mock_server, "/updates/").await;
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(
        request.headers.get("content-encoding").unwrap().to_str().unwrap(),
        "gzip"
    );

    let metrics = decode_batch(request);
    assert_eq!(poll_count_of(&metrics), Some(2));
    assert!(metrics.iter().any(|m| m.id == "TotalMemory" && m.value.is_some()));
    assert!(metrics.iter().any(|m| m.id == "CPUutilization1"));

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_batch_falls_back_to_single_updates() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/update/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let reporter = spawn_reporter(mock_server.uri());
    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    let batch = decode_batch(&requests_to(&mock_server, "/updates/").await[0]);
    let singles: Vec<Metric> = requests_to(&mock_server, "/update/")
        .await
        .iter()
        .map(|r| serde_json::from_slice(&gunzip(&r.body)).unwrap())
        .collect();

    assert_eq!(singles.len(), batch.len());
    assert!(singles.contains(&Metric::counter("PollCount", 1)));

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_partial_fallback_failure_keeps_poll_count() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    // Only PollCount is refused when sent on its own
    Mock::given(method("POST"))
        .and(path("/update/"))
        .respond_with(|request: &Request| {
            let metric: Metric = serde_json::from_slice(&gunzip(&request.body)).unwrap();
            if metric.id == "PollCount" {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&mock_server)
        .await;

    let reporter = spawn_reporter(mock_server.uri());
    reporter.poll_now().await.unwrap();
    reporter.poll_now().await.unwrap();
    assert!(reporter.report_now().await.is_err());

    mock_server.reset().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    reporter.report_now().await.unwrap();
    let requests = requests_to(&mock_server, "/updates/").await;
    assert_eq!(poll_count_of(&decode_batch(&requests[0])), Some(2));

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_requests_are_signed_with_key() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut config = agent_config(mock_server.uri());
    config.key = Some("secret".to_string());
    let reporter = spawn_configured(config);
    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    let request = &requests_to(&mock_server, "/updates/").await[0];
    let signature = request.headers.get("HashSHA256").unwrap().to_str().unwrap();
    let expected = Signer::new("secret").unwrap().sign(&gunzip(&request.body));
    assert_eq!(signature, expected);

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_requests_unsigned_without_key() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let reporter = spawn_reporter(mock_server.uri());
    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    let request = &requests_to(&mock_server, "/updates/").await[0];
    assert!(request.headers.get("HashSHA256").is_none());

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undelivered_poll_count_is_carried_over() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let reporter = spawn_reporter(mock_server.uri());
    reporter.poll_now().await.unwrap();
    reporter.poll_now().await.unwrap();
    assert!(reporter.report_now().await.is_err());

    mock_server.reset().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    let requests = requests_to(&mock_server, "/updates/").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(poll_count_of(&decode_batch(&requests[0])), Some(3));

    reporter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_agent_reports_to_server() {
    let storage = Arc::new(MemoryBackend::new());
    let base = spawn_test_api(storage.clone()).await;

    let reporter = spawn_reporter(base);
    for _ in 0..3 {
        reporter.poll_now().await.unwrap();
    }
    reporter.report_now().await.unwrap();

    reporter.poll_now().await.unwrap();
    reporter.report_now().await.unwrap();

    assert_eq!(storage.get_counter("PollCount").await.unwrap(), 4);
    assert!(storage.get_gauge("TotalMemory").await.unwrap() > 0.0);

    reporter.shutdown().await.unwrap();
}
