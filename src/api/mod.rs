//! HTTP API for the metrics server
//!
//! A thin adapter over [`MetricsService`](crate::service::MetricsService):
//! handlers extract path segments or JSON bodies, call the service and map
//! its errors to status codes.
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **gzip** request decompression and response compression via `tower-http`
//! - **Request tracing** through `TraceLayer`
//! - **Response signing** in the `HashSHA256` header when a key is set
//!
//! ## Endpoints
//!
//! - `GET /` - HTML table of all metrics
//! - `POST /update/{type}/{name}/{value}` - Plain-text update
//! - `GET /value/{type}/{name}` - Plain-text value
//! - `POST /update/` - JSON update, echoes the stored metric
//! - `POST /value/` - JSON lookup
//! - `POST /updates/` - JSON batch update
//! - `GET /ping` - Storage liveness

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::{Ipv4Addr, SocketAddr};

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer,
    trace::TraceLayer,
};
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (port 0 picks a free port)
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
        }
    }
}

/// Build the router with all routes and middleware
pub fn router(state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/", get(routes::index::list_metrics))
        .route("/update/", post(routes::update::update_json))
        .route("/updates/", post(routes::update::update_batch))
        .route(
            "/update/:type/:name/:value",
            post(routes::update::update_plain),
        )
        .route("/value/", post(routes::value::value_json))
        .route("/value/:type/:name", get(routes::value::value_plain))
        .route("/ping", get(routes::health::ping));

    if let Some(signer) = state.signer.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            signer,
            middleware::hash::sign_response,
        ));
    }

    app.with_state(state)
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
