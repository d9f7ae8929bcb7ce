//! Point aggregation service for on-chain activity.
//!
//! Chain activity arrives as point events, either pre-scored through the
//! webhook or as raw transactions through the stream endpoint. Points are
//! accumulated per (address, platform) in one table per category, and served
//! back as a per-address summary.
//!
//!
//!
//! # General Infrastructure
//! - A chain stream provider posts point batches to `/webhook`, or raw blocks to `/stream`
//! - The service answers as soon as a batch is grouped, persistence happens behind a queue
//! - Redis holds the six category tables
//! - The frontend reads `/address/{address}` to render a user's activity
//!
//!
//!
//! # Endpoints
//!
//! | Method | Path                   | Purpose                                   |
//! |--------|------------------------|-------------------------------------------|
//! | POST   | `/webhook`             | `{"points": [[address, category, platform, point], ...]}` |
//! | POST   | `/stream`              | raw blocks, scored by [`classifier`]      |
//! | GET    | `/address/{address}`   | [`models::AddressSummary`] for one address |
//! | GET    | `/health`              | store ping                                |
//! | GET    | `/dead-letters`        | batches that could not be persisted       |
//!
//!
//!
//! # Notes
//!
//! ## Acknowledge before persisting
//! A webhook caller only ever learns whether its body parsed. Bad events are
//! skipped and logged, failed batches are retried and then parked as dead
//! letters. This keeps the stream provider from backing off or replaying
//! whole blocks because one table had a bad moment.
//!
//! ## Categories
//! Only `dex`, `nft`, `launchpad`, `socialfi`, `gamefi` and `lsd` are tables.
//! The summary renames two of them for the frontend: `socialfi` is served as
//! `social`, `gamefi` as `games`.
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=info cargo run -p points
//! ```
//!
//! Run without Redis.
//! ```sh
//! STORE_BACKEND=memory RUST_LOG=debug cargo run -p points
//! ```
//!
//! Send a batch.
//! ```sh
//! curl -X POST localhost:8080/webhook -H 'content-type: application/json' \
//!   -d '{"points":[["0xabc","DEX","kuru",5]]}'
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod classifier;
pub mod config;
pub mod database;
pub mod error;
pub mod grouper;
pub mod memory;
pub mod models;
pub mod query;
pub mod queue;
pub mod routes;
pub mod state;
pub mod upsert;
pub mod utils;

use config::Config;
use error::AppError;
use routes::{
    address_handler, dead_letters_handler, health_handler, stream_handler, webhook_handler,
};
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/stream", post(stream_handler))
        .route("/address/{address}", get(address_handler))
        .route("/health", get(health_handler))
        .route("/dead-letters", get(dead_letters_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");
    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Server shutting down, draining ingestion queue...");
    state.queue.shutdown().await;

    served.map_err(|e| {
        error!("Server error: {e}");
        AppError::Io(e)
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
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
