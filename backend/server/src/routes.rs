use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    classifier::StreamPayload,
    error::AppError,
    grouper::group,
    models::AddressSummary,
    query::query_address,
    state::AppState,
    utils::get_points_from_body,
};

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub message: String,
    pub processed_records: usize,
}

pub async fn webhook_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let points = match get_points_from_body(&body) {
        Ok(Some(points)) => points,
        Ok(None) => {
            info!("No 'points' field found in JSON");
            return (StatusCode::OK, "No points data found").into_response();
        }
        Err(e) => return e.into_response(),
    };

    ingest(&state, &points).await;

    Json(IngestResponse {
        status: "success",
        message: "Webhook received and data stored successfully".to_string(),
        processed_records: points.len(),
    })
    .into_response()
}

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let payload: StreamPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!("Error parsing stream payload: {e}");
        AppError::InvalidJson
    })?;

    let points = state.classifier.classify(&payload);
    ingest(&state, &points).await;

    Ok(Json(IngestResponse {
        status: "success",
        message: format!("Successfully processed {} point records", points.len()),
        processed_records: points.len(),
    }))
}

// Persistence outcome is never reported back to the caller.
async fn ingest(state: &AppState, points: &[Vec<Value>]) {
    let grouped = group(points);

    if grouped.skipped > 0 {
        warn!("Skipped {} of {} point events", grouped.skipped, points.len());
    }

    for (category, records) in grouped.groups {
        if let Err(e) = state.queue.submit(category, records).await {
            error!("Failed to queue batch for table {category}: {e}");
        }
    }
}

pub async fn address_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<AddressSummary>, AppError> {
    info!("Querying address: {address}");

    let outcome = query_address(state.store.clone(), &address, state.config.query_timeout).await;

    if outcome.all_failed() {
        return Err(AppError::QueryFailed {
            details: outcome.failures,
        });
    }

    Ok(Json(outcome.summary))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            warn!("Health check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn dead_letters_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.queue.dead_letters())
}
