use axum::body::Bytes;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::AppError;

/// Pulls the `points` array out of a webhook body.
///
/// `Ok(None)` means the body was a JSON object without `points`, which is
/// acknowledged rather than rejected. Entries that are not arrays are dropped
/// here and never counted.
pub fn get_points_from_body(body: &Bytes) -> Result<Option<Vec<Vec<Value>>>, AppError> {
    let mut object: Map<String, Value> = serde_json::from_slice(body).map_err(|e| {
        warn!(
            "Error parsing JSON: {e}, raw body: {}",
            String::from_utf8_lossy(body)
        );
        AppError::InvalidJson
    })?;

    let Some(points) = object.remove("points") else {
        return Ok(None);
    };

    let Value::Array(points) = points else {
        warn!("Points field is not an array");
        return Err(AppError::MalformedPayload);
    };

    let total = points.len();
    let events: Vec<Vec<Value>> = points
        .into_iter()
        .filter_map(|item| match item {
            Value::Array(event) => Some(event),
            _ => None,
        })
        .collect();

    if events.len() < total {
        warn!("Dropped {} non-array point entries", total - events.len());
    }

    Ok(Some(events))
}
