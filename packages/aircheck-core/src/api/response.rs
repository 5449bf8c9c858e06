//! JSON response helpers shared by the HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// A bare `{"ok": true}` acknowledgement.
pub fn api_ok() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// A `202 Accepted` acknowledgement for fire-and-forget commands.
pub fn api_accepted() -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "ok": true }))).into_response()
}

/// A `200 OK` with a serialized payload.
pub fn api_success<T: Serialize>(payload: T) -> Response {
    Json(payload).into_response()
}
