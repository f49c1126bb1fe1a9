//! Job submission HTTP API.
//!
//! `POST /jobs` accepts a job document and persists it uninitialized;
//! the poll loop picks it up from there. The body may be a JSON object
//! or a JSON string containing an encoded object, since some upstream
//! systems double-encode their payloads.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::DOC_TYPE_JOB;
use crate::store::{doc_type_of, DocumentStore};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
}

/// Build the submission router.
pub fn router(store: Arc<dyn DocumentStore>) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .layer(CorsLayer::permissive())
        .with_state(AppState { store })
}

/// Normalize a submission body into a job document.
///
/// Accepts a plain object or a string-encoded object; anything else, or
/// a document whose `type` is not `job`, is rejected with a message
/// suitable for the client.
fn parse_submission(body: Value) -> Result<Value, String> {
    let doc = match body {
        Value::Object(_) => body,
        Value::String(encoded) => serde_json::from_str::<Value>(&encoded)
            .map_err(|e| format!("body is not valid encoded JSON: {e}"))?,
        other => return Err(format!("expected a JSON object, got {other}")),
    };
    if !doc.is_object() {
        return Err("encoded body is not a JSON object".to_string());
    }
    if doc_type_of(&doc) != DOC_TYPE_JOB {
        return Err(format!(
            "document type must be \"{DOC_TYPE_JOB}\", got \"{}\"",
            doc_type_of(&doc)
        ));
    }
    if doc.get("flow").and_then(Value::as_str).unwrap_or("").is_empty() {
        return Err("job document needs a non-empty \"flow\"".to_string());
    }
    Ok(doc)
}

async fn submit_job(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let doc = match parse_submission(body) {
        Ok(doc) => doc,
        Err(message) => {
            warn!(%message, "Rejected job submission");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let id = format!("job:{}", uuid::Uuid::new_v4());
    match state.store.insert(&id, &doc).await {
        Ok(rev) => {
            let flow = doc.get("flow").and_then(Value::as_str).unwrap_or("");
            info!(job = %id, flow = %flow, "Accepted job submission");
            (StatusCode::CREATED, Json(json!({ "id": id, "rev": rev }))).into_response()
        }
        Err(e) => {
            warn!(job = %id, error = %e, "Failed to persist job submission");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to persist job" })),
            )
                .into_response()
        }
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id).await {
        Ok(Some(job)) => (
            StatusCode::OK,
            Json(json!({ "id": job.id, "rev": job.rev, "doc": job.doc })),
        )
            .into_response(),
        Ok(None) | Err(StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such job" })),
        )
            .into_response(),
        Err(e) => {
            warn!(job = %id, error = %e, "Job lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "lookup failed" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_plain_object() {
        let doc = parse_submission(json!({"type": "job", "flow": "onboard"})).unwrap();
        assert_eq!(doc["flow"], "onboard");
    }

    #[test]
    fn accepts_string_encoded_object() {
        let body = Value::String(r#"{"type": "job", "flow": "onboard"}"#.to_string());
        let doc = parse_submission(body).unwrap();
        assert_eq!(doc["type"], "job");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = parse_submission(json!({"type": "flow", "flow": "onboard"})).unwrap_err();
        assert!(err.contains("type"));
    }

    #[test]
    fn rejects_missing_flow() {
        assert!(parse_submission(json!({"type": "job"})).is_err());
    }

    #[test]
    fn rejects_garbage_string() {
        let err = parse_submission(Value::String("not json at all".to_string())).unwrap_err();
        assert!(err.contains("encoded"));
    }

    #[test]
    fn rejects_non_object() {
        assert!(parse_submission(json!(42)).is_err());
        assert!(parse_submission(Value::String("[1, 2]".to_string())).is_err());
    }
}
