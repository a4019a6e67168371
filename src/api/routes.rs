use super::ApiState;
use crate::error::Error;
use crate::parameter::SecretValues;
use crate::service::{clamp_tail_lines, read_tail};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;

/// Error body: `{"error": "..."}` plus any extra fields.
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::MissingSecrets(missing) => Self {
                status: StatusCode::BAD_REQUEST,
                body: json!({
                    "error": "required secrets are missing",
                    "missing": missing,
                }),
            },
            other => {
                tracing::warn!("Control API request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

pub async fn healthz(State(state): State<ApiState>) -> Json<Value> {
    let manifest = state.supervisor.manifest();
    Json(json!({
        "status": "ok",
        "services": manifest.services.len(),
        "runtime": {
            "app": manifest.app.name,
            "app_version": manifest.app.version,
            "version": env!("CARGO_PKG_VERSION"),
            "pid": std::process::id(),
        },
    }))
}

pub async fn readyz(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "ready": state.supervisor.all_ready(),
        "details": state.supervisor.statuses(),
    }))
}

pub async fn ports(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "services": state.supervisor.ports() }))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    #[serde(rename = "serviceId")]
    service_id: Option<String>,
    lines: Option<usize>,
}

pub async fn logs_tail(State(state): State<ApiState>, Query(query): Query<TailQuery>) -> ApiResult {
    let service_id = query
        .service_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("serviceId is required"))?;
    let path = state
        .supervisor
        .log_path(&service_id)
        .ok_or_else(|| ApiError::bad_request(format!("unknown service '{}'", service_id)))?;

    let lines = match read_tail(path, clamp_tail_lines(query.lines)).await {
        Ok(lines) => lines,
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ApiError::bad_request(format!(
                "no log for service '{}' yet",
                service_id
            )))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(json!({ "service_id": service_id, "lines": lines })))
}

pub async fn shutdown(State(state): State<ApiState>) -> Json<Value> {
    state.supervisor.request_shutdown();
    Json(json!({ "status": "stopping" }))
}

pub async fn list_secrets(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "secrets": state.supervisor.secret_summaries() }))
}

#[derive(Debug, Deserialize)]
pub struct SecretsUpdate {
    secrets: SecretValues,
}

pub async fn submit_secrets(
    State(state): State<ApiState>,
    Json(update): Json<SecretsUpdate>,
) -> ApiResult {
    state.supervisor.submit_secrets(update.secrets)?;
    Ok(Json(json!({
        "status": "ok",
        "launch_started": state.supervisor.launch_started(),
    })))
}

pub async fn telemetry(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "path": state.supervisor.telemetry_path().display().to_string(),
        "upload_url": state.supervisor.telemetry_upload_url(),
    }))
}
