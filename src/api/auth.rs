//! Bearer token for the control API.

use crate::error::{Error, Result};
use crate::platform::FileSystem;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use serde_json::json;
use std::io;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::ApiState;

/// Random bytes in a generated token (hex-encoded on disk).
pub const TOKEN_BYTES: usize = 24;

#[derive(Clone)]
pub struct AuthToken(Arc<str>);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Fresh token from the thread CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(hex::encode(bytes))
    }

    /// Reuse the token stored at `path`, or create and store a new one with
    /// owner-only permissions.
    pub fn load_or_create(path: &Path, fs: &dyn FileSystem) -> Result<Self> {
        match fs.read_to_string(path) {
            Ok(existing) if !existing.trim().is_empty() => {
                return Ok(Self::new(existing.trim()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Filesystem(format!(
                    "Failed to read auth token '{}': {}",
                    path.display(),
                    e
                )))
            }
        }

        let token = Self::generate();
        fs.write_private(path, token.as_str().as_bytes())
            .map_err(|e| {
                Error::Filesystem(format!(
                    "Failed to write auth token '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        tracing::debug!("Created control API token at {}", path.display());
        Ok(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(presented.as_bytes()))
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Rejects requests without `Authorization: Bearer <token>`.
pub async fn require_bearer(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if state.token.matches(token) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid bearer token" })),
        )
            .into_response(),
    }
}
