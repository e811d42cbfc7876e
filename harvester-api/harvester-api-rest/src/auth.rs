//! Bearer token authentication.
//!
//! Every route under `/api/v1` expects `Authorization: Bearer <JWT>` signed
//! with the shared HS256 secret. Failures always answer 401 with
//! `code: "unauthorized"` so clients can tell an expired session apart from
//! a failed operation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Claims carried by an accepted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the caller's user name or id
    pub sub: String,
    /// Expiration (unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

pub(crate) struct JwtKeys {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub(crate) fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": self.to_string(), "code": "unauthorized" })),
        )
            .into_response()
    }
}

/// Validates the bearer token and stores its [Claims] in the request extensions.
pub(crate) async fn require_bearer(
    State(keys): State<Arc<JwtKeys>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let claims = keys.verify(token).inspect_err(|e| {
        debug!("API: rejected token for {}: {}", request.uri().path(), e);
    })?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
