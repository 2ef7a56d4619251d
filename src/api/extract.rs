use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use ulid::Ulid;

use crate::model::{Cents, decimal_to_cents};

use super::{ApiError, AppState};

/// A JSON request body. Malformed or mistyped bodies are rejected with the
/// `validation` error envelope instead of axum's plain-text 4xx.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// A client money amount in cents, or a validation error naming `field`.
pub fn amount_field(field: &str, value: f64) -> Result<Cents, ApiError> {
    decimal_to_cents(value).ok_or_else(|| ApiError::bad_request(format!("{field} is out of range")))
}

/// The verified caller, from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Ulid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        state
            .verifier
            .verify(token)
            .await
            .map(AuthUser)
            .ok_or_else(|| ApiError::unauthorized("invalid token"))
    }
}

/// Proof that the request carried the operator key in `X-API-Key`.
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

#[async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key.as_deref() else {
            return Err(ApiError::forbidden("catalogue administration is disabled"));
        };
        match parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            Some(key) if key == expected => Ok(AdminKey),
            Some(_) => Err(ApiError::forbidden("invalid API key")),
            None => Err(ApiError::unauthorized("missing API key")),
        }
    }
}
