//! Error types for authentication, token handling and the secondary store.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::pipeline::FailureDetail;

/// Failure of a token operation in [`TokenService`](crate::TokenService).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Rejected authentication or authorization, surfaced to callers.
///
/// Every variant carries a stable machine-readable [`kind`](AuthError::kind)
/// that ends up in the JSON body of the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no access token was presented")]
    NoToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    Expired,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("rate limit `{limiter}` exceeded")]
    RateLimited {
        limiter: &'static str,
        retry_after_secs: u64,
    },

    #[error("subject directory unavailable: {0}")]
    Directory(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable code identifying the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::NoToken => "NO_TOKEN",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::Expired => "TOKEN_EXPIRED",
            AuthError::AccountDisabled => "ACCOUNT_DISABLED",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::Directory(_) => "DIRECTORY_UNAVAILABLE",
            AuthError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::NoToken
            | AuthError::InvalidToken(_)
            | AuthError::Expired
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::InsufficientPermissions => {
                StatusCode::FORBIDDEN
            }
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Directory(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::Expired,
            TokenError::Invalid(msg) | TokenError::Malformed(msg) => AuthError::InvalidToken(msg),
            TokenError::Signing(msg) => AuthError::Internal(msg),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));
        let mut response = (self.status(), body).into_response();
        if let AuthError::RateLimited {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
            .extensions_mut()
            .insert(FailureDetail(format!("{}: {}", self.kind(), self)));
        response
    }
}

/// Secondary-store failure. Never surfaced as a request failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("secondary store is unavailable")]
    Unavailable,

    #[error("secondary store call timed out")]
    Timeout,

    #[error("secondary store rejected the operation: {0}")]
    Backend(#[from] DbErr),
}
