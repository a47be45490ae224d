// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! The login handshake and the request guard report failures through one
//! small, stable vocabulary. Provider- and storage-specific errors are
//! translated at the boundary and only their detail is logged; the client sees
//! a fixed message and a machine-readable `error_code`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Generic message for every failure during the login handshake.
pub const LOGIN_FAILED_MESSAGE: &str = "authentication failed";

/// Why a request guard refused a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// No bearer token and no session cookie.
    MissingCredential,
    /// The session existed but `now >= expires_at`.
    Expired,
    /// Unknown or revoked session.
    Invalid,
}

impl UnauthenticatedReason {
    pub fn message(&self) -> &'static str {
        match self {
            UnauthenticatedReason::MissingCredential => "authentication required",
            UnauthenticatedReason::Expired => "session expired",
            UnauthenticatedReason::Invalid => "invalid session",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            UnauthenticatedReason::MissingCredential => "missing_credential",
            UnauthenticatedReason::Expired => "session_expired",
            UnauthenticatedReason::Invalid => "invalid_session",
        }
    }
}

/// Authentication error type.
#[derive(Debug)]
pub enum AuthError {
    /// The `state` was never issued, was already consumed, or expired.
    InvalidOrExpiredChallenge,
    /// Provider timed out or failed. Retryable.
    ProviderUnavailable(String),
    /// Provider refused the exchange or returned an untrusted token.
    ProviderRejected(String),
    /// Token verified but its claims are unusable (unverified email, bad
    /// audience, expired).
    InvalidClaims(String),
    /// Verified identity fails the authorization policy.
    Unauthorized,
    /// Verified identity lacks second-factor evidence.
    StepUpRequired,
    /// Missing, expired or unknown session credential.
    Unauthenticated(UnauthenticatedReason),
    /// Authenticated but not permitted for this operation.
    Forbidden,
    /// Internal error
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidOrExpiredChallenge => "invalid_or_expired_challenge",
            AuthError::ProviderUnavailable(_) => "provider_unavailable",
            AuthError::ProviderRejected(_) => "provider_rejected",
            AuthError::InvalidClaims(_) => "invalid_claims",
            AuthError::Unauthorized => "unauthorized",
            AuthError::StepUpRequired => "step_up_required",
            AuthError::Unauthenticated(reason) => reason.error_code(),
            AuthError::Forbidden => "forbidden",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidOrExpiredChallenge => StatusCode::BAD_REQUEST,
            AuthError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::ProviderRejected(_)
            | AuthError::InvalidClaims(_)
            | AuthError::StepUpRequired
            | AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AuthError::Unauthorized | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may simply retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::ProviderUnavailable(_))
    }

    /// Internal detail for logs. Never sent to the client.
    pub fn detail(&self) -> Option<&str> {
        match self {
            AuthError::ProviderUnavailable(d)
            | AuthError::ProviderRejected(d)
            | AuthError::InvalidClaims(d)
            | AuthError::Internal(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidOrExpiredChallenge
            | AuthError::ProviderUnavailable(_)
            | AuthError::ProviderRejected(_)
            | AuthError::InvalidClaims(_)
            | AuthError::Unauthorized
            | AuthError::StepUpRequired => write!(f, "{LOGIN_FAILED_MESSAGE}"),
            AuthError::Unauthenticated(reason) => write!(f, "{}", reason.message()),
            AuthError::Forbidden => write!(f, "access denied"),
            AuthError::Internal(_) => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(format!("store: {err}"))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Some(detail) = self.detail() {
            tracing::warn!(error_code = self.error_code(), detail, "Authentication error");
        }
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
