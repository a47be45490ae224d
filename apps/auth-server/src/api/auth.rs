// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login, logout and session endpoints.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::{token::redact, Auth, AuthError, OptionalAuth},
    models::{Identity, Session, SessionSummary},
    state::AppState,
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Google authorization URL to send the browser to.
    pub auth_url: String,
    /// When the login attempt stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Query string Google appends to the redirect URI.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set instead of `code` when the user declined or Google failed.
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginCompleted {
    pub identity: Identity,
    /// Also set as an HTTP-only cookie. Usable as a bearer token.
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub identity: Identity,
    pub session_expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeAllResponse {
    pub revoked: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmIResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a login.
///
/// Issues a one-time challenge and returns the Google URL that carries it.
#[utoipa::path(
    get,
    path = "/v1/auth/login",
    tag = "Auth",
    responses(
        (status = 200, description = "Authorization URL", body = LoginResponse),
        (status = 500, description = "Challenge could not be stored")
    )
)]
pub async fn login(State(state): State<AppState>) -> Result<Json<LoginResponse>, AuthError> {
    let challenge = state.challenges.issue()?;
    let auth_url = state
        .exchange
        .build_authorization_url(&challenge.state, challenge.verifier.as_deref());

    Ok(Json(LoginResponse {
        auth_url: auth_url.into(),
        expires_at: challenge.expires_at,
    }))
}

/// Finish a login.
///
/// Consumes the challenge, exchanges the code and starts a session. With
/// `FRONTEND_BASE_URL` set the browser is redirected there (with `?error=`
/// on failure); otherwise the result is returned as JSON.
#[utoipa::path(
    get,
    path = "/v1/auth/callback",
    tag = "Auth",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Logged in", body = LoginCompleted),
        (status = 303, description = "Redirect to the frontend"),
        (status = 400, description = "Unknown, reused or expired state"),
        (status = 401, description = "Authentication failed"),
        (status = 403, description = "Identity not permitted"),
        (status = 503, description = "Google unavailable, retry")
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    match complete_login(&state, query).await {
        Ok((identity, session)) => {
            info!(
                identity = %identity.id,
                session = redact(&session.token),
                "Login completed"
            );
            let jar = jar.add(state.cookies.session_cookie(&session.token));
            match &state.frontend_url {
                Some(url) => (jar, Redirect::to(url.as_str())).into_response(),
                None => (
                    jar,
                    Json(LoginCompleted {
                        expires_at: session.expires_at,
                        session_token: session.token,
                        identity,
                    }),
                )
                    .into_response(),
            }
        }
        Err(e) => {
            warn!(error_code = e.error_code(), detail = ?e.detail(), "Login failed");
            match &state.frontend_url {
                Some(url) => {
                    let mut target = url.clone();
                    target.query_pairs_mut().append_pair("error", e.error_code());
                    Redirect::to(target.as_str()).into_response()
                }
                None => e.into_response(),
            }
        }
    }
}

async fn complete_login(
    state: &AppState,
    query: CallbackQuery,
) -> Result<(Identity, Session), AuthError> {
    let challenge_state = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::InvalidOrExpiredChallenge)?;

    // Consumed before anything else so a failed attempt cannot be replayed.
    let verifier = state.challenges.consume_and_validate(&challenge_state)?;

    if let Some(error) = query.error {
        return Err(AuthError::ProviderRejected(format!(
            "authorization denied: {error}"
        )));
    }

    let code = query.code.unwrap_or_default();
    let identity = state
        .exchange
        .exchange_and_verify(&code, verifier.as_deref())
        .await?;
    let session = state.sessions.create(&identity)?;
    Ok((identity, session))
}

/// Log out.
///
/// Revokes the presented session, if any, and clears the cookie. Always 204.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses((status = 204, description = "Logged out"))
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AuthError> {
    if let Some(token) = state.guard.extract(&headers) {
        state.sessions.revoke(&token)?;
    }
    Ok((jar.add(state.cookies.removal_cookie()), StatusCode::NO_CONTENT))
}

/// Current identity and session expiry.
#[utoipa::path(
    get,
    path = "/v1/auth/status",
    tag = "Auth",
    security(("session" = [])),
    responses(
        (status = 200, description = "Logged in", body = StatusResponse),
        (status = 401, description = "Missing, expired or invalid session")
    )
)]
pub async fn status(Auth(user): Auth) -> Json<StatusResponse> {
    Json(StatusResponse {
        session_expires_at: user.session.expires_at,
        last_activity_at: user.session.last_activity_at,
        identity: user.identity,
    })
}

/// Extend the current session by a full TTL and re-issue the cookie.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    security(("session" = [])),
    responses(
        (status = 200, description = "Session extended", body = RefreshResponse),
        (status = 401, description = "Missing, expired or invalid session")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Auth(user): Auth,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RefreshResponse>), AuthError> {
    let session = state.sessions.refresh(&user.session.token)?;
    Ok((
        jar.add(state.cookies.session_cookie(&session.token)),
        Json(RefreshResponse {
            expires_at: session.expires_at,
        }),
    ))
}

/// Active sessions of the caller, oldest first.
#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    tag = "Auth",
    security(("session" = [])),
    responses(
        (status = 200, description = "Active sessions", body = Vec<SessionSummary>),
        (status = 401, description = "Missing, expired or invalid session")
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Auth(user): Auth,
) -> Result<Json<Vec<SessionSummary>>, AuthError> {
    let sessions = state.sessions.active_sessions(user.identity_id())?;
    Ok(Json(
        sessions
            .iter()
            .map(|s| SessionSummary::from_session(s, &user.session.token))
            .collect(),
    ))
}

/// Sign out everywhere: revoke every session of the caller.
#[utoipa::path(
    delete,
    path = "/v1/auth/sessions",
    tag = "Auth",
    security(("session" = [])),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Missing, expired or invalid session")
    )
)]
pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    Auth(user): Auth,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RevokeAllResponse>), AuthError> {
    let summary = state.sessions.revoke_all(user.identity_id())?;
    Ok((
        jar.add(state.cookies.removal_cookie()),
        Json(RevokeAllResponse {
            revoked: summary.revoked,
            failed: summary.failed,
        }),
    ))
}

/// The caller's identity, or anonymous.
#[utoipa::path(
    get,
    path = "/v1/auth/whoami",
    tag = "Auth",
    responses((status = 200, description = "Caller", body = WhoAmIResponse))
)]
pub async fn whoami(OptionalAuth(user): OptionalAuth) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        authenticated: user.is_some(),
        identity: user.map(|u| u.identity),
    })
}
