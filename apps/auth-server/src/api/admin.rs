// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Allow-list administration.
//!
//! Mounted behind the policy guard: only callers admitted by the configured
//! [`AuthorizationPolicy`](crate::auth::AuthorizationPolicy) reach these
//! handlers. Mounted only under the allow-list policy.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Auth,
    error::ApiError,
    models::{normalize_email, AddAllowedEmailRequest, AllowedEmail},
    state::AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AllowedEmailListResponse {
    pub emails: Vec<AllowedEmail>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RemoveAllowedEmailResponse {
    pub removed: AllowedEmail,
    /// Sessions of the removed user that were revoked.
    pub revoked_sessions: usize,
}

/// List allowed emails, base admin first.
#[utoipa::path(
    get,
    path = "/v1/admin/allowed-emails",
    tag = "Admin",
    security(("session" = [])),
    responses(
        (status = 200, description = "Allowed emails", body = AllowedEmailListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not permitted")
    )
)]
pub async fn list_allowed_emails(
    State(state): State<AppState>,
    Auth(_user): Auth,
) -> Result<Json<AllowedEmailListResponse>, ApiError> {
    let emails = state.allow_list.list_allowed()?;
    Ok(Json(AllowedEmailListResponse {
        total: emails.len(),
        emails,
    }))
}

/// Allow another email to log in.
#[utoipa::path(
    post,
    path = "/v1/admin/allowed-emails",
    tag = "Admin",
    security(("session" = [])),
    request_body = AddAllowedEmailRequest,
    responses(
        (status = 201, description = "Email added", body = AllowedEmail),
        (status = 400, description = "Not an email address"),
        (status = 409, description = "Already allowed")
    )
)]
pub async fn add_allowed_email(
    State(state): State<AppState>,
    Auth(user): Auth,
    Json(request): Json<AddAllowedEmailRequest>,
) -> Result<(StatusCode, Json<AllowedEmail>), ApiError> {
    let email = normalize_email(&request.email);
    if !looks_like_email(&email) {
        return Err(ApiError::bad_request("a valid email address is required"));
    }

    let entry = state.allow_list.add_allowed(&email, state.clock.now())?;
    info!(by = %user.identity_id(), email = %entry.email, "Allowed email added");
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Remove an allowed email and sign its owner out everywhere.
///
/// The base admin entry cannot be removed.
#[utoipa::path(
    delete,
    path = "/v1/admin/allowed-emails/{id}",
    tag = "Admin",
    security(("session" = [])),
    params(("id" = Uuid, Path, description = "Allowed email id")),
    responses(
        (status = 200, description = "Email removed", body = RemoveAllowedEmailResponse),
        (status = 403, description = "Base admin entry or not permitted"),
        (status = 404, description = "Unknown id")
    )
)]
pub async fn remove_allowed_email(
    State(state): State<AppState>,
    Auth(user): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<RemoveAllowedEmailResponse>, ApiError> {
    let removed = state.allow_list.remove_allowed(id)?;

    let revoked_sessions = match state.identities.find_identity_by_email(&removed.email)? {
        Some(identity) => state.sessions.revoke_all(&identity.id)?.revoked,
        None => 0,
    };

    info!(
        by = %user.identity_id(),
        email = %removed.email,
        revoked_sessions,
        "Allowed email removed"
    );
    Ok(Json(RemoveAllowedEmailResponse {
        removed,
        revoked_sessions,
    }))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.contains('@')
        }
        None => false,
    }
}
