// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Router-level guards.
//!
//! Each middleware runs the request through one of the guard decorators and,
//! on success, stores the resolved [`AuthenticatedUser`] in the request
//! extensions where the [`Auth`](super::Auth) family of extractors picks it
//! up.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/status", get(status))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::claims::AuthenticatedUser;
use super::error::AuthError;
use super::guard::{optional_auth, require_auth, require_policy};
use crate::models::Identity;
use crate::state::AppState;

/// Reject requests without a valid session (`RequireAuth`).
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let guarded = require_auth(state.guard.clone(), hand_back::<AuthenticatedUser>);

    match guarded(request).await {
        Ok((user, request)) => forward(user, request, next).await,
        Err(e) => e.into_response(),
    }
}

/// Reject requests whose caller fails the authorization policy
/// (`RequirePolicy`). Unknown callers get 401, known but unlisted ones 403.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let policy = state.policy().clone();
    let guarded = require_policy(
        state.guard.clone(),
        move |identity: &Identity| policy.admits(identity),
        hand_back::<AuthenticatedUser>,
    );

    match guarded(request).await {
        Ok((user, request)) => forward(user, request, next).await,
        Err(e) => e.into_response(),
    }
}

/// Attach the caller when a valid session is presented; never rejects
/// (`OptionalAuth`).
pub async fn resolve_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let guarded = optional_auth(state.guard.clone(), hand_back::<Option<AuthenticatedUser>>);

    match guarded(request).await {
        Ok((Some(user), request)) => forward(user, request, next).await,
        Ok((None, request)) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Guarded operation that returns the resolved caller and the request so
/// the middleware can continue the chain itself.
async fn hand_back<U>(user: U, request: Request) -> Result<(U, Request), AuthError> {
    Ok((user, request))
}

async fn forward(user: AuthenticatedUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(user);
    next.run(request).await
}
