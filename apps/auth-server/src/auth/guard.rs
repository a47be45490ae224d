// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Guard
//!
//! Resolves the caller of an operation from its session credential and
//! either enforces or merely exposes the result.
//!
//! ## Per-request states
//!
//! ```text
//! NoCredential      -> reject (RequireAuth) | anonymous (OptionalAuth)
//! CredentialPresent -> Valid    -> Authorized
//!                   -> Expired  -> Unauthenticated
//!                   -> NotFound -> Unauthenticated
//! Authorized        -> PolicyPass -> Admitted
//!                   -> PolicyFail -> Forbidden
//! ```
//!
//! The resolved identity is handed to the wrapped operation as an explicit
//! argument. [`require_auth`], [`optional_auth`] and [`require_policy`] wrap
//! any `Fn(.., R) -> Future` whose request type exposes headers, so the same
//! guard serves axum handlers, tower services and plain functions in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, Request};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::claims::AuthenticatedUser;
use super::error::{AuthError, UnauthenticatedReason};
use super::session::{SessionManager, SessionStatus};
use crate::models::Identity;

/// Boxed future returned by guarded operations.
pub type GuardFuture<T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send>>;

/// Anything a credential can be read from.
pub trait CredentialSource {
    fn headers(&self) -> &HeaderMap;
}

impl CredentialSource for HeaderMap {
    fn headers(&self) -> &HeaderMap {
        self
    }
}

impl CredentialSource for Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl<B> CredentialSource for Request<B> {
    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }
}

/// Read the session token: a `Bearer` authorization header wins, otherwise
/// the named cookie.
pub fn extract_credential(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|token| !token.is_empty())
}

#[derive(Clone)]
pub struct RequestGuard {
    sessions: Arc<SessionManager>,
    cookie_name: Arc<str>,
}

impl RequestGuard {
    pub fn new(sessions: Arc<SessionManager>, cookie_name: &str) -> Self {
        Self {
            sessions,
            cookie_name: Arc::from(cookie_name),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        extract_credential(headers, &self.cookie_name)
    }

    /// Validate an already extracted credential.
    pub fn resolve(&self, credential: Option<String>) -> Result<AuthenticatedUser, AuthError> {
        let token =
            credential.ok_or(AuthError::Unauthenticated(UnauthenticatedReason::MissingCredential))?;

        match self.sessions.validate(&token)? {
            SessionStatus::Active(user) => Ok(user),
            SessionStatus::Invalid(reason) => {
                debug!(reason = reason.as_str(), "Rejected session credential");
                Err(AuthError::Unauthenticated(reason.into()))
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but never rejects. Storage failures
    /// degrade to anonymous.
    pub fn resolve_optional(&self, credential: Option<String>) -> Option<AuthenticatedUser> {
        credential.as_ref()?;
        match self.resolve(credential) {
            Ok(user) => Some(user),
            Err(AuthError::Unauthenticated(_)) => None,
            Err(e) => {
                warn!(error = ?e, "Optional authentication failed, continuing anonymously");
                None
            }
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        self.resolve(self.extract(headers))
    }

    pub fn authenticate_optional(&self, headers: &HeaderMap) -> Option<AuthenticatedUser> {
        self.resolve_optional(self.extract(headers))
    }
}

/// Run `op` only for an authenticated caller.
pub fn require_auth<R, T, F, Fut>(
    guard: RequestGuard,
    op: F,
) -> impl Fn(R) -> GuardFuture<T> + Clone + Send + Sync + 'static
where
    R: CredentialSource + Send + 'static,
    T: Send + 'static,
    F: Fn(AuthenticatedUser, R) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AuthError>> + Send + 'static,
{
    move |request: R| -> GuardFuture<T> {
        let credential = guard.extract(request.headers());
        let outcome = guard.resolve(credential);
        let op = op.clone();
        Box::pin(async move { op(outcome?, request).await })
    }
}

/// Run `op` with the caller's identity when one resolves, `None` otherwise.
pub fn optional_auth<R, T, F, Fut>(
    guard: RequestGuard,
    op: F,
) -> impl Fn(R) -> GuardFuture<T> + Clone + Send + Sync + 'static
where
    R: CredentialSource + Send + 'static,
    T: Send + 'static,
    F: Fn(Option<AuthenticatedUser>, R) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AuthError>> + Send + 'static,
{
    move |request: R| -> GuardFuture<T> {
        let user = guard.authenticate_optional(request.headers());
        let op = op.clone();
        Box::pin(async move { op(user, request).await })
    }
}

/// [`require_auth`] plus a post-authentication predicate. A caller that
/// authenticates but fails `permits` is `Forbidden`.
pub fn require_policy<R, T, P, F, Fut>(
    guard: RequestGuard,
    permits: P,
    op: F,
) -> impl Fn(R) -> GuardFuture<T> + Clone + Send + Sync + 'static
where
    R: CredentialSource + Send + 'static,
    T: Send + 'static,
    P: Fn(&Identity) -> bool + Clone + Send + Sync + 'static,
    F: Fn(AuthenticatedUser, R) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AuthError>> + Send + 'static,
{
    require_auth(guard, move |user: AuthenticatedUser, request: R| {
        let admitted = permits(&user.identity);
        let op = op.clone();
        async move {
            if !admitted {
                debug!(identity = %user.identity.id, "Caller failed operation policy");
                return Err(AuthError::Forbidden);
            }
            op(user, request).await
        }
    })
}
