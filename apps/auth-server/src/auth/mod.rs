// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Google OpenID Connect login with server-side sessions.
//!
//! ## Auth Flow
//!
//! 1. `GET /v1/auth/login`: the [`ChallengeStore`] issues a one-time `state`
//!    (plus PKCE verifier) and [`IdentityExchange`] builds Google's
//!    authorization URL.
//! 2. Google redirects back to `/v1/auth/callback?code&state`:
//!    - the challenge is consumed (at most once, within its TTL)
//!    - the code is exchanged and the ID token verified against Google's JWKS
//!    - the verified email must pass the [`AuthorizationPolicy`]
//! 3. [`SessionManager`] mints an opaque session token, delivered as an
//!    HTTP-only cookie (or used as a bearer token).
//! 4. Every protected call goes through the [`RequestGuard`], which resolves
//!    the token back to an [`Identity`](crate::models::Identity).
//!
//! ## Security
//!
//! - State, verifier and session tokens carry 256 bits of OS randomness
//! - ID tokens: signature, issuer, audience and expiry are checked, with 60
//!   seconds of clock skew tolerance
//! - Login failures report one generic message; details only reach the logs
//! - Tokens are never logged in full

pub mod challenge;
pub mod claims;
pub mod cookie;
pub mod error;
pub mod exchange;
pub mod extractor;
pub mod guard;
pub mod jwks;
pub mod middleware;
pub mod policy;
pub mod provider;
pub mod session;
pub mod token;

pub use challenge::{ChallengeStore, IssuedChallenge};
pub use claims::{AuthenticatedUser, IdTokenClaims};
pub use cookie::CookieSettings;
pub use error::{AuthError, UnauthenticatedReason};
pub use exchange::IdentityExchange;
pub use extractor::{Auth, OptionalAuth};
pub use guard::{optional_auth, require_auth, require_policy, RequestGuard};
pub use jwks::{IdTokenVerifier, JwksManager, JwksVerifier};
pub use policy::{AuthorizationPolicy, MultiFactorHeuristic, NotRequired, SecondFactorPolicy};
pub use provider::{
    AuthorizationRequest, GoogleProvider, GoogleProviderConfig, IdentityProvider, ProviderError,
    TokenSet,
};
pub use session::{InvalidReason, RevokeSummary, SessionManager, SessionStatus};
