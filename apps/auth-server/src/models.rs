// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Data Model
//!
//! Records owned by the authentication core and persisted through the
//! repositories in [`crate::storage`].
//!
//! - **Identity**: a verified Google principal, upserted on every login
//! - **AuthorizationChallenge**: single-use CSRF/PKCE state for one login attempt
//! - **Session**: opaque, revocable, time-bounded proof of authentication
//! - **AllowedEmail**: one entry of the admin allow-list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;
use uuid::Uuid;

/// Canonical form of an email address: NFKC, trimmed, lower-cased.
///
/// Every email that reaches a repository or a policy goes through this first,
/// so `Alice@Example.com ` and `alice@example.com` are the same principal.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().nfkc().collect::<String>().to_lowercase()
}

// =============================================================================
// Identity
// =============================================================================

/// Which claim is the primary key of an [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKey {
    /// The provider's stable `sub` claim.
    #[default]
    Subject,
    /// The normalized email address.
    Email,
}

impl PrincipalKey {
    /// Pick the identity key for a verified principal.
    pub fn identity_id(&self, subject: &str, email: &str) -> String {
        match self {
            PrincipalKey::Subject => subject.to_string(),
            PrincipalKey::Email => normalize_email(email),
        }
    }
}

impl std::str::FromStr for PrincipalKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" | "sub" => Ok(PrincipalKey::Subject),
            "email" => Ok(PrincipalKey::Email),
            other => Err(format!("unknown principal key '{other}'")),
        }
    }
}

/// A verified external principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    /// Primary key: the subject or the email, depending on [`PrincipalKey`].
    pub id: String,
    /// Provider subject (`sub` claim).
    pub subject: String,
    /// Normalized email address.
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Authorization Challenge
// =============================================================================

/// Ephemeral state binding a callback to the login attempt that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationChallenge {
    /// Random, URL-safe, primary key.
    pub state: String,
    /// PKCE verifier. Never leaves the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationChallenge {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Session
// =============================================================================

/// Server-side proof of authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque credential handed to the client. Primary key.
    pub token: String,
    /// Owning [`Identity::id`].
    pub identity_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// A session is valid iff `now < expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Client-facing view of a session. Carries only a token prefix.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    /// First characters of the session token, for display.
    pub token_hint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Whether this is the session that made the request.
    pub current: bool,
}

impl SessionSummary {
    pub fn from_session(session: &Session, current_token: &str) -> Self {
        Self {
            token_hint: crate::auth::token::redact(&session.token).to_string(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity_at: session.last_activity_at,
            current: session.token == current_token,
        }
    }
}

// =============================================================================
// Allow-list
// =============================================================================

/// One permitted email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AllowedEmail {
    pub id: Uuid,
    pub email: String,
    /// The base admin entry cannot be removed.
    pub is_base_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for adding an allowed email.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddAllowedEmailRequest {
    pub email: String,
}
