// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ID token claims and the authenticated-user context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Identity, Session};

/// Claims read from a Google ID token.
///
/// `aud` is checked by `jsonwebtoken` during decoding and is not kept here.
/// See: https://developers.google.com/identity/openid-connect/openid-connect#an-id-tokens-payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer (`accounts.google.com` or `https://accounts.google.com`)
    pub iss: String,

    /// Subject - stable Google account identifier
    pub sub: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Google has historically sent this as either a bool or a string.
    #[serde(default, deserialize_with = "bool_or_string")]
    pub email_verified: bool,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub picture: Option<String>,

    /// Issued at (Unix seconds)
    #[serde(default)]
    pub iat: i64,

    /// Expiration (Unix seconds)
    pub exp: i64,

    /// Time of the actual end-user authentication, when the provider sends it.
    #[serde(default)]
    pub auth_time: Option<i64>,

    /// Authentication methods references (`mfa`, `otp`, ...).
    #[serde(default)]
    pub amr: Vec<String>,

    /// Authentication context class reference.
    #[serde(default)]
    pub acr: Option<String>,
}

impl IdTokenClaims {
    /// When the user actually authenticated: `auth_time`, falling back to `iat`.
    pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
        let ts = self.auth_time.filter(|t| *t > 0).unwrap_or(self.iat);
        if ts <= 0 {
            return None;
        }
        DateTime::from_timestamp(ts, 0)
    }
}

fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// The resolved caller of a protected operation.
///
/// Handed to guarded operations as an explicit argument; there is no ambient
/// "current user".
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: Identity,

    /// The session that authenticated this request.
    pub session: Session,
}

impl AuthenticatedUser {
    pub fn identity_id(&self) -> &str {
        &self.identity.id
    }

    pub fn email(&self) -> &str {
        &self.identity.email
    }

    pub fn session_expires_at(&self) -> DateTime<Utc> {
        self.session.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_google_payload() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "iss": "https://accounts.google.com",
            "azp": "client.apps.googleusercontent.com",
            "aud": "client.apps.googleusercontent.com",
            "sub": "110169484474386276334",
            "email": "ada@example.com",
            "email_verified": "true",
            "name": "Ada",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600
        }))
        .unwrap();

        assert!(claims.email_verified);
        assert!(claims.amr.is_empty());
        assert_eq!(
            claims.authenticated_at(),
            DateTime::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn auth_time_takes_precedence_over_iat() {
        let claims = IdTokenClaims {
            iat: 1_700_000_000,
            auth_time: Some(1_699_990_000),
            ..Default::default()
        };
        assert_eq!(
            claims.authenticated_at(),
            DateTime::from_timestamp(1_699_990_000, 0)
        );
        assert_eq!(IdTokenClaims::default().authenticated_at(), None);
    }
}
