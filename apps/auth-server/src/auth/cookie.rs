// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session cookie conventions.
//!
//! The session token travels either as `Authorization: Bearer <token>` or as
//! an HTTP-only cookie scoped to `/` whose `Max-Age` equals the session TTL.
//! Logout clears it with `Max-Age=0`.

use axum_extra::extract::cookie::{Cookie, SameSite};

pub const DEFAULT_SESSION_COOKIE: &str = "heron_session";

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: i64,
}

impl CookieSettings {
    pub fn new(name: impl Into<String>, max_age_secs: i64) -> Self {
        Self {
            name: name.into(),
            secure: true,
            same_site: SameSite::Lax,
            max_age_secs,
        }
    }

    /// Cookie carrying a freshly minted session token.
    pub fn session_cookie(&self, token: &str) -> Cookie<'static> {
        self.build(token.to_string(), time::Duration::seconds(self.max_age_secs))
    }

    /// Cookie instructing the browser to drop the session cookie.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        self.build(String::new(), time::Duration::ZERO)
    }

    fn build(&self, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age)
            .build()
    }
}

/// Parse a `SameSite` attribute value, case-insensitively.
pub fn parse_same_site(value: &str) -> Option<SameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Some(SameSite::Lax),
        "strict" => Some(SameSite::Strict),
        "none" => Some(SameSite::None),
        _ => None,
    }
}
