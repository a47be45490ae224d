// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Every setting comes from the environment and is validated once at start-up.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `auth.redb` | unset (in-memory store) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `GOOGLE_CLIENT_ID` | OAuth client id, also the ID token audience | Required |
//! | `GOOGLE_CLIENT_SECRET` | OAuth client secret | Required |
//! | `GOOGLE_REDIRECT_URL` | Registered callback URL | Required |
//! | `AUTH_POLICY` | `allow_list` or `single_principal` | `allow_list` |
//! | `AUTHORIZED_EMAIL` | The single principal | Required for `single_principal` |
//! | `BASE_ADMIN_EMAIL` | Undeletable allow-list entry | unset |
//! | `PRINCIPAL_KEY` | Identity key, `subject` or `email` | `subject` |
//! | `PKCE_ENABLED` | Send a PKCE challenge | `true` |
//! | `REQUIRE_SECOND_FACTOR` | Enforce the second-factor heuristic | `false` |
//! | `SECOND_FACTOR_MAX_AGE_SECS` | Recency window of the heuristic (max 1 day) | `1800` |
//! | `REQUEST_STRONG_AUTH` | Ask Google for consent + multi-factor | `false` |
//! | `SESSION_TTL_SECS` | Session lifetime (max 400 days) | `86400` |
//! | `CHALLENGE_TTL_SECS` | Login challenge lifetime (max 1 day) | `300` |
//! | `SESSION_COOKIE_NAME` | Session cookie name | `heron_session` |
//! | `COOKIE_SECURE` | `Secure` cookie attribute | `true` |
//! | `COOKIE_SAME_SITE` | `lax`, `strict` or `none` | `lax` |
//! | `SWEEP_INTERVAL_SECS` | Expiry sweep period | `300` |
//! | `PROVIDER_TIMEOUT_SECS` | Timeout for calls to Google | `10` |
//! | `FRONTEND_BASE_URL` | Redirect target after login | unset (JSON response) |
//! | `ALLOWED_ORIGINS` | Comma-separated CORS origins | unset (same-origin only) |

use std::path::PathBuf;
use std::time::Duration;

use axum_extra::extract::cookie::SameSite;
use thiserror::Error;
use url::Url;

use crate::auth::challenge::DEFAULT_CHALLENGE_TTL_SECS;
use crate::auth::cookie::{parse_same_site, CookieSettings, DEFAULT_SESSION_COOKIE};
use crate::auth::policy::DEFAULT_SECOND_FACTOR_MAX_AGE_SECS;
use crate::auth::session::DEFAULT_SESSION_TTL_SECS;
use crate::models::{normalize_email, PrincipalKey};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
/// Directory for the redb database file. When unset the server keeps all
/// state in memory and loses it on restart.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const GOOGLE_CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
pub const GOOGLE_CLIENT_SECRET_ENV: &str = "GOOGLE_CLIENT_SECRET";
pub const GOOGLE_REDIRECT_URL_ENV: &str = "GOOGLE_REDIRECT_URL";
pub const AUTH_POLICY_ENV: &str = "AUTH_POLICY";
pub const AUTHORIZED_EMAIL_ENV: &str = "AUTHORIZED_EMAIL";
pub const BASE_ADMIN_EMAIL_ENV: &str = "BASE_ADMIN_EMAIL";
pub const PRINCIPAL_KEY_ENV: &str = "PRINCIPAL_KEY";
pub const PKCE_ENABLED_ENV: &str = "PKCE_ENABLED";
pub const REQUIRE_SECOND_FACTOR_ENV: &str = "REQUIRE_SECOND_FACTOR";
pub const SECOND_FACTOR_MAX_AGE_ENV: &str = "SECOND_FACTOR_MAX_AGE_SECS";
pub const REQUEST_STRONG_AUTH_ENV: &str = "REQUEST_STRONG_AUTH";
pub const SESSION_TTL_ENV: &str = "SESSION_TTL_SECS";
pub const CHALLENGE_TTL_ENV: &str = "CHALLENGE_TTL_SECS";
pub const SESSION_COOKIE_NAME_ENV: &str = "SESSION_COOKIE_NAME";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const COOKIE_SAME_SITE_ENV: &str = "COOKIE_SAME_SITE";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const PROVIDER_TIMEOUT_ENV: &str = "PROVIDER_TIMEOUT_SECS";
pub const FRONTEND_BASE_URL_ENV: &str = "FRONTEND_BASE_URL";
pub const ALLOWED_ORIGINS_ENV: &str = "ALLOWED_ORIGINS";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Browsers cap cookie lifetimes at 400 days.
const MAX_SESSION_TTL_SECS: i64 = 400 * 24 * 60 * 60;
const MAX_CHALLENGE_TTL_SECS: i64 = 24 * 60 * 60;
const MAX_SECOND_FACTOR_MAX_AGE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Which identities may log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMode {
    AllowList { base_admin: Option<String> },
    SinglePrincipal { email: String },
}

#[derive(Debug, Clone)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Url,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub google: GoogleSettings,
    pub policy: PolicyMode,
    pub principal_key: PrincipalKey,
    pub pkce_enabled: bool,
    pub require_second_factor: bool,
    pub second_factor_max_age: chrono::Duration,
    pub request_strong_auth: bool,
    pub session_ttl: chrono::Duration,
    pub challenge_ttl: chrono::Duration,
    pub cookie: CookieSettings,
    pub sweep_interval: Duration,
    pub provider_timeout: Duration,
    pub frontend_base_url: Option<Url>,
    pub allowed_origins: Vec<String>,
}

impl AuthSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, which maps a variable name to its raw
    /// value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let redirect_raw = env.required(GOOGLE_REDIRECT_URL_ENV)?;
        let google = GoogleSettings {
            client_id: env.required(GOOGLE_CLIENT_ID_ENV)?,
            client_secret: env.required(GOOGLE_CLIENT_SECRET_ENV)?,
            redirect_url: Url::parse(&redirect_raw)
                .map_err(|e| ConfigError::invalid(GOOGLE_REDIRECT_URL_ENV, e.to_string()))?,
        };

        let policy = match env
            .or_default(AUTH_POLICY_ENV, "allow_list")
            .to_ascii_lowercase()
            .as_str()
        {
            "allow_list" | "allowlist" => PolicyMode::AllowList {
                base_admin: env
                    .optional(BASE_ADMIN_EMAIL_ENV)
                    .map(|e| normalize_email(&e))
                    .filter(|e| !e.is_empty()),
            },
            "single_principal" | "single" => {
                let email = normalize_email(&env.required(AUTHORIZED_EMAIL_ENV)?);
                if email.is_empty() {
                    return Err(ConfigError::Missing(AUTHORIZED_EMAIL_ENV));
                }
                PolicyMode::SinglePrincipal { email }
            }
            other => {
                return Err(ConfigError::invalid(
                    AUTH_POLICY_ENV,
                    format!("unknown policy `{other}`"),
                ))
            }
        };

        let principal_key = env
            .or_default(PRINCIPAL_KEY_ENV, "subject")
            .parse::<PrincipalKey>()
            .map_err(|e| ConfigError::invalid(PRINCIPAL_KEY_ENV, e))?;

        let session_ttl_secs =
            env.bounded_secs(SESSION_TTL_ENV, DEFAULT_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS)?;
        let challenge_ttl_secs = env.bounded_secs(
            CHALLENGE_TTL_ENV,
            DEFAULT_CHALLENGE_TTL_SECS,
            MAX_CHALLENGE_TTL_SECS,
        )?;
        let second_factor_secs = env.bounded_secs(
            SECOND_FACTOR_MAX_AGE_ENV,
            DEFAULT_SECOND_FACTOR_MAX_AGE_SECS,
            MAX_SECOND_FACTOR_MAX_AGE_SECS,
        )?;

        let same_site_raw = env.or_default(COOKIE_SAME_SITE_ENV, "lax");
        let same_site = parse_same_site(&same_site_raw).ok_or_else(|| {
            ConfigError::invalid(COOKIE_SAME_SITE_ENV, format!("unknown value `{same_site_raw}`"))
        })?;
        let secure = env.flag(COOKIE_SECURE_ENV, true)?;
        if same_site == SameSite::None && !secure {
            return Err(ConfigError::invalid(
                COOKIE_SAME_SITE_ENV,
                "SameSite=None requires COOKIE_SECURE=true",
            ));
        }
        let cookie = CookieSettings {
            name: env.or_default(SESSION_COOKIE_NAME_ENV, DEFAULT_SESSION_COOKIE),
            secure,
            same_site,
            max_age_secs: session_ttl_secs,
        };

        let frontend_base_url = env
            .optional(FRONTEND_BASE_URL_ENV)
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|e| ConfigError::invalid(FRONTEND_BASE_URL_ENV, e.to_string()))?;

        let log_format = match env.or_default(LOG_FORMAT_ENV, "pretty").as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: env.or_default(HOST_ENV, DEFAULT_HOST),
            port: env.parsed(PORT_ENV, DEFAULT_PORT)?,
            data_dir: env.optional(DATA_DIR_ENV).map(PathBuf::from),
            log_format,
            google,
            policy,
            principal_key,
            pkce_enabled: env.flag(PKCE_ENABLED_ENV, true)?,
            require_second_factor: env.flag(REQUIRE_SECOND_FACTOR_ENV, false)?,
            second_factor_max_age: chrono::Duration::seconds(second_factor_secs),
            request_strong_auth: env.flag(REQUEST_STRONG_AUTH_ENV, false)?,
            session_ttl: chrono::Duration::seconds(session_ttl_secs),
            challenge_ttl: chrono::Duration::seconds(challenge_ttl_secs),
            cookie,
            sweep_interval: Duration::from_secs(
                env.positive(SWEEP_INTERVAL_ENV, DEFAULT_SWEEP_INTERVAL_SECS)?,
            ),
            provider_timeout: Duration::from_secs(
                env.positive(PROVIDER_TIMEOUT_ENV, DEFAULT_PROVIDER_TIMEOUT_SECS)?,
            ),
            frontend_base_url,
            allowed_origins: env
                .optional(ALLOWED_ORIGINS_ENV)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string())),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(name, default)?;
        if value <= T::default() {
            return Err(ConfigError::invalid(name, "must be positive"));
        }
        Ok(value)
    }

    fn bounded_secs(&self, name: &'static str, default: i64, max: i64) -> Result<i64, ConfigError> {
        let value = self.positive(name, default)?;
        if value > max {
            return Err(ConfigError::invalid(
                name,
                format!("must be at most {max} seconds"),
            ));
        }
        Ok(value)
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(name, format!("expected a boolean, got `{v}`"))),
            },
        }
    }
}
