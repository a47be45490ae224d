// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider client (Google OAuth 2.0 / OpenID Connect).
//!
//! The provider is reached through the [`IdentityProvider`] trait so the
//! exchange logic can be exercised against a fake. [`GoogleProvider`] is the
//! production implementation: it builds the authorization URL and trades an
//! authorization code for tokens at the token endpoint.
//!
//! Every network call carries the HTTP client's timeout. Nothing is retried
//! here; a timeout is reported as [`ProviderError::Timeout`] and the caller
//! decides.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::error::AuthError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested at login. Nothing beyond basic profile and email.
pub const DEFAULT_SCOPES: &str = "openid email profile";

/// `acr_values` hint asking Google for a multi-factor login.
pub const MULTI_FACTOR_ACR: &str = "http://schemas.openid.net/pape/policies/2007/06/multi-factor";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider request timed out")]
    Timeout,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    #[error("identity provider response was invalid: {0}")]
    InvalidResponse(String),
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout | ProviderError::Unavailable(_) => {
                AuthError::ProviderUnavailable(err.to_string())
            }
            ProviderError::Rejected(_) | ProviderError::InvalidResponse(_) => {
                AuthError::ProviderRejected(err.to_string())
            }
        }
    }
}

/// Inputs for the authorization endpoint URL.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub state: &'a str,
    /// S256 PKCE challenge, when PKCE is in use.
    pub code_challenge: Option<&'a str>,
    /// Ask the provider for a fresh, strong (multi-factor) login.
    pub strong_auth: bool,
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization endpoint URL for one login attempt. Pure.
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Url;

    /// Trade an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<TokenSet, ProviderError>;
}

/// OAuth client registration and endpoints.
#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: Url,
    pub token_url: Url,
}

impl GoogleProviderConfig {
    /// Configuration against Google's public endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            auth_url: Url::parse(GOOGLE_AUTH_URL)?,
            token_url: Url::parse(GOOGLE_TOKEN_URL)?,
        })
    }

    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = token_url;
        self
    }
}

pub struct GoogleProvider {
    config: GoogleProviderConfig,
    http: Client,
}

impl GoogleProvider {
    /// `http` should carry a request timeout; it is the only bound on the
    /// token exchange.
    pub fn new(config: GoogleProviderConfig, http: Client) -> Self {
        Self { config, http }
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Url {
        let mut url = self.config.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_url)
                .append_pair("response_type", "code")
                .append_pair("scope", DEFAULT_SCOPES)
                .append_pair("access_type", "offline")
                .append_pair("state", request.state);

            if let Some(challenge) = request.code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }

            if request.strong_auth {
                query
                    .append_pair("prompt", "consent")
                    .append_pair("include_granted_scopes", "true")
                    .append_pair("acr_values", MULTI_FACTOR_ACR);
            }
        }
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<TokenSet, ProviderError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());
        form.insert("redirect_uri", self.config.redirect_url.as_str());
        if let Some(verifier) = verifier {
            form.insert("code_verifier", verifier);
        }

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorBody>(&body)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {desc}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("HTTP {status}"));
            debug!(%status, reason = %reason, "Token endpoint returned an error");

            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ProviderError::Unavailable(reason)
            } else {
                ProviderError::Rejected(reason)
            });
        }

        let tokens: TokenSet = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::InvalidResponse(e.to_string())
            }
        })?;

        Ok(tokens)
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}
