// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Exchange
//!
//! Turns an authorization code into a verified, authorized [`Identity`].
//!
//! ## Steps
//!
//! 1. Exchange the code (plus PKCE verifier) at the provider's token endpoint
//! 2. Verify the returned ID token (signature, issuer, audience, expiry)
//! 3. Require a verified email
//! 4. Apply the [`AuthorizationPolicy`] (`Unauthorized` on failure)
//! 5. Apply the [`SecondFactorPolicy`] (`StepUpRequired` on failure)
//! 6. Upsert the identity record, refreshing display name and picture
//!
//! Nothing is persisted before step 6, so a failed or cancelled exchange
//! leaves no state behind.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use super::error::AuthError;
use super::jwks::IdTokenVerifier;
use super::policy::{AuthorizationPolicy, NotRequired, SecondFactorPolicy};
use super::provider::{AuthorizationRequest, IdentityProvider};
use super::token::pkce_challenge;
use crate::clock::Clock;
use crate::models::{normalize_email, Identity, PrincipalKey};
use crate::storage::IdentityRepository;

pub struct IdentityExchange {
    provider: Arc<dyn IdentityProvider>,
    verifier: Arc<dyn IdTokenVerifier>,
    identities: Arc<dyn IdentityRepository>,
    policy: AuthorizationPolicy,
    second_factor: Arc<dyn SecondFactorPolicy>,
    clock: Arc<dyn Clock>,
    principal_key: PrincipalKey,
    strong_auth: bool,
}

impl IdentityExchange {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        verifier: Arc<dyn IdTokenVerifier>,
        identities: Arc<dyn IdentityRepository>,
        policy: AuthorizationPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            verifier,
            identities,
            policy,
            second_factor: Arc::new(NotRequired),
            clock,
            principal_key: PrincipalKey::default(),
            strong_auth: false,
        }
    }

    pub fn with_second_factor(mut self, policy: Arc<dyn SecondFactorPolicy>) -> Self {
        self.second_factor = policy;
        self
    }

    pub fn with_principal_key(mut self, key: PrincipalKey) -> Self {
        self.principal_key = key;
        self
    }

    /// Ask the provider for a fresh multi-factor login on every attempt.
    pub fn with_strong_auth(mut self, enabled: bool) -> Self {
        self.strong_auth = enabled;
        self
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    /// Provider authorization URL for `state`. Deterministic and side-effect
    /// free; the verifier only contributes its S256 challenge.
    pub fn build_authorization_url(&self, state: &str, verifier: Option<&str>) -> Url {
        let challenge = verifier.map(pkce_challenge);
        self.provider.authorization_url(&AuthorizationRequest {
            state,
            code_challenge: challenge.as_deref(),
            strong_auth: self.strong_auth,
        })
    }

    /// Exchange `code` and return the authorized identity.
    pub async fn exchange_and_verify(
        &self,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<Identity, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::ProviderRejected("missing authorization code".into()));
        }

        let tokens = self.provider.exchange_code(code, verifier).await?;
        let id_token = tokens
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::ProviderRejected("token response lacks id_token".into()))?;

        let claims = self.verifier.verify(id_token).await?;

        if claims.sub.is_empty() {
            return Err(AuthError::InvalidClaims("empty subject".into()));
        }
        let email = claims
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::InvalidClaims("missing email".into()))?;
        if !claims.email_verified {
            return Err(AuthError::InvalidClaims("email not verified".into()));
        }

        let permitted = self.policy.permits_email(&email)?;
        if !permitted {
            warn!(email = %email, policy = self.policy.kind(), "Login denied by authorization policy");
            return Err(AuthError::Unauthorized);
        }

        let now = self.clock.now();
        if !self.second_factor.is_satisfied(&claims, now) {
            warn!(email = %email, "Login lacks second-factor evidence");
            return Err(AuthError::StepUpRequired);
        }

        let identity = Identity {
            id: self.principal_key.identity_id(&claims.sub, &email),
            subject: claims.sub.clone(),
            email,
            display_name: claims.name.clone().filter(|n| !n.trim().is_empty()),
            picture: claims.picture.clone(),
            email_verified: true,
            created_at: now,
            updated_at: now,
        };
        let stored = self.identities.upsert_identity(&identity)?;

        info!(identity = %stored.id, email = %stored.email, "Identity verified");
        Ok(stored)
    }
}
