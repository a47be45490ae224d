// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use url::Url;

use crate::auth::{
    AuthorizationPolicy, ChallengeStore, CookieSettings, IdTokenVerifier, IdentityExchange,
    IdentityProvider, JwksManager, MultiFactorHeuristic, RequestGuard, SessionManager,
};
use crate::clock::Clock;
use crate::config::{AuthSettings, PolicyMode};
use crate::storage::{AllowListRepository, AuthStore, IdentityRepository, StoreHealth, StoreResult};

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub challenges: Arc<ChallengeStore>,
    pub exchange: Arc<IdentityExchange>,
    pub sessions: Arc<SessionManager>,
    pub guard: RequestGuard,
    pub allow_list: Arc<dyn AllowListRepository>,
    pub identities: Arc<dyn IdentityRepository>,
    pub store_health: Arc<dyn StoreHealth>,
    pub cookies: CookieSettings,
    pub frontend_url: Option<Url>,
    /// Present when ID tokens are verified against a remote key set.
    pub jwks: Option<JwksManager>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the auth core over one store.
    ///
    /// Seeds the base admin of an allow-list policy, so this touches storage.
    pub fn build<S>(
        store: Arc<S>,
        provider: Arc<dyn IdentityProvider>,
        verifier: Arc<dyn IdTokenVerifier>,
        clock: Arc<dyn Clock>,
        settings: &AuthSettings,
    ) -> StoreResult<Self>
    where
        S: AuthStore + 'static,
    {
        let policy = match &settings.policy {
            PolicyMode::AllowList { base_admin } => {
                if let Some(email) = base_admin {
                    store.ensure_base_admin(email, clock.now())?;
                }
                AuthorizationPolicy::AllowList(store.clone())
            }
            PolicyMode::SinglePrincipal { email } => AuthorizationPolicy::single_principal(email),
        };

        let challenges = ChallengeStore::new(store.clone(), clock.clone())
            .with_ttl(settings.challenge_ttl)
            .with_pkce(settings.pkce_enabled);

        let mut exchange =
            IdentityExchange::new(provider, verifier, store.clone(), policy, clock.clone())
                .with_principal_key(settings.principal_key)
                .with_strong_auth(settings.request_strong_auth);
        if settings.require_second_factor {
            exchange = exchange.with_second_factor(Arc::new(MultiFactorHeuristic::new(
                settings.second_factor_max_age,
            )));
        }

        let sessions = Arc::new(
            SessionManager::new(store.clone(), store.clone(), clock.clone())
                .with_ttl(settings.session_ttl),
        );
        let guard = RequestGuard::new(sessions.clone(), &settings.cookie.name);

        Ok(Self {
            challenges: Arc::new(challenges),
            exchange: Arc::new(exchange),
            sessions,
            guard,
            allow_list: store.clone(),
            identities: store.clone(),
            store_health: store,
            cookies: settings.cookie.clone(),
            frontend_url: settings.frontend_base_url.clone(),
            jwks: None,
            clock,
        })
    }

    pub fn with_jwks(mut self, jwks: JwksManager) -> Self {
        self.jwks = Some(jwks);
        self
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        self.exchange.policy()
    }
}
