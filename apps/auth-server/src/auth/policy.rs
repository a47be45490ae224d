// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization Policy
//!
//! Decides which verified identities may use the application at all, and
//! whether a login carries enough second-factor evidence.
//!
//! ## Variants
//!
//! | Policy | Admits |
//! |--------|--------|
//! | `AllowList` | any email in the allow-list repository |
//! | `SinglePrincipal` | exactly one configured email |
//!
//! Both fail closed: a repository error denies.
//!
//! ## Second factor
//!
//! Google does not reliably report how a user signed in, so
//! [`MultiFactorHeuristic`] infers it from `acr`/`amr` and, failing that,
//! from how recently the user authenticated. This is an approximation, not a
//! guarantee, and it is off unless `REQUIRE_SECOND_FACTOR` is set.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::claims::IdTokenClaims;
use crate::models::{normalize_email, Identity};
use crate::storage::{AllowListRepository, StoreResult};

/// Default recency window for the second-factor fallback (30 minutes).
pub const DEFAULT_SECOND_FACTOR_MAX_AGE_SECS: i64 = 1800;

/// `acr` values that denote a multi-factor login.
const MULTI_FACTOR_ACR_VALUES: [&str; 3] = [
    "http://schemas.openid.net/pape/policies/2007/06/multi-factor",
    "urn:mace:incommon:iap:silver",
    "urn:mace:incommon:iap:gold",
];

/// `amr` values that denote a second factor.
const MULTI_FACTOR_AMR_VALUES: [&str; 6] = ["mfa", "sms", "otp", "totp", "hwk", "fido"];

/// Which verified identities may use the application.
#[derive(Clone)]
pub enum AuthorizationPolicy {
    /// Any email in the allow-list (one undeletable base admin plus others).
    AllowList(Arc<dyn AllowListRepository>),
    /// Exactly one normalized email.
    SinglePrincipal(String),
}

impl AuthorizationPolicy {
    pub fn single_principal(email: &str) -> Self {
        AuthorizationPolicy::SinglePrincipal(normalize_email(email))
    }

    /// Does `email` satisfy the policy?
    pub fn permits_email(&self, email: &str) -> StoreResult<bool> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(false);
        }
        match self {
            AuthorizationPolicy::AllowList(repo) => repo.is_allowed(&email),
            AuthorizationPolicy::SinglePrincipal(allowed) => Ok(*allowed == email),
        }
    }

    /// Predicate form for request guards. Store errors deny.
    pub fn admits(&self, identity: &Identity) -> bool {
        match self.permits_email(&identity.email) {
            Ok(permitted) => permitted,
            Err(e) => {
                warn!(error = %e, identity = %identity.id, "Policy check failed, denying");
                false
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthorizationPolicy::AllowList(_) => "allow_list",
            AuthorizationPolicy::SinglePrincipal(_) => "single_principal",
        }
    }
}

impl std::fmt::Debug for AuthorizationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorizationPolicy::AllowList(_) => f.write_str("AllowList"),
            AuthorizationPolicy::SinglePrincipal(email) => {
                f.debug_tuple("SinglePrincipal").field(email).finish()
            }
        }
    }
}

/// Whether a login carries enough second-factor evidence.
pub trait SecondFactorPolicy: Send + Sync {
    fn is_satisfied(&self, claims: &IdTokenClaims, now: DateTime<Utc>) -> bool;
}

/// Accepts every login.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotRequired;

impl SecondFactorPolicy for NotRequired {
    fn is_satisfied(&self, _claims: &IdTokenClaims, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Infers a second factor from claim shape or authentication recency.
#[derive(Debug, Clone, Copy)]
pub struct MultiFactorHeuristic {
    max_age: Duration,
}

impl MultiFactorHeuristic {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl Default for MultiFactorHeuristic {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_SECOND_FACTOR_MAX_AGE_SECS))
    }
}

impl SecondFactorPolicy for MultiFactorHeuristic {
    fn is_satisfied(&self, claims: &IdTokenClaims, now: DateTime<Utc>) -> bool {
        if let Some(acr) = claims.acr.as_deref() {
            if MULTI_FACTOR_ACR_VALUES.contains(&acr) {
                debug!(acr, "Second factor indicated by acr");
                return true;
            }
        }

        if claims
            .amr
            .iter()
            .any(|m| MULTI_FACTOR_AMR_VALUES.contains(&m.as_str()))
        {
            debug!(amr = ?claims.amr, "Second factor indicated by amr");
            return true;
        }

        if claims.amr.len() > 1 {
            debug!(amr = ?claims.amr, "Multiple authentication methods reported");
            return true;
        }

        match claims.authenticated_at() {
            Some(at) if now - at <= self.max_age && at <= now + Duration::seconds(60) => {
                warn!(
                    sub = %claims.sub,
                    age_secs = (now - at).num_seconds(),
                    "No explicit second-factor claim; accepting recent authentication"
                );
                true
            }
            _ => false,
        }
    }
}
