// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Challenge Store
//!
//! Issues and consumes the single-use `state` (plus optional PKCE verifier)
//! that ties a provider callback to the login attempt that started it.
//!
//! Consumption is one atomic take against the repository followed by the
//! expiry check, so a replayed or raced `state` can succeed at most once.
//! An expired record is removed by the same take.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::error::AuthError;
use super::token::{pkce_challenge, random_token, redact};
use crate::clock::Clock;
use crate::models::AuthorizationChallenge;
use crate::storage::ChallengeRepository;

/// Default lifetime of a login challenge.
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 300;

/// Result of [`ChallengeStore::issue`].
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub state: String,
    /// Server-side only.
    pub verifier: Option<String>,
    /// S256 challenge derived from `verifier`, safe to send to the provider.
    pub code_challenge: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct ChallengeStore {
    repo: Arc<dyn ChallengeRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    pkce: bool,
}

impl ChallengeStore {
    /// Store with the default TTL and PKCE enabled.
    pub fn new(repo: Arc<dyn ChallengeRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            ttl: Duration::seconds(DEFAULT_CHALLENGE_TTL_SECS),
            pkce: true,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.pkce = enabled;
        self
    }

    pub fn pkce_enabled(&self) -> bool {
        self.pkce
    }

    /// Generate and persist a new challenge.
    pub fn issue(&self) -> Result<IssuedChallenge, AuthError> {
        let state = random_token()?;
        let verifier = if self.pkce {
            Some(random_token()?)
        } else {
            None
        };

        let now = self.clock.now();
        let challenge = AuthorizationChallenge {
            state: state.clone(),
            verifier: verifier.clone(),
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).ok_or_else(|| {
                AuthError::Internal(format!("challenge ttl {} out of range", self.ttl))
            })?,
        };
        self.repo.put_challenge(&challenge)?;

        debug!(state = redact(&state), pkce = self.pkce, "Issued login challenge");

        Ok(IssuedChallenge {
            code_challenge: verifier.as_deref().map(pkce_challenge),
            state,
            verifier,
            expires_at: challenge.expires_at,
        })
    }

    /// Consume `state`, returning its verifier (`None` without PKCE).
    ///
    /// Unknown, already consumed and expired states all yield
    /// [`AuthError::InvalidOrExpiredChallenge`].
    pub fn consume_and_validate(&self, state: &str) -> Result<Option<String>, AuthError> {
        if state.is_empty() {
            return Err(AuthError::InvalidOrExpiredChallenge);
        }

        let challenge = match self.repo.take_challenge(state)? {
            Some(challenge) => challenge,
            None => {
                debug!(state = redact(state), "Unknown or replayed login challenge");
                return Err(AuthError::InvalidOrExpiredChallenge);
            }
        };

        if challenge.is_expired_at(self.clock.now()) {
            debug!(state = redact(state), "Expired login challenge");
            return Err(AuthError::InvalidOrExpiredChallenge);
        }

        Ok(challenge.verifier)
    }

    /// Remove never-consumed challenges past their expiry.
    pub fn sweep_expired(&self) -> Result<usize, AuthError> {
        let purged = self.repo.purge_expired_challenges(self.clock.now())?;
        if purged > 0 {
            info!(count = purged, "Purged expired login challenges");
        }
        Ok(purged)
    }
}
