// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Manager
//!
//! Owns the session lifecycle: create, validate, refresh, revoke,
//! revoke-all and expiry sweep.
//!
//! ## Expiry
//!
//! A session is valid iff `now < expires_at`. Plain validation only touches
//! `last_activity_at`; `expires_at` moves only on an explicit [`refresh`].
//! Expired sessions are deleted when read and by the periodic sweep.
//!
//! ## Absence
//!
//! An unknown token is a normal outcome ([`SessionStatus::Invalid`]), not an
//! error. Errors are reserved for storage failures.
//!
//! [`refresh`]: SessionManager::refresh

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::claims::AuthenticatedUser;
use super::error::{AuthError, UnauthenticatedReason};
use super::token::{random_token, redact};
use crate::clock::Clock;
use crate::models::{Identity, Session};
use crate::storage::{IdentityRepository, SessionRepository, StoreError};

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Token collisions are astronomically unlikely; this only bounds the loop.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Why a presented token is not a valid session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotFound,
    Expired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::NotFound => "not found",
            InvalidReason::Expired => "expired",
        }
    }
}

impl From<InvalidReason> for UnauthenticatedReason {
    fn from(reason: InvalidReason) -> Self {
        match reason {
            InvalidReason::NotFound => UnauthenticatedReason::Invalid,
            InvalidReason::Expired => UnauthenticatedReason::Expired,
        }
    }
}

/// Outcome of [`SessionManager::validate`].
#[derive(Debug, Clone)]
pub enum SessionStatus {
    Active(AuthenticatedUser),
    Invalid(InvalidReason),
}

impl SessionStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionStatus::Active(_))
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            SessionStatus::Active(user) => Some(user),
            SessionStatus::Invalid(_) => None,
        }
    }

    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            SessionStatus::Active(_) => None,
            SessionStatus::Invalid(reason) => Some(*reason),
        }
    }
}

/// Result of a best-effort bulk revoke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevokeSummary {
    pub revoked: usize,
    pub failed: usize,
}

pub struct SessionManager {
    sessions: Arc<dyn SessionRepository>,
    identities: Arc<dyn IdentityRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        identities: Arc<dyn IdentityRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            identities,
            clock,
            ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        now.checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Internal(format!("session ttl {} out of range", self.ttl)))
    }

    /// Mint and persist a new session for `identity`.
    pub fn create(&self, identity: &Identity) -> Result<Session, AuthError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let now = self.clock.now();
            let session = Session {
                token: random_token()?,
                identity_id: identity.id.clone(),
                created_at: now,
                expires_at: self.expiry_from(now)?,
                last_activity_at: now,
            };

            match self.sessions.insert_session(&session) {
                Ok(()) => {
                    info!(
                        identity = %identity.id,
                        session = redact(&session.token),
                        expires_at = %session.expires_at,
                        "Session created"
                    );
                    return Ok(session);
                }
                Err(StoreError::Conflict(_)) => {
                    warn!("Session token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::Internal(
            "could not allocate a unique session token".to_string(),
        ))
    }

    /// Resolve `token` to its identity.
    ///
    /// Expired sessions are deleted. The `last_activity_at` update is
    /// best-effort and never fails the validation.
    pub fn validate(&self, token: &str) -> Result<SessionStatus, AuthError> {
        if token.is_empty() {
            return Ok(SessionStatus::Invalid(InvalidReason::NotFound));
        }

        let Some(mut session) = self.sessions.get_session(token)? else {
            return Ok(SessionStatus::Invalid(InvalidReason::NotFound));
        };

        let now = self.clock.now();
        if session.is_expired_at(now) {
            self.discard(token, "expired");
            return Ok(SessionStatus::Invalid(InvalidReason::Expired));
        }

        let Some(identity) = self.identities.get_identity(&session.identity_id)? else {
            warn!(
                identity = %session.identity_id,
                session = redact(token),
                "Session refers to a missing identity"
            );
            self.discard(token, "orphaned");
            return Ok(SessionStatus::Invalid(InvalidReason::NotFound));
        };

        match self.sessions.touch_session(token, now) {
            Ok(_) => session.last_activity_at = now,
            Err(e) => debug!(session = redact(token), error = %e, "Failed to record activity"),
        }

        Ok(SessionStatus::Active(AuthenticatedUser { identity, session }))
    }

    /// Extend a live session to `now + ttl`.
    pub fn refresh(&self, token: &str) -> Result<Session, AuthError> {
        let Some(mut session) = self.sessions.get_session(token)? else {
            return Err(AuthError::Unauthenticated(UnauthenticatedReason::Invalid));
        };

        let now = self.clock.now();
        if session.is_expired_at(now) {
            self.discard(token, "expired");
            return Err(AuthError::Unauthenticated(UnauthenticatedReason::Expired));
        }

        let expires_at = self.expiry_from(now)?;
        if !self.sessions.extend_session(token, expires_at, now)? {
            return Err(AuthError::Unauthenticated(UnauthenticatedReason::Invalid));
        }

        session.expires_at = expires_at;
        session.last_activity_at = now;
        debug!(session = redact(token), expires_at = %expires_at, "Session refreshed");
        Ok(session)
    }

    /// Delete one session. Absent tokens are fine.
    pub fn revoke(&self, token: &str) -> Result<(), AuthError> {
        if token.is_empty() {
            return Ok(());
        }
        if self.sessions.delete_session(token)? {
            info!(session = redact(token), "Session revoked");
        }
        Ok(())
    }

    /// Delete every session of `identity_id`. Individual failures are logged
    /// and counted; the remaining sessions are still deleted.
    pub fn revoke_all(&self, identity_id: &str) -> Result<RevokeSummary, AuthError> {
        let sessions = self.sessions.sessions_for_identity(identity_id)?;
        let mut summary = RevokeSummary::default();

        for session in &sessions {
            match self.sessions.delete_session(&session.token) {
                Ok(_) => summary.revoked += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        identity = %identity_id,
                        session = redact(&session.token),
                        error = %e,
                        "Failed to revoke session"
                    );
                }
            }
        }

        info!(
            identity = %identity_id,
            revoked = summary.revoked,
            failed = summary.failed,
            "Revoked all sessions"
        );
        Ok(summary)
    }

    /// Non-expired sessions of `identity_id`, oldest first.
    pub fn active_sessions(&self, identity_id: &str) -> Result<Vec<Session>, AuthError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.sessions_for_identity(identity_id)?;
        sessions.retain(|s| !s.is_expired_at(now));
        Ok(sessions)
    }

    /// Remove every expired session.
    pub fn sweep_expired(&self) -> Result<usize, AuthError> {
        let purged = self.sessions.purge_expired_sessions(self.clock.now())?;
        if purged > 0 {
            info!(count = purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    fn discard(&self, token: &str, why: &'static str) {
        if let Err(e) = self.sessions.delete_session(token) {
            warn!(session = redact(token), reason = why, error = %e, "Failed to delete session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use crate::clock::ManualClock;
    use crate::storage::{MemoryStore, StoreResult};

    fn identity(id: &str) -> Identity {
        let now = Utc::now();
        Identity {
            id: id.to_string(),
            subject: id.to_string(),
            email: format!("{id}@example.com"),
            display_name: None,
            picture: None,
            email_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn manager() -> (Arc<ManualClock>, Arc<MemoryStore>, SessionManager) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        store.upsert_identity(&identity("ada")).unwrap();
        store.upsert_identity(&identity("bob")).unwrap();
        let manager = SessionManager::new(store.clone(), store.clone(), clock.clone());
        (clock, store, manager)
    }

    #[test]
    fn oversized_ttl_fails_instead_of_overflowing() {
        let (_, store, manager) = manager();
        let manager = manager.with_ttl(Duration::seconds(10_000_000_000_000));

        assert!(matches!(
            manager.create(&identity("ada")),
            Err(AuthError::Internal(_))
        ));
        assert!(store.sessions_for_identity("ada").unwrap().is_empty());
    }

    #[test]
    fn new_session_validates_immediately() {
        let (_, _, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        assert!(session.expires_at > session.created_at);
        assert_eq!(session.expires_at - session.created_at, Duration::hours(24));

        let status = manager.validate(&session.token).unwrap();
        assert!(status.is_valid());
        assert_eq!(status.user().unwrap().identity_id(), "ada");
    }

    #[test]
    fn session_expires_after_ttl_and_is_deleted() {
        let (clock, store, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        clock.advance(Duration::hours(25));
        let status = manager.validate(&session.token).unwrap();
        assert_eq!(status.reason(), Some(InvalidReason::Expired));
        assert_eq!(status.reason().unwrap().as_str(), "expired");
        assert!(store.get_session(&session.token).unwrap().is_none());

        // Once gone it reads as unknown.
        let status = manager.validate(&session.token).unwrap();
        assert_eq!(status.reason(), Some(InvalidReason::NotFound));
    }

    #[test]
    fn never_valid_at_or_after_expiry() {
        let (clock, _, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        clock.set(session.expires_at - Duration::milliseconds(1));
        assert!(manager.validate(&session.token).unwrap().is_valid());

        clock.set(session.expires_at);
        assert!(!manager.validate(&session.token).unwrap().is_valid());
    }

    #[test]
    fn validate_touches_activity_but_not_expiry() {
        let (clock, store, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        clock.advance(Duration::hours(3));
        let status = manager.validate(&session.token).unwrap();
        let user = status.user().unwrap();
        assert_eq!(user.session.last_activity_at, clock.now());
        assert_eq!(user.session.expires_at, session.expires_at);

        let stored = store.get_session(&session.token).unwrap().unwrap();
        assert_eq!(stored.last_activity_at, clock.now());
        assert_eq!(stored.expires_at, session.expires_at);
    }

    #[test]
    fn unknown_token_is_not_found() {
        let (_, _, manager) = manager();
        let status = manager.validate("no-such-token").unwrap();
        assert_eq!(status.reason(), Some(InvalidReason::NotFound));
        assert_eq!(
            manager.validate("").unwrap().reason(),
            Some(InvalidReason::NotFound)
        );
    }

    #[test]
    fn session_of_deleted_identity_is_not_found() {
        let (_, store, manager) = manager();
        let session = manager.create(&identity("ghost")).unwrap();
        let status = manager.validate(&session.token).unwrap();
        assert_eq!(status.reason(), Some(InvalidReason::NotFound));
        assert!(store.get_session(&session.token).unwrap().is_none());
    }

    #[test]
    fn refresh_extends_expiry() {
        let (clock, _, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        clock.advance(Duration::hours(20));
        let refreshed = manager.refresh(&session.token).unwrap();
        assert_eq!(refreshed.expires_at, clock.now() + Duration::hours(24));

        clock.advance(Duration::hours(10));
        assert!(manager.validate(&session.token).unwrap().is_valid());
    }

    #[test]
    fn refresh_of_expired_session_fails() {
        let (clock, _, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        clock.advance(Duration::hours(24));
        assert!(matches!(
            manager.refresh(&session.token),
            Err(AuthError::Unauthenticated(UnauthenticatedReason::Expired))
        ));
        assert!(matches!(
            manager.refresh(&session.token),
            Err(AuthError::Unauthenticated(UnauthenticatedReason::Invalid))
        ));
    }

    #[test]
    fn revoke_is_idempotent() {
        let (_, _, manager) = manager();
        let session = manager.create(&identity("ada")).unwrap();

        manager.revoke(&session.token).unwrap();
        manager.revoke(&session.token).unwrap();
        manager.revoke("never-existed").unwrap();
        assert!(!manager.validate(&session.token).unwrap().is_valid());
    }

    #[test]
    fn revoke_all_only_touches_one_identity() {
        let (_, _, manager) = manager();
        let a1 = manager.create(&identity("ada")).unwrap();
        let a2 = manager.create(&identity("ada")).unwrap();
        let b1 = manager.create(&identity("bob")).unwrap();

        let summary = manager.revoke_all("ada").unwrap();
        assert_eq!(summary, RevokeSummary { revoked: 2, failed: 0 });
        assert!(!manager.validate(&a1.token).unwrap().is_valid());
        assert!(!manager.validate(&a2.token).unwrap().is_valid());
        assert!(manager.validate(&b1.token).unwrap().is_valid());
        assert_eq!(manager.active_sessions("ada").unwrap().len(), 0);
    }

    #[test]
    fn sweep_and_active_sessions_ignore_expired() {
        let (clock, _, manager) = manager();
        let old = manager.create(&identity("ada")).unwrap();
        clock.advance(Duration::hours(12));
        let fresh = manager.create(&identity("ada")).unwrap();
        clock.advance(Duration::hours(13));

        let active = manager.active_sessions("ada").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, fresh.token);

        assert_eq!(manager.sweep_expired().unwrap(), 1);
        assert_eq!(manager.validate(&old.token).unwrap().reason(), Some(InvalidReason::NotFound));
    }

    /// Session repository that fails selected writes.
    struct Flaky {
        inner: MemoryStore,
        fail_touch: bool,
        fail_delete: Mutex<HashSet<String>>,
    }

    impl SessionRepository for Flaky {
        fn insert_session(&self, session: &Session) -> StoreResult<()> {
            self.inner.insert_session(session)
        }
        fn get_session(&self, token: &str) -> StoreResult<Option<Session>> {
            self.inner.get_session(token)
        }
        fn touch_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<bool> {
            if self.fail_touch {
                return Err(StoreError::Poisoned("sessions"));
            }
            self.inner.touch_session(token, at)
        }
        fn extend_session(
            &self,
            token: &str,
            expires_at: DateTime<Utc>,
            at: DateTime<Utc>,
        ) -> StoreResult<bool> {
            self.inner.extend_session(token, expires_at, at)
        }
        fn delete_session(&self, token: &str) -> StoreResult<bool> {
            if self.fail_delete.lock().unwrap().contains(token) {
                return Err(StoreError::Poisoned("sessions"));
            }
            self.inner.delete_session(token)
        }
        fn sessions_for_identity(&self, identity_id: &str) -> StoreResult<Vec<Session>> {
            self.inner.sessions_for_identity(identity_id)
        }
        fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
            self.inner.purge_expired_sessions(now)
        }
    }

    fn flaky_manager(fail_touch: bool) -> (Arc<Flaky>, SessionManager) {
        let identities = Arc::new(MemoryStore::new());
        identities.upsert_identity(&identity("ada")).unwrap();
        let flaky = Arc::new(Flaky {
            inner: MemoryStore::new(),
            fail_touch,
            fail_delete: Mutex::new(HashSet::new()),
        });
        let manager = SessionManager::new(
            flaky.clone(),
            identities,
            Arc::new(ManualClock::default()),
        );
        (flaky, manager)
    }

    #[test]
    fn failed_touch_does_not_fail_validation() {
        let (_, manager) = flaky_manager(true);
        let session = manager.create(&identity("ada")).unwrap();
        assert!(manager.validate(&session.token).unwrap().is_valid());
    }

    #[test]
    fn revoke_all_continues_past_failures() {
        let (flaky, manager) = flaky_manager(false);
        let s1 = manager.create(&identity("ada")).unwrap();
        let s2 = manager.create(&identity("ada")).unwrap();
        let s3 = manager.create(&identity("ada")).unwrap();
        flaky.fail_delete.lock().unwrap().insert(s2.token.clone());

        let summary = manager.revoke_all("ada").unwrap();
        assert_eq!(summary, RevokeSummary { revoked: 2, failed: 1 });
        assert!(flaky.get_session(&s1.token).unwrap().is_none());
        assert!(flaky.get_session(&s2.token).unwrap().is_some());
        assert!(flaky.get_session(&s3.token).unwrap().is_none());
    }
}
