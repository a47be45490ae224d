// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistence Collaborators
//!
//! The authentication core never talks to a storage engine directly. It
//! depends on the repository traits below, which any key-value or relational
//! backend can satisfy with put/get/delete-by-key plus one secondary index
//! (sessions by owning identity).
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local maps, used in tests and when `DATA_DIR`
//!   is unset
//! - [`RedbStore`]: embedded ACID database (redb), one file under `DATA_DIR`
//!
//! ## Atomicity
//!
//! [`ChallengeRepository::take_challenge`] is the only operation that must be
//! stronger than read-then-write: it removes the record and returns it in one
//! step, so two concurrent callers can never both receive the same challenge.
//! Everything else tolerates last-writer-wins.

pub mod memory;
pub mod redb_store;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AllowedEmail, AuthorizationChallenge, Identity, Session};

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("protected entry: {0}")]
    Protected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Repository Traits
// =============================================================================

/// Storage for single-use login challenges.
pub trait ChallengeRepository: Send + Sync {
    fn put_challenge(&self, challenge: &AuthorizationChallenge) -> StoreResult<()>;

    /// Remove the challenge keyed by `state` and return it, if present.
    ///
    /// Must be atomic: of two concurrent calls with the same `state`, at most
    /// one returns `Some`.
    fn take_challenge(&self, state: &str) -> StoreResult<Option<AuthorizationChallenge>>;

    /// Delete every challenge with `expires_at <= now`. Returns the count.
    fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Storage for sessions, indexed by token and by owning identity.
pub trait SessionRepository: Send + Sync {
    /// Insert a new session. Fails with [`StoreError::Conflict`] if the token
    /// is already in use.
    fn insert_session(&self, session: &Session) -> StoreResult<()>;

    fn get_session(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Set `last_activity_at`. Returns `false` if the session no longer exists.
    fn touch_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Set `expires_at` and `last_activity_at`. Returns `false` if the session
    /// no longer exists.
    fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Delete a session. Returns whether a record was removed.
    fn delete_session(&self, token: &str) -> StoreResult<bool>;

    fn sessions_for_identity(&self, identity_id: &str) -> StoreResult<Vec<Session>>;

    /// Delete every session with `expires_at <= now`. Returns the count.
    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Storage for verified identities.
pub trait IdentityRepository: Send + Sync {
    /// Insert or update by `identity.id`. An existing record keeps its
    /// `created_at`; everything else is overwritten. Returns the stored record.
    fn upsert_identity(&self, identity: &Identity) -> StoreResult<Identity>;

    fn get_identity(&self, id: &str) -> StoreResult<Option<Identity>>;

    fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;
}

/// Storage for the admin allow-list. Emails are normalized on the way in.
pub trait AllowListRepository: Send + Sync {
    fn is_allowed(&self, email: &str) -> StoreResult<bool>;

    /// Base admin first, then oldest first.
    fn list_allowed(&self) -> StoreResult<Vec<AllowedEmail>>;

    /// Add an email. Fails with [`StoreError::Conflict`] on duplicates.
    fn add_allowed(&self, email: &str, now: DateTime<Utc>) -> StoreResult<AllowedEmail>;

    /// Remove by id. Fails with [`StoreError::NotFound`] when absent and
    /// [`StoreError::Protected`] for the base admin entry.
    fn remove_allowed(&self, id: Uuid) -> StoreResult<AllowedEmail>;

    /// Make `email` the one base admin entry. Idempotent. A previous base
    /// admin with another email stays allowed but loses its protection, so
    /// the list never holds two undeletable entries. An empty email is
    /// ignored.
    fn ensure_base_admin(&self, email: &str, now: DateTime<Utc>) -> StoreResult<()>;
}

/// Liveness probe for the backing store, used by readiness checks.
pub trait StoreHealth: Send + Sync {
    fn check(&self) -> StoreResult<()>;
}

/// Everything the server needs from one backend.
pub trait AuthStore:
    ChallengeRepository + SessionRepository + IdentityRepository + AllowListRepository + StoreHealth
{
}

impl<T> AuthStore for T where
    T: ChallengeRepository
        + SessionRepository
        + IdentityRepository
        + AllowListRepository
        + StoreHealth
{
}

/// Sort order shared by both backends for [`AllowListRepository::list_allowed`].
pub(crate) fn sort_allowed(entries: &mut [AllowedEmail]) {
    entries.sort_by(|a, b| {
        b.is_base_admin
            .cmp(&a.is_base_admin)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.email.cmp(&b.email))
    });
}

/// Behaviour every backend must share. Each backend's tests run these
/// against a fresh instance.
#[cfg(test)]
pub(crate) mod conformance {
    use std::sync::{Arc, Barrier};

    use chrono::{Duration, Utc};

    use super::*;

    fn challenge(state: &str, ttl: Duration) -> AuthorizationChallenge {
        let now = Utc::now();
        AuthorizationChallenge {
            state: state.to_string(),
            verifier: Some(format!("verifier-{state}")),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn session(token: &str, identity_id: &str, ttl: Duration) -> Session {
        let now = Utc::now();
        Session {
            token: token.to_string(),
            identity_id: identity_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
            last_activity_at: now,
        }
    }

    fn identity(id: &str, email: &str, name: &str) -> Identity {
        let now = Utc::now();
        Identity {
            id: id.to_string(),
            subject: id.to_string(),
            email: email.to_string(),
            display_name: Some(name.to_string()),
            picture: None,
            email_verified: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn challenge_take_is_single_use(store: &impl ChallengeRepository) {
        let c = challenge("state-1", Duration::minutes(5));
        store.put_challenge(&c).unwrap();

        let taken = store.take_challenge("state-1").unwrap();
        assert_eq!(taken, Some(c));
        assert_eq!(store.take_challenge("state-1").unwrap(), None);
        assert_eq!(store.take_challenge("never-issued").unwrap(), None);
    }

    pub fn challenge_purge(store: &impl ChallengeRepository) {
        store
            .put_challenge(&challenge("stale", Duration::seconds(-1)))
            .unwrap();
        store
            .put_challenge(&challenge("fresh", Duration::minutes(5)))
            .unwrap();

        assert_eq!(store.purge_expired_challenges(Utc::now()).unwrap(), 1);
        assert!(store.take_challenge("stale").unwrap().is_none());
        assert!(store.take_challenge("fresh").unwrap().is_some());
    }

    pub fn session_lifecycle(store: &impl SessionRepository) {
        let s = session("tok-1", "user-1", Duration::hours(24));
        store.insert_session(&s).unwrap();
        assert!(matches!(
            store.insert_session(&s),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.get_session("tok-1").unwrap(), Some(s.clone()));

        let later = s.created_at + Duration::minutes(10);
        assert!(store.touch_session("tok-1", later).unwrap());
        let touched = store.get_session("tok-1").unwrap().unwrap();
        assert_eq!(touched.last_activity_at, later);
        assert_eq!(touched.expires_at, s.expires_at);

        let extended_to = s.expires_at + Duration::hours(1);
        assert!(store.extend_session("tok-1", extended_to, later).unwrap());
        assert_eq!(
            store.get_session("tok-1").unwrap().unwrap().expires_at,
            extended_to
        );

        assert!(store.delete_session("tok-1").unwrap());
        assert!(!store.delete_session("tok-1").unwrap());
        assert!(!store.touch_session("tok-1", later).unwrap());
        assert!(!store.extend_session("tok-1", extended_to, later).unwrap());
        assert!(store.get_session("tok-1").unwrap().is_none());
    }

    pub fn session_owner_index(store: &impl SessionRepository) {
        store
            .insert_session(&session("a1", "alice", Duration::hours(1)))
            .unwrap();
        store
            .insert_session(&session("a2", "alice", Duration::hours(1)))
            .unwrap();
        store
            .insert_session(&session("b1", "alice-b", Duration::hours(1)))
            .unwrap();
        store
            .insert_session(&session("old", "alice", Duration::seconds(-1)))
            .unwrap();

        let mut tokens: Vec<String> = store
            .sessions_for_identity("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["a1", "a2", "old"]);

        assert_eq!(store.purge_expired_sessions(Utc::now()).unwrap(), 1);
        assert_eq!(store.sessions_for_identity("alice").unwrap().len(), 2);

        store.delete_session("a1").unwrap();
        let remaining = store.sessions_for_identity("alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, "a2");
        assert_eq!(store.sessions_for_identity("alice-b").unwrap().len(), 1);
    }

    pub fn identity_upsert(store: &impl IdentityRepository) {
        let first = identity("sub-1", "ada@example.com", "Ada");
        let stored = store.upsert_identity(&first).unwrap();
        assert_eq!(stored, first);

        let mut second = identity("sub-1", "ada@example.com", "Ada Lovelace");
        second.created_at = first.created_at + Duration::days(3);
        second.updated_at = second.created_at;
        let stored = store.upsert_identity(&second).unwrap();
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.display_name.as_deref(), Some("Ada Lovelace"));

        assert_eq!(store.get_identity("sub-1").unwrap(), Some(stored.clone()));
        assert_eq!(
            store.find_identity_by_email("ADA@example.com").unwrap(),
            Some(stored)
        );
        assert!(store.get_identity("sub-2").unwrap().is_none());
    }

    pub fn allow_list(store: &impl AllowListRepository) {
        let now = Utc::now();
        store.ensure_base_admin("", now).unwrap();
        assert!(store.list_allowed().unwrap().is_empty());

        store.ensure_base_admin(" Root@Example.com", now).unwrap();
        store.ensure_base_admin("root@example.com", now).unwrap();
        let added = store
            .add_allowed("Editor@Example.com", now + Duration::seconds(1))
            .unwrap();
        assert_eq!(added.email, "editor@example.com");
        assert!(matches!(
            store.add_allowed("editor@example.com", now),
            Err(StoreError::Conflict(_))
        ));

        assert!(store.is_allowed("EDITOR@example.com").unwrap());
        assert!(store.is_allowed("root@example.com").unwrap());
        assert!(!store.is_allowed("stranger@example.com").unwrap());

        let listed = store.list_allowed().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_base_admin);
        assert_eq!(listed[0].email, "root@example.com");

        assert!(matches!(
            store.remove_allowed(listed[0].id),
            Err(StoreError::Protected(_))
        ));
        assert!(matches!(
            store.remove_allowed(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        let removed = store.remove_allowed(added.id).unwrap();
        assert_eq!(removed.email, "editor@example.com");
        assert!(!store.is_allowed("editor@example.com").unwrap());

        // An existing ordinary entry is promoted rather than duplicated.
        let promoted = store.add_allowed("owner@example.com", now).unwrap();
        store.ensure_base_admin("owner@example.com", now).unwrap();
        assert!(matches!(
            store.remove_allowed(promoted.id),
            Err(StoreError::Protected(_))
        ));
        assert_eq!(base_admins(store), vec!["owner@example.com"]);
    }

    pub fn base_admins(store: &impl AllowListRepository) -> Vec<String> {
        store
            .list_allowed()
            .unwrap()
            .into_iter()
            .filter(|e| e.is_base_admin)
            .map(|e| e.email)
            .collect()
    }

    pub fn base_admin_rotation(store: &impl AllowListRepository) {
        let now = Utc::now();
        store.ensure_base_admin("old@example.com", now).unwrap();
        store.ensure_base_admin("new@example.com", now).unwrap();

        assert_eq!(base_admins(store), vec!["new@example.com"]);
        let listed = store.list_allowed().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].email, "new@example.com");

        let old = listed
            .iter()
            .find(|e| e.email == "old@example.com")
            .unwrap()
            .clone();
        assert!(store.is_allowed("old@example.com").unwrap());
        assert_eq!(store.remove_allowed(old.id).unwrap().email, "old@example.com");
        assert!(matches!(
            store.remove_allowed(listed[0].id),
            Err(StoreError::Protected(_))
        ));
    }

    /// Races `threads` callers on one challenge, `rounds` times. Exactly one
    /// caller per round may receive it.
    pub fn concurrent_take_is_single_use<S>(store: Arc<S>, rounds: usize, threads: usize)
    where
        S: ChallengeRepository + 'static,
    {
        for round in 0..rounds {
            let state = format!("race-{round}");
            store
                .put_challenge(&challenge(&state, Duration::minutes(5)))
                .unwrap();

            let barrier = Arc::new(Barrier::new(threads));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    let state = state.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.take_challenge(&state).unwrap().is_some()
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "round {round}");
        }
    }
}
