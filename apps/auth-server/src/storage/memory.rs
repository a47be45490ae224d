// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-local store backed by `HashMap`s.
//!
//! Each record kind lives behind its own lock. `take_challenge` is a single
//! `HashMap::remove` under the write lock, which gives the required
//! at-most-once consumption.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    sort_allowed, AllowListRepository, ChallengeRepository, IdentityRepository, SessionRepository,
    StoreError, StoreHealth, StoreResult,
};
use crate::models::{normalize_email, AllowedEmail, AuthorizationChallenge, Identity, Session};

#[derive(Debug, Default)]
pub struct MemoryStore {
    challenges: RwLock<HashMap<String, AuthorizationChallenge>>,
    sessions: RwLock<HashMap<String, Session>>,
    identities: RwLock<HashMap<String, Identity>>,
    allowed: RwLock<HashMap<String, AllowedEmail>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> StoreResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| StoreError::Poisoned(name))
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> StoreResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| StoreError::Poisoned(name))
}

impl ChallengeRepository for MemoryStore {
    fn put_challenge(&self, challenge: &AuthorizationChallenge) -> StoreResult<()> {
        write(&self.challenges, "challenges")?.insert(challenge.state.clone(), challenge.clone());
        Ok(())
    }

    fn take_challenge(&self, state: &str) -> StoreResult<Option<AuthorizationChallenge>> {
        Ok(write(&self.challenges, "challenges")?.remove(state))
    }

    fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut challenges = write(&self.challenges, "challenges")?;
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired_at(now));
        Ok(before - challenges.len())
    }
}

impl SessionRepository for MemoryStore {
    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = write(&self.sessions, "sessions")?;
        if sessions.contains_key(&session.token) {
            return Err(StoreError::Conflict("session token".to_string()));
        }
        sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    fn get_session(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(read(&self.sessions, "sessions")?.get(token).cloned())
    }

    fn touch_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut sessions = write(&self.sessions, "sessions")?;
        match sessions.get_mut(token) {
            Some(session) => {
                session.last_activity_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut sessions = write(&self.sessions, "sessions")?;
        match sessions.get_mut(token) {
            Some(session) => {
                session.expires_at = expires_at;
                session.last_activity_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_session(&self, token: &str) -> StoreResult<bool> {
        Ok(write(&self.sessions, "sessions")?.remove(token).is_some())
    }

    fn sessions_for_identity(&self, identity_id: &str) -> StoreResult<Vec<Session>> {
        let sessions = read(&self.sessions, "sessions")?;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.identity_id == identity_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut sessions = write(&self.sessions, "sessions")?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok(before - sessions.len())
    }
}

impl IdentityRepository for MemoryStore {
    fn upsert_identity(&self, identity: &Identity) -> StoreResult<Identity> {
        let mut identities = write(&self.identities, "identities")?;
        let mut stored = identity.clone();
        stored.email = normalize_email(&identity.email);
        if let Some(existing) = identities.get(&identity.id) {
            stored.created_at = existing.created_at;
        }
        identities.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn get_identity(&self, id: &str) -> StoreResult<Option<Identity>> {
        Ok(read(&self.identities, "identities")?.get(id).cloned())
    }

    fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let email = normalize_email(email);
        Ok(read(&self.identities, "identities")?
            .values()
            .find(|i| i.email == email)
            .cloned())
    }
}

impl AllowListRepository for MemoryStore {
    fn is_allowed(&self, email: &str) -> StoreResult<bool> {
        Ok(read(&self.allowed, "allowed")?.contains_key(&normalize_email(email)))
    }

    fn list_allowed(&self) -> StoreResult<Vec<AllowedEmail>> {
        let mut entries: Vec<AllowedEmail> =
            read(&self.allowed, "allowed")?.values().cloned().collect();
        sort_allowed(&mut entries);
        Ok(entries)
    }

    fn add_allowed(&self, email: &str, now: DateTime<Utc>) -> StoreResult<AllowedEmail> {
        let email = normalize_email(email);
        let mut allowed = write(&self.allowed, "allowed")?;
        if allowed.contains_key(&email) {
            return Err(StoreError::Conflict(email));
        }
        let entry = AllowedEmail {
            id: Uuid::new_v4(),
            email: email.clone(),
            is_base_admin: false,
            created_at: now,
        };
        allowed.insert(email, entry.clone());
        Ok(entry)
    }

    fn remove_allowed(&self, id: Uuid) -> StoreResult<AllowedEmail> {
        let mut allowed = write(&self.allowed, "allowed")?;
        let email = allowed
            .values()
            .find(|e| e.id == id)
            .map(|e| (e.email.clone(), e.is_base_admin));
        match email {
            None => Err(StoreError::NotFound(format!("allowed email {id}"))),
            Some((email, true)) => Err(StoreError::Protected(email)),
            Some((email, false)) => allowed
                .remove(&email)
                .ok_or_else(|| StoreError::NotFound(format!("allowed email {id}"))),
        }
    }

    fn ensure_base_admin(&self, email: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(());
        }
        let mut allowed = write(&self.allowed, "allowed")?;
        for entry in allowed.values_mut() {
            if entry.is_base_admin && entry.email != email {
                entry.is_base_admin = false;
            }
        }
        allowed
            .entry(email.clone())
            .and_modify(|e| e.is_base_admin = true)
            .or_insert_with(|| AllowedEmail {
                id: Uuid::new_v4(),
                email,
                is_base_admin: true,
                created_at: now,
            });
        Ok(())
    }
}

impl StoreHealth for MemoryStore {
    fn check(&self) -> StoreResult<()> {
        read(&self.sessions, "sessions").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::conformance;

    #[test]
    fn challenges_are_taken_once() {
        conformance::challenge_take_is_single_use(&MemoryStore::new());
    }

    #[test]
    fn expired_challenges_are_purged() {
        conformance::challenge_purge(&MemoryStore::new());
    }

    #[test]
    fn concurrent_takes_hand_out_a_challenge_once() {
        conformance::concurrent_take_is_single_use(Arc::new(MemoryStore::new()), 50, 4);
    }

    #[test]
    fn base_admin_rotation_keeps_one_protected_entry() {
        conformance::base_admin_rotation(&MemoryStore::new());
    }

    #[test]
    fn session_lifecycle() {
        conformance::session_lifecycle(&MemoryStore::new());
    }

    #[test]
    fn session_owner_index() {
        conformance::session_owner_index(&MemoryStore::new());
    }

    #[test]
    fn identity_upsert_keeps_created_at() {
        conformance::identity_upsert(&MemoryStore::new());
    }

    #[test]
    fn allow_list_rules() {
        conformance::allow_list(&MemoryStore::new());
    }
}
