// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded authentication store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `challenges`: state → serialized AuthorizationChallenge
//! - `sessions`: token → serialized Session
//! - `session_owner_index`: composite key (identity_id\0token) → token
//! - `identities`: identity_id → serialized Identity
//! - `identity_email_index`: normalized email → identity_id
//! - `allowed_emails`: normalized email → serialized AllowedEmail
//!
//! redb admits one write transaction at a time, so a remove inside a write
//! transaction is the atomic take the challenge store relies on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::{
    sort_allowed, AllowListRepository, ChallengeRepository, IdentityRepository, SessionRepository,
    StoreError, StoreHealth, StoreResult,
};
use crate::models::{normalize_email, AllowedEmail, AuthorizationChallenge, Identity, Session};

/// File name of the database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "auth.redb";

// =============================================================================
// Table Definitions
// =============================================================================

const CHALLENGES: TableDefinition<&str, &[u8]> = TableDefinition::new("challenges");

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Key format: `identity_id \0 token`, so one identity's sessions form a
/// contiguous range.
const SESSION_OWNER_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("session_owner_index");

const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

const IDENTITY_EMAIL_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("identity_email_index");

const ALLOWED_EMAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("allowed_emails");

// =============================================================================
// Index Key Helpers
// =============================================================================

fn owner_key(identity_id: &str, token: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(identity_id.len() + 1 + token.len());
    key.extend_from_slice(identity_id.as_bytes());
    key.push(0);
    key.extend_from_slice(token.as_bytes());
    key
}

/// Half-open range `[identity_id\0, identity_id\x01)` covering every session
/// of one identity.
fn owner_range(identity_id: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(identity_id.len() + 1);
    start.extend_from_slice(identity_id.as_bytes());
    let mut end = start.clone();
    start.push(0);
    end.push(1);
    (start, end)
}

// =============================================================================
// RedbStore
// =============================================================================

pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHALLENGES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(SESSION_OWNER_INDEX)?;
            let _ = write_txn.open_table(IDENTITIES)?;
            let _ = write_txn.open_table(IDENTITY_EMAIL_INDEX)?;
            let _ = write_txn.open_table(ALLOWED_EMAILS)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Opened auth database");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Open `DATABASE_FILE` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> StoreResult<Self> {
        Self::open(&data_dir.join(DATABASE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-modify-write one session. Returns `false` if it does not exist.
    fn update_session(&self, token: &str, apply: impl FnOnce(&mut Session)) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let existing = table.get(token)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => {
                    let mut session: Session = serde_json::from_slice(&bytes)?;
                    apply(&mut session);
                    let json = serde_json::to_vec(&session)?;
                    table.insert(token, json.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }
}

impl ChallengeRepository for RedbStore {
    fn put_challenge(&self, challenge: &AuthorizationChallenge) -> StoreResult<()> {
        let json = serde_json::to_vec(challenge)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHALLENGES)?;
            table.insert(challenge.state.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn take_challenge(&self, state: &str) -> StoreResult<Option<AuthorizationChallenge>> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CHALLENGES)?;
            let removed = table.remove(state)?.map(|v| v.value().to_vec());
            removed
        };
        write_txn.commit()?;

        match removed {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn purge_expired_challenges(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let purged = {
            let mut table = write_txn.open_table(CHALLENGES)?;
            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let challenge: AuthorizationChallenge = serde_json::from_slice(value.value())?;
                if challenge.is_expired_at(now) {
                    expired.push(key.value().to_string());
                }
            }
            for state in &expired {
                table.remove(state.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(purged)
    }
}

impl SessionRepository for RedbStore {
    fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_vec(session)?;
        let index_key = owner_key(&session.identity_id, &session.token);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            if table.get(session.token.as_str())?.is_some() {
                return Err(StoreError::Conflict("session token".to_string()));
            }
            table.insert(session.token.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(SESSION_OWNER_INDEX)?;
            index.insert(index_key.as_slice(), session.token.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_session(&self, token: &str) -> StoreResult<Option<Session>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(token)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn touch_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.update_session(token, |s| s.last_activity_at = at)
    }

    fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.update_session(token, |s| {
            s.expires_at = expires_at;
            s.last_activity_at = at;
        })
    }

    fn delete_session(&self, token: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let removed = table.remove(token)?.map(|v| v.value().to_vec());
            if let Some(bytes) = &removed {
                let session: Session = serde_json::from_slice(bytes)?;
                let mut index = write_txn.open_table(SESSION_OWNER_INDEX)?;
                index.remove(owner_key(&session.identity_id, token).as_slice())?;
            }
            removed
        };
        write_txn.commit()?;
        Ok(removed.is_some())
    }

    fn sessions_for_identity(&self, identity_id: &str) -> StoreResult<Vec<Session>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(SESSION_OWNER_INDEX)?;
        let table = read_txn.open_table(SESSIONS)?;

        let (start, end) = owner_range(identity_id);
        let mut sessions = Vec::new();
        for entry in index.range(start.as_slice()..end.as_slice())? {
            let entry = entry?;
            let token = entry.1.value();
            if let Some(value) = table.get(token)? {
                let session: Session = serde_json::from_slice(value.value())?;
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let purged = {
            let mut table = write_txn.open_table(SESSIONS)?;
            let mut index = write_txn.open_table(SESSION_OWNER_INDEX)?;

            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let session: Session = serde_json::from_slice(value.value())?;
                if session.is_expired_at(now) {
                    expired.push((session.token, session.identity_id));
                }
            }
            for (token, identity_id) in &expired {
                table.remove(token.as_str())?;
                index.remove(owner_key(identity_id, token).as_slice())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(purged)
    }
}

impl IdentityRepository for RedbStore {
    fn upsert_identity(&self, identity: &Identity) -> StoreResult<Identity> {
        let mut stored = identity.clone();
        stored.email = normalize_email(&identity.email);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITIES)?;
            let existing = table.get(identity.id.as_str())?.map(|v| v.value().to_vec());

            let mut emails = write_txn.open_table(IDENTITY_EMAIL_INDEX)?;
            if let Some(bytes) = existing {
                let previous: Identity = serde_json::from_slice(&bytes)?;
                stored.created_at = previous.created_at;
                if previous.email != stored.email {
                    emails.remove(previous.email.as_str())?;
                }
            }

            let json = serde_json::to_vec(&stored)?;
            table.insert(stored.id.as_str(), json.as_slice())?;
            emails.insert(stored.email.as_str(), stored.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    fn get_identity(&self, id: &str) -> StoreResult<Option<Identity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let email = normalize_email(email);
        let read_txn = self.db.begin_read()?;
        let emails = read_txn.open_table(IDENTITY_EMAIL_INDEX)?;
        let id = match emails.get(email.as_str())? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(IDENTITIES)?;
        match table.get(id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

impl AllowListRepository for RedbStore {
    fn is_allowed(&self, email: &str) -> StoreResult<bool> {
        let email = normalize_email(email);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALLOWED_EMAILS)?;
        Ok(table.get(email.as_str())?.is_some())
    }

    fn list_allowed(&self) -> StoreResult<Vec<AllowedEmail>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALLOWED_EMAILS)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice::<AllowedEmail>(value.value())?);
        }
        sort_allowed(&mut entries);
        Ok(entries)
    }

    fn add_allowed(&self, email: &str, now: DateTime<Utc>) -> StoreResult<AllowedEmail> {
        let email = normalize_email(email);
        let entry = AllowedEmail {
            id: Uuid::new_v4(),
            email: email.clone(),
            is_base_admin: false,
            created_at: now,
        };
        let json = serde_json::to_vec(&entry)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ALLOWED_EMAILS)?;
            if table.get(email.as_str())?.is_some() {
                return Err(StoreError::Conflict(email));
            }
            table.insert(email.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(entry)
    }

    fn remove_allowed(&self, id: Uuid) -> StoreResult<AllowedEmail> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ALLOWED_EMAILS)?;
            let mut found = None;
            for entry in table.iter()? {
                let (_, value) = entry?;
                let allowed: AllowedEmail = serde_json::from_slice(value.value())?;
                if allowed.id == id {
                    found = Some(allowed);
                    break;
                }
            }
            let allowed = found.ok_or_else(|| StoreError::NotFound(format!("allowed email {id}")))?;
            if allowed.is_base_admin {
                return Err(StoreError::Protected(allowed.email));
            }
            table.remove(allowed.email.as_str())?;
            allowed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn ensure_base_admin(&self, email: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ALLOWED_EMAILS)?;

            let mut demoted = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let previous: AllowedEmail = serde_json::from_slice(value.value())?;
                if previous.is_base_admin && previous.email != email {
                    demoted.push(previous);
                }
            }
            for mut previous in demoted {
                previous.is_base_admin = false;
                let json = serde_json::to_vec(&previous)?;
                table.insert(previous.email.as_str(), json.as_slice())?;
                tracing::info!(email = %previous.email, "Previous base admin demoted");
            }

            let existing = table.get(email.as_str())?.map(|v| v.value().to_vec());
            let entry = match existing {
                Some(bytes) => {
                    let mut entry: AllowedEmail = serde_json::from_slice(&bytes)?;
                    entry.is_base_admin = true;
                    entry
                }
                None => AllowedEmail {
                    id: Uuid::new_v4(),
                    email: email.clone(),
                    is_base_admin: true,
                    created_at: now,
                },
            };
            let json = serde_json::to_vec(&entry)?;
            table.insert(email.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl StoreHealth for RedbStore {
    fn check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SESSIONS)?;
        Ok(())
    }
}
