// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! User repository.
//!
//! The verification core only owns two user fields: `is_verified` (mirrors
//! the latest terminal verification outcome) and `is_blocked` (set after
//! exhausted retries; one-way from this subsystem). The rest is the profile
//! data required to open a provider session.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::db::{KycDatabase, KycDbError, KycDbResult, USERS};

/// Persisted user record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredUser {
    /// Unique user identifier.
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// ISO 3166-1 alpha-2 country code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// True iff the user's latest verification record is `verified`.
    pub is_verified: bool,
    /// Set after exhausted KYC retries; cleared only by admin intervention.
    pub is_blocked: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn new(
        user_id: String,
        first_name: String,
        last_name: String,
        email: String,
        country: Option<String>,
    ) -> Self {
        Self {
            user_id,
            first_name,
            last_name,
            email,
            country,
            is_verified: false,
            is_blocked: false,
            created_at: Utc::now(),
        }
    }

    /// Whether the profile carries everything a provider session needs.
    pub fn has_complete_profile(&self) -> bool {
        !self.first_name.trim().is_empty()
            && !self.last_name.trim().is_empty()
            && !self.email.trim().is_empty()
    }
}

/// Repository for user storage.
pub struct UserRepository<'a> {
    db: &'a KycDatabase,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a KycDatabase) -> Self {
        Self { db }
    }

    /// Persist a new user.
    pub fn create(&self, user: &StoredUser) -> KycDbResult<()> {
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            if users.get(user.user_id.as_str())?.is_some() {
                return Err(KycDbError::AlreadyExists(format!("user {}", user.user_id)));
            }
            let bytes = serde_json::to_vec(user)?;
            users.insert(user.user_id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a user by ID.
    pub fn get(&self, user_id: &str) -> KycDbResult<StoredUser> {
        let read_txn = self.db.raw().begin_read()?;
        let users = read_txn.open_table(USERS)?;
        match users.get(user_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Err(KycDbError::NotFound(format!("user {user_id}"))),
        }
    }

    /// Set the verified flag, skipping the write when already correct.
    pub fn set_verified(&self, user_id: &str, verified: bool) -> KycDbResult<bool> {
        self.update_flags(user_id, |user| {
            if user.is_verified == verified {
                false
            } else {
                user.is_verified = verified;
                true
            }
        })
    }

    /// Block a user. Idempotent; blocking is one-way from this subsystem.
    pub fn block(&self, user_id: &str) -> KycDbResult<bool> {
        self.update_flags(user_id, |user| {
            if user.is_blocked {
                false
            } else {
                user.is_blocked = true;
                true
            }
        })
    }

    /// Check-then-set inside a single write transaction.
    fn update_flags<F>(&self, user_id: &str, mutate: F) -> KycDbResult<bool>
    where
        F: FnOnce(&mut StoredUser) -> bool,
    {
        let write_txn = self.db.raw().begin_write()?;
        let changed = {
            let mut users = write_txn.open_table(USERS)?;
            let bytes = users
                .get(user_id)?
                .ok_or_else(|| KycDbError::NotFound(format!("user {user_id}")))?
                .value()
                .to_vec();
            let mut user: StoredUser = serde_json::from_slice(&bytes)?;

            let changed = mutate(&mut user);
            if changed {
                let updated = serde_json::to_vec(&user)?;
                users.insert(user_id, updated.as_slice())?;
            }
            changed
        };
        write_txn.commit()?;
        Ok(changed)
    }
}
