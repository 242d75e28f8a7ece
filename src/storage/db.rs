// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Embedded KYC database backed by redb (pure Rust, ACID).
//!
//! Webhook status transitions run their whole read-decide-write sequence
//! inside a single write transaction (`apply_webhook_transition`). redb
//! serializes writers, so two webhooks for the same reference can never
//! both observe the pre-decline history and double-schedule a retry or
//! double-flip the block flag.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use super::repository::{StoredUser, StoredVerification};

// =============================================================================
// Table Definitions
// =============================================================================

/// user_id → serialized StoredUser (JSON bytes).
pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// verification_id → serialized StoredVerification (JSON bytes).
pub(crate) const VERIFICATIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("verifications");

/// Provider reference → verification_id. The reference is the sole
/// correlator trusted for webhooks, so this lookup must be exact and unique.
pub(crate) const REFERENCE_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("reference_index");

/// Index: composite key → reference.
/// Key format: `user_id|!timestamp_be|verification_id` for descending-time
/// range scans.
pub(crate) const USER_VERIFICATION_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("user_verification_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KycDbError {
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

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type KycDbResult<T> = Result<T, KycDbError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the user_verification_index table.
///
/// Format: `user_id | inverted_timestamp_be_bytes | verification_id`
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
pub(crate) fn make_user_index_key(
    user_id: &str,
    timestamp: i64,
    verification_id: &str,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.len() + 1 + 8 + 1 + verification_id.len());
    key.extend_from_slice(user_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(verification_id.as_bytes());
    key
}

/// Build a prefix key for range scanning all verifications of a user.
pub(crate) fn make_user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Build the upper bound for a range scan (prefix with 0xFF bytes appended).
pub(crate) fn make_user_prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(user_id.len() + 1 + 20);
    end.extend_from_slice(user_id.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Extract the verification_id portion from a composite index key.
///
/// Key format: `user_id|timestamp_bytes|verification_id`
///
/// The 8 raw timestamp bytes may themselves contain `|` (0x7C), so the key
/// is parsed structurally: first separator ends the user_id, then exactly
/// 8 timestamp bytes, then the second separator.
pub(crate) fn verification_id_from_index_key(key: &[u8]) -> Option<String> {
    let user_end = key.iter().position(|&b| b == b'|')?;
    let id_start = user_end + 1 + 8 + 1;
    if key.len() <= id_start || key[id_start - 1] != b'|' {
        return None;
    }
    String::from_utf8(key[id_start..].to_vec()).ok()
}

// =============================================================================
// Webhook Transition Types
// =============================================================================

/// State observed under the write transaction before a webhook transition.
#[derive(Debug)]
pub struct TransitionContext {
    /// Record matching the webhook's reference, pre-transition.
    pub record: StoredVerification,
    /// Owning user, pre-transition.
    pub user: StoredUser,
    /// Full verification history for the user, newest first. Includes
    /// `record` with its pre-transition status.
    pub history: Vec<StoredVerification>,
}

/// Writes to persist atomically when a webhook transition commits.
#[derive(Debug)]
pub struct TransitionPlan {
    /// Updated record (status, reviewed_at, merged provider_response).
    pub record: StoredVerification,
    /// Optional new retry_pending record scheduled by the decline policy.
    pub new_record: Option<StoredVerification>,
    /// Optional user flag updates (is_verified / is_blocked).
    pub user: Option<StoredUser>,
}

// =============================================================================
// KycDatabase
// =============================================================================

/// Embedded ACID database for users and verification records.
pub struct KycDatabase {
    db: Database,
}

impl KycDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> KycDbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(VERIFICATIONS)?;
            let _ = write_txn.open_table(REFERENCE_INDEX)?;
            let _ = write_txn.open_table(USER_VERIFICATION_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn raw(&self) -> &Database {
        &self.db
    }

    /// Apply a webhook-driven status transition atomically.
    ///
    /// Loads the record by reference, the owning user and the user's full
    /// history under a single write transaction, hands them to `decide`,
    /// then persists the returned plan before committing. The caller's
    /// `decide` must be pure — it runs while the write lock is held.
    pub fn apply_webhook_transition<F>(
        &self,
        reference: &str,
        decide: F,
    ) -> KycDbResult<TransitionPlan>
    where
        F: FnOnce(TransitionContext) -> TransitionPlan,
    {
        let write_txn = self.db.begin_write()?;
        let plan = {
            let mut verifications = write_txn.open_table(VERIFICATIONS)?;
            let mut reference_index = write_txn.open_table(REFERENCE_INDEX)?;
            let mut user_index = write_txn.open_table(USER_VERIFICATION_INDEX)?;
            let mut users = write_txn.open_table(USERS)?;

            let verification_id = {
                let entry = reference_index.get(reference)?.ok_or_else(|| {
                    KycDbError::NotFound(format!("verification for reference {reference}"))
                })?;
                entry.value().to_string()
            };

            let record: StoredVerification = {
                let bytes = verifications
                    .get(verification_id.as_str())?
                    .ok_or_else(|| {
                        KycDbError::NotFound(format!("verification {verification_id}"))
                    })?
                    .value()
                    .to_vec();
                serde_json::from_slice(&bytes)?
            };

            let user: StoredUser = {
                let bytes = users
                    .get(record.user_id.as_str())?
                    .ok_or_else(|| KycDbError::NotFound(format!("user {}", record.user_id)))?
                    .value()
                    .to_vec();
                serde_json::from_slice(&bytes)?
            };

            let mut history_ids = Vec::new();
            {
                let start = make_user_prefix(&record.user_id);
                let end = make_user_prefix_end(&record.user_id);
                for entry in user_index.range(start.as_slice()..end.as_slice())? {
                    let entry = entry?;
                    if let Some(id) = verification_id_from_index_key(entry.0.value()) {
                        history_ids.push(id);
                    }
                }
            }

            let mut history = Vec::with_capacity(history_ids.len());
            for id in &history_ids {
                if let Some(value) = verifications.get(id.as_str())? {
                    history.push(serde_json::from_slice::<StoredVerification>(
                        value.value(),
                    )?);
                }
            }

            let plan = decide(TransitionContext {
                record,
                user,
                history,
            });

            let updated = serde_json::to_vec(&plan.record)?;
            verifications.insert(plan.record.id.as_str(), updated.as_slice())?;

            if let Some(new_record) = &plan.new_record {
                if reference_index
                    .get(new_record.reference.as_str())?
                    .is_some()
                {
                    return Err(KycDbError::AlreadyExists(format!(
                        "reference {}",
                        new_record.reference
                    )));
                }
                let bytes = serde_json::to_vec(new_record)?;
                verifications.insert(new_record.id.as_str(), bytes.as_slice())?;
                reference_index.insert(new_record.reference.as_str(), new_record.id.as_str())?;
                let key = make_user_index_key(
                    &new_record.user_id,
                    new_record.submitted_at.timestamp(),
                    &new_record.id,
                );
                user_index.insert(key.as_slice(), new_record.reference.as_str())?;
            }

            if let Some(updated_user) = &plan.user {
                let bytes = serde_json::to_vec(updated_user)?;
                users.insert(updated_user.user_id.as_str(), bytes.as_slice())?;
            }

            plan
        };
        write_txn.commit()?;
        Ok(plan)
    }
}
