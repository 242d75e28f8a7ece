// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Verification record repository.
//!
//! One record per verification attempt; a user accumulates records across
//! retries. Records are never deleted.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::super::db::{
    make_user_index_key, make_user_prefix, make_user_prefix_end, verification_id_from_index_key,
    KycDatabase, KycDbError, KycDbResult, REFERENCE_INDEX, USER_VERIFICATION_INDEX, VERIFICATIONS,
};

/// Verification record lifecycle status.
///
/// Transitions are driven exclusively by inbound webhooks, never by
/// polling. `RetryPending` is created as a new record when an automatic
/// retry is scheduled and promoted to `Pending` when the retry starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Initiated,
    Pending,
    Verified,
    Declined,
    Cancelled,
    Error,
    RetryPending,
}

impl VerificationStatus {
    /// Terminal statuses expect no further webhook-driven transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Verified
                | VerificationStatus::Declined
                | VerificationStatus::Cancelled
        )
    }

    /// Statuses counting as "a verification is in progress" for the
    /// idempotent-start check.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Initiated | VerificationStatus::Pending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Initiated => "initiated",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Declined => "declined",
            VerificationStatus::Cancelled => "cancelled",
            VerificationStatus::Error => "error",
            VerificationStatus::RetryPending => "retry_pending",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredVerification {
    /// Unique record identifier.
    pub id: String,
    /// Owning user ID.
    pub user_id: String,
    /// Provider-facing reference, globally unique. The sole trust anchor
    /// correlating webhooks to this record.
    pub reference: String,
    /// Current status.
    pub status: VerificationStatus,
    /// Accumulated provider payloads: session response, webhook data,
    /// decline reasons/codes, retry bookkeeping.
    pub provider_response: Value,
    /// Creation timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Set when a terminal webhook is processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl StoredVerification {
    pub fn new(
        user_id: String,
        reference: String,
        status: VerificationStatus,
        provider_response: Value,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            reference,
            status,
            provider_response,
            submitted_at,
            reviewed_at: None,
        }
    }
}

/// Repository for verification record storage.
pub struct VerificationRepository<'a> {
    db: &'a KycDatabase,
}

impl<'a> VerificationRepository<'a> {
    pub fn new(db: &'a KycDatabase) -> Self {
        Self { db }
    }

    /// Persist a new record. Fails if the reference is already taken —
    /// references are never reused, including across retries.
    pub fn create(&self, record: &StoredVerification) -> KycDbResult<()> {
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut verifications = write_txn.open_table(VERIFICATIONS)?;
            let mut reference_index = write_txn.open_table(REFERENCE_INDEX)?;
            let mut user_index = write_txn.open_table(USER_VERIFICATION_INDEX)?;

            if reference_index.get(record.reference.as_str())?.is_some() {
                return Err(KycDbError::AlreadyExists(format!(
                    "reference {}",
                    record.reference
                )));
            }

            let bytes = serde_json::to_vec(record)?;
            verifications.insert(record.id.as_str(), bytes.as_slice())?;
            reference_index.insert(record.reference.as_str(), record.id.as_str())?;

            let key = make_user_index_key(
                &record.user_id,
                record.submitted_at.timestamp(),
                &record.id,
            );
            user_index.insert(key.as_slice(), record.reference.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a record by ID.
    pub fn get(&self, verification_id: &str) -> KycDbResult<StoredVerification> {
        let read_txn = self.db.raw().begin_read()?;
        let table = read_txn.open_table(VERIFICATIONS)?;
        match table.get(verification_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Err(KycDbError::NotFound(format!(
                "verification {verification_id}"
            ))),
        }
    }

    /// Exact unique lookup by provider reference.
    pub fn find_by_reference(&self, reference: &str) -> KycDbResult<Option<StoredVerification>> {
        let read_txn = self.db.raw().begin_read()?;
        let reference_index = read_txn.open_table(REFERENCE_INDEX)?;
        let verification_id = match reference_index.get(reference)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(VERIFICATIONS)?;
        match table.get(verification_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All records for a user, newest first.
    pub fn list_for_user(&self, user_id: &str) -> KycDbResult<Vec<StoredVerification>> {
        let read_txn = self.db.raw().begin_read()?;
        let user_index = read_txn.open_table(USER_VERIFICATION_INDEX)?;
        let verifications = read_txn.open_table(VERIFICATIONS)?;

        let start = make_user_prefix(user_id);
        let end = make_user_prefix_end(user_id);

        let mut records = Vec::new();
        for entry in user_index.range(start.as_slice()..end.as_slice())? {
            let entry = entry?;
            if let Some(id) = verification_id_from_index_key(entry.0.value()) {
                if let Some(value) = verifications.get(id.as_str())? {
                    records.push(serde_json::from_slice(value.value())?);
                }
            }
        }
        Ok(records)
    }

    /// Find the user's in-progress record ({initiated, pending}), if any.
    pub fn find_pending_for_user(&self, user_id: &str) -> KycDbResult<Option<StoredVerification>> {
        Ok(self
            .list_for_user(user_id)?
            .into_iter()
            .find(|record| record.status.is_active()))
    }

    /// Find the user's retry_pending record, if any.
    pub fn find_retry_pending_for_user(
        &self,
        user_id: &str,
    ) -> KycDbResult<Option<StoredVerification>> {
        Ok(self
            .list_for_user(user_id)?
            .into_iter()
            .find(|record| record.status == VerificationStatus::RetryPending))
    }

    /// Update an existing record in place.
    pub fn update(&self, record: &StoredVerification) -> KycDbResult<()> {
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut verifications = write_txn.open_table(VERIFICATIONS)?;
            if verifications.get(record.id.as_str())?.is_none() {
                return Err(KycDbError::NotFound(format!("verification {}", record.id)));
            }
            let bytes = serde_json::to_vec(record)?;
            verifications.insert(record.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
