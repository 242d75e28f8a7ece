// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Verification orchestrator.
//!
//! Ties the provider client, the record store and the retry policy
//! together. All status transitions are webhook-driven and run through
//! [`KycService::process_webhook`], whose read-decide-write sequence
//! executes inside a single database write transaction.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Environment, KycConfig};
use crate::notify::{NotificationKind, VerificationNotice, VerificationNotifier};
use crate::policy::{evaluate_decline, DeclineOutcome};
use crate::providers::{session_status_from_event, ShuftiClient, ShuftiError, VerificationSubject};
use crate::storage::{
    KycDatabase, KycDbError, StoredVerification, TransitionPlan, UserRepository,
    VerificationRepository, VerificationStatus,
};

/// Country used for provider sessions when the user profile carries none.
const FALLBACK_COUNTRY: &str = "US";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("User not found")]
    UserNotFound,

    #[error("Verification not found")]
    VerificationNotFound,

    #[error("KYC verification is blocked for this user due to exhausted retry attempts. Please contact support.")]
    Blocked,

    #[error("No retry verification found for this user")]
    NoRetryFound,

    #[error("User profile incomplete. First name, last name, and email are required.")]
    IncompleteProfile,

    #[error("Empty webhook payload")]
    EmptyWebhookPayload,

    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid JSON in webhook payload")]
    InvalidJson,

    #[error("Missing reference in webhook data")]
    MissingReference,

    #[error("KYC verification failed: {0}")]
    Provider(#[from] ShuftiError),

    #[error("storage error: {0}")]
    Storage(KycDbError),
}

impl From<KycDbError> for ServiceError {
    fn from(err: KycDbError) -> Self {
        match err {
            KycDbError::NotFound(_) => ServiceError::VerificationNotFound,
            other => ServiceError::Storage(other),
        }
    }
}

/// Result of starting (or resuming) a verification session.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub verification_id: String,
    pub reference: String,
    pub verification_url: Option<String>,
}

/// Snapshot of a user's newest verification record.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub verification_id: String,
    pub status: VerificationStatus,
    pub submitted_at: chrono::DateTime<Utc>,
    pub reviewed_at: Option<chrono::DateTime<Utc>>,
    pub is_completed: bool,
    pub verification_url: Option<String>,
    pub decline_reasons: Option<Vec<String>>,
    pub verification_details: Option<Value>,
    pub message: Option<String>,
}

/// Service health snapshot. Carries no secrets.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub status: &'static str,
    pub environment: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Classify a webhook into an internal status.
///
/// Event names take precedence; the numeric `verification_status` code is
/// only consulted when the event is unrecognized.
pub fn classify_event(event: &str, verification_status: &str) -> VerificationStatus {
    match event {
        "verification.accepted" => VerificationStatus::Verified,
        "verification.declined" => VerificationStatus::Declined,
        "verification.cancelled" => VerificationStatus::Cancelled,
        e if e.starts_with("verification.") => VerificationStatus::Pending,
        e if e.starts_with("request.") => VerificationStatus::Pending,
        _ => match verification_status {
            "1" => VerificationStatus::Verified,
            "0" => VerificationStatus::Declined,
            "2" => VerificationStatus::Pending,
            "3" => VerificationStatus::Cancelled,
            _ => VerificationStatus::Error,
        },
    }
}

/// KYC verification orchestrator.
pub struct KycService {
    config: Arc<KycConfig>,
    shufti: ShuftiClient,
    db: Arc<KycDatabase>,
    notifier: Arc<dyn VerificationNotifier>,
}

impl KycService {
    pub fn new(
        config: Arc<KycConfig>,
        shufti: ShuftiClient,
        db: Arc<KycDatabase>,
        notifier: Arc<dyn VerificationNotifier>,
    ) -> Self {
        Self {
            config,
            shufti,
            db,
            notifier,
        }
    }

    /// Start a verification session for a user.
    ///
    /// Idempotent: an existing in-progress record is returned as-is instead
    /// of opening a second provider session.
    pub async fn start_verification(&self, user_id: &str) -> Result<StartOutcome, ServiceError> {
        let users = UserRepository::new(&self.db);
        let user = users.get(user_id).map_err(map_user_err)?;

        if user.is_blocked {
            warn!(user_id, "blocked user attempted to start verification");
            return Err(ServiceError::Blocked);
        }
        if !user.has_complete_profile() {
            return Err(ServiceError::IncompleteProfile);
        }

        let verifications = VerificationRepository::new(&self.db);
        if let Some(existing) = verifications.find_pending_for_user(user_id)? {
            info!(
                user_id,
                reference = %existing.reference,
                "returning existing pending verification"
            );
            let verification_url = top_level_url(&existing.provider_response);
            return Ok(StartOutcome {
                verification_id: existing.id,
                reference: existing.reference,
                verification_url,
            });
        }

        let reference = format!(
            "KYC_{}_{}_{}",
            user_id,
            Utc::now().format("%Y%m%d%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let subject = VerificationSubject {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            country: user
                .country
                .clone()
                .unwrap_or_else(|| FALLBACK_COUNTRY.to_string()),
        };

        let result = self.shufti.start_verification(&reference, &subject).await?;
        let status = session_status_from_event(&result);
        let verification_url = top_level_url(&result);

        let record = StoredVerification::new(
            user_id.to_string(),
            reference.clone(),
            status,
            result,
            Utc::now(),
        );
        verifications.create(&record)?;

        info!(user_id, reference = %reference, id = %record.id, "verification created");
        Ok(StartOutcome {
            verification_id: record.id,
            reference,
            verification_url,
        })
    }

    /// Start the provider session for a previously scheduled retry.
    ///
    /// The retry record already carries its reference; this opens a fresh
    /// provider session under that reference and promotes the record to
    /// `pending`, keeping the original retry bookkeeping alongside the new
    /// session response.
    pub async fn start_retry(&self, user_id: &str) -> Result<StartOutcome, ServiceError> {
        let users = UserRepository::new(&self.db);
        let user = users.get(user_id).map_err(map_user_err)?;

        if user.is_blocked {
            warn!(user_id, "blocked user attempted to start retry verification");
            return Err(ServiceError::Blocked);
        }

        let verifications = VerificationRepository::new(&self.db);
        let mut retry = verifications
            .find_retry_pending_for_user(user_id)?
            .ok_or(ServiceError::NoRetryFound)?;

        info!(user_id, reference = %retry.reference, "starting retry verification");

        let subject = VerificationSubject {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            country: user
                .country
                .clone()
                .unwrap_or_else(|| FALLBACK_COUNTRY.to_string()),
        };

        let result = self
            .shufti
            .start_verification(&retry.reference, &subject)
            .await?;
        let verification_url = top_level_url(&result);

        let retry_info = retry
            .provider_response
            .get("retry_info")
            .cloned()
            .unwrap_or_else(|| json!({}));

        retry.status = VerificationStatus::Pending;
        retry.provider_response = json!({
            "retry_info": retry_info,
            "shufti_result": result,
            "verification_url": verification_url,
        });
        verifications.update(&retry)?;

        Ok(StartOutcome {
            verification_id: retry.id,
            reference: retry.reference,
            verification_url,
        })
    }

    /// Report the user's newest verification record, or `None` when the
    /// user has never started one.
    pub fn status(&self, user_id: &str) -> Result<Option<StatusReport>, ServiceError> {
        let users = UserRepository::new(&self.db);
        users.get(user_id).map_err(map_user_err)?;

        let verifications = VerificationRepository::new(&self.db);
        let records = verifications.list_for_user(user_id)?;
        let latest = match records.into_iter().next() {
            Some(record) => record,
            None => return Ok(None),
        };

        let response = &latest.provider_response;
        let webhook_data = response.get("webhook_data");

        // Top-level URL first; retry sessions nest it under shufti_result.
        let verification_url = top_level_url(response)
            .or_else(|| response.get("shufti_result").and_then(top_level_url));

        let decline_reasons = if latest.status == VerificationStatus::Declined {
            let raw = response
                .get("decline_reasons")
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| {
                    webhook_data
                        .and_then(|w| w.get("declined_reason"))
                        .cloned()
                });
            raw.and_then(normalize_reasons)
        } else {
            None
        };

        let verification_details = response
            .get("verification_details")
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| {
                webhook_data
                    .and_then(|w| w.get("verification_data"))
                    .filter(|v| !v.is_null())
                    .cloned()
            });

        let message = status_message(latest.status, decline_reasons.is_some());

        Ok(Some(StatusReport {
            verification_id: latest.id,
            status: latest.status,
            submitted_at: latest.submitted_at,
            reviewed_at: latest.reviewed_at,
            is_completed: latest.reviewed_at.is_some(),
            verification_url,
            decline_reasons,
            verification_details,
            message,
        }))
    }

    /// Consume a provider webhook and advance the matching record.
    ///
    /// Fail-fast pipeline: payload presence, signature, JSON shape and
    /// reference are each checked before any state is touched. The
    /// transition itself (steps after the lookup) runs atomically.
    pub async fn process_webhook(
        &self,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<(), ServiceError> {
        if raw.is_empty() {
            return Err(ServiceError::EmptyWebhookPayload);
        }

        let production = self.config.environment == Environment::Production;
        match signature {
            Some(sig) => {
                if !self.shufti.verify_webhook(raw, sig) {
                    if production {
                        warn!("webhook rejected: invalid signature");
                        return Err(ServiceError::InvalidSignature);
                    }
                    warn!("webhook signature invalid, continuing in development mode");
                }
            }
            None => {
                if production {
                    warn!("webhook rejected: no signature");
                    return Err(ServiceError::MissingSignature);
                }
                warn!("webhook without signature, continuing in development mode");
            }
        }

        let webhook_data: Value =
            serde_json::from_slice(raw).map_err(|_| ServiceError::InvalidJson)?;

        let reference = webhook_data
            .get("reference")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .ok_or(ServiceError::MissingReference)?
            .to_string();

        let event = webhook_data
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let verification_status = webhook_data
            .get("verification_status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let new_status = classify_event(&event, &verification_status);
        info!(reference = %reference, event = %event, status = %new_status, "processing webhook");

        let threshold = self.config.decline_retry_threshold();
        let mut notice: Option<VerificationNotice> = None;

        self.db.apply_webhook_transition(&reference, |ctx| {
            // Replayed webhook for a settled record: acknowledge, change
            // nothing. Without this guard a re-delivered decline would
            // double-schedule a retry or double-count toward the block
            // threshold.
            if ctx.record.status.is_terminal() {
                warn!(
                    reference = %ctx.record.reference,
                    status = %ctx.record.status,
                    "webhook replay for terminal record ignored"
                );
                return TransitionPlan {
                    record: ctx.record,
                    new_record: None,
                    user: None,
                };
            }

            let mut record = ctx.record;
            let mut user = ctx.user;
            let mut merged: Map<String, Value> = record
                .provider_response
                .as_object()
                .cloned()
                .unwrap_or_default();

            merged.insert("webhook_data".to_string(), webhook_data.clone());
            if let Some(details) = webhook_data.get("verification_data") {
                merged.insert("verification_details".to_string(), details.clone());
            }
            if let Some(service) = webhook_data.get("service") {
                merged.insert("service".to_string(), service.clone());
            }
            if let Some(extra) = webhook_data.get("info") {
                merged.insert("info".to_string(), extra.clone());
            }

            let mut new_record = None;
            let mut user_changed = false;

            if new_status == VerificationStatus::Declined
                && (webhook_data.get("declined_reason").is_some()
                    || webhook_data.get("declined_codes").is_some())
            {
                let reasons = webhook_data
                    .get("declined_reason")
                    .and_then(Value::as_str)
                    .filter(|r| !r.trim().is_empty())
                    .map(|r| vec![r.to_string()]);
                let codes: Vec<String> = webhook_data
                    .get("declined_codes")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                info!(reference = %record.reference, ?reasons, ?codes, "verification declined");

                merged.insert("decline_reasons".to_string(), json!(reasons));
                merged.insert("decline_codes".to_string(), json!(codes));

                // Declines already recorded for this user; the one being
                // processed is not yet counted.
                let declined_count = ctx
                    .history
                    .iter()
                    .filter(|v| v.status == VerificationStatus::Declined)
                    .count() as u32;

                match evaluate_decline(&codes, declined_count, threshold, &record.reference) {
                    DeclineOutcome::ScheduleRetry {
                        retry_reference,
                        attempt_number,
                    } => {
                        info!(
                            user_id = %record.user_id,
                            retry_reference = %retry_reference,
                            attempt_number,
                            "scheduling automatic retry"
                        );
                        merged.insert(
                            "auto_retry".to_string(),
                            json!({
                                "needed": true,
                                "retry_reference": retry_reference,
                                "attempt_number": attempt_number,
                                "user_id": record.user_id,
                                "decline_reasons": reasons,
                            }),
                        );
                        new_record = Some(StoredVerification::new(
                            record.user_id.clone(),
                            retry_reference,
                            VerificationStatus::RetryPending,
                            json!({
                                "retry_info": {
                                    "is_retry": true,
                                    "attempt_number": attempt_number,
                                    "original_reference": record.reference,
                                    "decline_reasons": codes,
                                }
                            }),
                            Utc::now(),
                        ));
                        notice = Some(VerificationNotice {
                            user_id: record.user_id.clone(),
                            email: user.email.clone(),
                            reference: record.reference.clone(),
                            kind: NotificationKind::RetryScheduled,
                        });
                    }
                    DeclineOutcome::BlockUser => {
                        info!(user_id = %record.user_id, "retry attempts exhausted, blocking user");
                        merged.insert(
                            "auto_retry".to_string(),
                            json!({
                                "initiated": false,
                                "reason": "Maximum retry attempts reached",
                            }),
                        );
                        if !user.is_blocked {
                            user.is_blocked = true;
                            user_changed = true;
                        }
                        notice = Some(VerificationNotice {
                            user_id: record.user_id.clone(),
                            email: user.email.clone(),
                            reference: record.reference.clone(),
                            kind: NotificationKind::Blocked,
                        });
                    }
                    DeclineOutcome::NoRetry(reason) => {
                        info!(user_id = %record.user_id, ?reason, "no automatic retry");
                        notice = Some(VerificationNotice {
                            user_id: record.user_id.clone(),
                            email: user.email.clone(),
                            reference: record.reference.clone(),
                            kind: NotificationKind::Declined,
                        });
                    }
                }
            }

            record.status = new_status;
            record.reviewed_at = Some(Utc::now());
            record.provider_response = Value::Object(merged);

            // Terminal outcomes mirror onto the user flag, idempotently.
            match new_status {
                VerificationStatus::Verified => {
                    if !user.is_verified {
                        user.is_verified = true;
                        user_changed = true;
                    }
                    notice = Some(VerificationNotice {
                        user_id: record.user_id.clone(),
                        email: user.email.clone(),
                        reference: record.reference.clone(),
                        kind: NotificationKind::Verified,
                    });
                }
                VerificationStatus::Declined => {
                    if user.is_verified {
                        user.is_verified = false;
                        user_changed = true;
                    }
                    if notice.is_none() {
                        notice = Some(VerificationNotice {
                            user_id: record.user_id.clone(),
                            email: user.email.clone(),
                            reference: record.reference.clone(),
                            kind: NotificationKind::Declined,
                        });
                    }
                }
                _ => {}
            }

            TransitionPlan {
                record,
                new_record,
                user: user_changed.then_some(user),
            }
        })?;

        if let Some(notice) = notice {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                notifier.verification_completed(&notice);
            });
        }

        Ok(())
    }

    /// Shared handle to the underlying database.
    pub fn database(&self) -> &KycDatabase {
        &self.db
    }

    /// Health snapshot. Reports only status and environment name.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            environment: self.config.environment.as_str(),
            timestamp: Utc::now(),
        }
    }
}

fn map_user_err(err: KycDbError) -> ServiceError {
    match err {
        KycDbError::NotFound(_) => ServiceError::UserNotFound,
        other => ServiceError::Storage(other),
    }
}

fn top_level_url(value: &Value) -> Option<String> {
    value
        .get("verification_url")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Normalize decline reasons to a non-empty list: a bare string becomes a
/// single-element list, an empty string or empty list becomes `None`.
fn normalize_reasons(raw: Value) -> Option<Vec<String>> {
    match raw {
        Value::String(s) => {
            if s.trim().is_empty() {
                None
            } else {
                Some(vec![s])
            }
        }
        Value::Array(items) => {
            let list: Vec<String> = items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if list.is_empty() {
                None
            } else {
                Some(list)
            }
        }
        _ => None,
    }
}

fn status_message(status: VerificationStatus, has_decline_reasons: bool) -> Option<String> {
    let copy = match status {
        VerificationStatus::Verified => "Verification completed successfully.",
        VerificationStatus::Initiated => {
            "Verification initiated. Please complete the verification process."
        }
        VerificationStatus::Pending => "Verification is being processed. Please wait.",
        VerificationStatus::Cancelled => "Verification was cancelled.",
        VerificationStatus::Error => "An error occurred during verification.",
        VerificationStatus::Declined => {
            if has_decline_reasons {
                "Verification was declined. Please try again with valid documents."
            } else {
                return None;
            }
        }
        VerificationStatus::RetryPending => return None,
    };
    Some(copy.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_DOCUMENT_TYPES, DEFAULT_SUPPORTED_COUNTRIES};
    use crate::notify::LogNotifier;
    use crate::providers::webhook_signature;
    use crate::storage::StoredUser;

    const SECRET: &str = "super-secret";

    fn test_config(environment: Environment) -> KycConfig {
        KycConfig {
            shufti_client_id: "client-id".to_string(),
            shufti_secret_key: SECRET.to_string(),
            shufti_base_url: "https://api.shuftipro.com".to_string(),
            callback_url: "https://example.com/v1/kyc/webhook".to_string(),
            verification_ttl: 3_600,
            webhook_timeout: 30,
            max_verification_attempts: 3,
            environment,
            supported_document_types: DEFAULT_DOCUMENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            supported_countries: DEFAULT_SUPPORTED_COUNTRIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn test_service(environment: Environment) -> (KycService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(environment));
        let db = Arc::new(KycDatabase::open(&dir.path().join("test.redb")).unwrap());
        let shufti = ShuftiClient::new(&config).unwrap();
        let service = KycService::new(config, shufti, db, Arc::new(LogNotifier));
        (service, dir)
    }

    fn seed_user(service: &KycService, user_id: &str) -> StoredUser {
        let user = StoredUser::new(
            user_id.to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            "ada@example.com".to_string(),
            Some("GB".to_string()),
        );
        UserRepository::new(&service.db).create(&user).unwrap();
        user
    }

    fn seed_record(
        service: &KycService,
        user_id: &str,
        reference: &str,
        status: VerificationStatus,
    ) -> StoredVerification {
        let record = StoredVerification::new(
            user_id.to_string(),
            reference.to_string(),
            status,
            json!({ "event": "request.pending", "verification_url": "https://shufti.example/v/1" }),
            Utc::now(),
        );
        VerificationRepository::new(&service.db)
            .create(&record)
            .unwrap();
        record
    }

    fn signed(payload: &Value) -> (Vec<u8>, String) {
        let raw = serde_json::to_vec(payload).unwrap();
        let signature = webhook_signature(&raw, SECRET);
        (raw, signature)
    }

    fn decline_payload(reference: &str, codes: &[&str]) -> Value {
        json!({
            "reference": reference,
            "event": "verification.declined",
            "declined_reason": "Document quality is too poor",
            "declined_codes": codes,
        })
    }

    #[test]
    fn classify_event_precedence() {
        assert_eq!(
            classify_event("verification.accepted", ""),
            VerificationStatus::Verified
        );
        assert_eq!(
            classify_event("verification.declined", "1"),
            VerificationStatus::Declined
        );
        assert_eq!(
            classify_event("verification.cancelled", ""),
            VerificationStatus::Cancelled
        );
        assert_eq!(
            classify_event("verification.status.changed", ""),
            VerificationStatus::Pending
        );
        assert_eq!(
            classify_event("request.pending", ""),
            VerificationStatus::Pending
        );
        assert_eq!(
            classify_event("request.timeout", ""),
            VerificationStatus::Pending
        );
        // Unrecognized events fall back to the numeric status code.
        assert_eq!(classify_event("", "1"), VerificationStatus::Verified);
        assert_eq!(classify_event("", "0"), VerificationStatus::Declined);
        assert_eq!(classify_event("", "2"), VerificationStatus::Pending);
        assert_eq!(classify_event("", "3"), VerificationStatus::Cancelled);
        assert_eq!(classify_event("bogus", "9"), VerificationStatus::Error);
    }

    #[tokio::test]
    async fn start_rejects_unknown_user() {
        let (service, _dir) = test_service(Environment::Development);
        let err = service.start_verification("ghost").await.unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
    }

    #[tokio::test]
    async fn start_rejects_blocked_user() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        UserRepository::new(&service.db).block("user-1").unwrap();

        let err = service.start_verification("user-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Blocked));
    }

    #[tokio::test]
    async fn start_rejects_incomplete_profile() {
        let (service, _dir) = test_service(Environment::Development);
        let user = StoredUser::new(
            "user-1".to_string(),
            String::new(),
            "Lovelace".to_string(),
            "ada@example.com".to_string(),
            None,
        );
        UserRepository::new(&service.db).create(&user).unwrap();

        let err = service.start_verification("user-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::IncompleteProfile));
    }

    #[tokio::test]
    async fn start_is_idempotent_for_pending_record() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        let existing = seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let outcome = service.start_verification("user-1").await.unwrap();
        assert_eq!(outcome.verification_id, existing.id);
        assert_eq!(outcome.reference, "KYC_REF_1");
        assert_eq!(
            outcome.verification_url.as_deref(),
            Some("https://shufti.example/v/1")
        );

        let records = VerificationRepository::new(&service.db)
            .list_for_user("user-1")
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn retry_without_retry_pending_record_is_rejected() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Declined);

        let err = service.start_retry("user-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NoRetryFound));
    }

    #[tokio::test]
    async fn webhook_rejects_empty_payload() {
        let (service, _dir) = test_service(Environment::Development);
        let err = service.process_webhook(b"", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyWebhookPayload));
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_json() {
        let (service, _dir) = test_service(Environment::Development);
        let err = service
            .process_webhook(b"not json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidJson));
    }

    #[tokio::test]
    async fn webhook_rejects_missing_reference() {
        let (service, _dir) = test_service(Environment::Development);
        let err = service
            .process_webhook(br#"{"event":"verification.accepted"}"#, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingReference));
    }

    #[tokio::test]
    async fn webhook_unknown_reference_is_not_found() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");

        let payload = json!({ "reference": "KYC_SPOOFED", "event": "verification.accepted" });
        let (raw, sig) = signed(&payload);
        let err = service
            .process_webhook(&raw, Some(&sig))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::VerificationNotFound));
    }

    #[tokio::test]
    async fn production_requires_valid_signature() {
        let (service, _dir) = test_service(Environment::Production);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let payload = json!({ "reference": "KYC_REF_1", "event": "verification.accepted" });
        let raw = serde_json::to_vec(&payload).unwrap();

        let err = service.process_webhook(&raw, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::MissingSignature));

        let err = service
            .process_webhook(&raw, Some("deadbeefdeadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSignature));

        let sig = webhook_signature(&raw, SECRET);
        service.process_webhook(&raw, Some(&sig)).await.unwrap();
    }

    #[tokio::test]
    async fn development_tolerates_bad_signature() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let payload = json!({ "reference": "KYC_REF_1", "event": "verification.accepted" });
        let raw = serde_json::to_vec(&payload).unwrap();
        service.process_webhook(&raw, None).await.unwrap();
    }

    #[tokio::test]
    async fn accepted_webhook_verifies_record_and_user() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        let record = seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let payload = json!({
            "reference": "KYC_REF_1",
            "event": "verification.accepted",
            "verification_data": { "document": { "name": "Ada Lovelace" } },
        });
        let (raw, sig) = signed(&payload);
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let updated = VerificationRepository::new(&service.db)
            .get(&record.id)
            .unwrap();
        assert_eq!(updated.status, VerificationStatus::Verified);
        assert!(updated.reviewed_at.is_some());
        assert!(updated.provider_response.get("webhook_data").is_some());
        assert!(updated
            .provider_response
            .get("verification_details")
            .is_some());
        // Session-start response survives the merge.
        assert_eq!(
            updated.provider_response["verification_url"],
            json!("https://shufti.example/v/1")
        );

        let user = UserRepository::new(&service.db).get("user-1").unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    async fn eligible_decline_schedules_retry() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        let record = seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let (raw, sig) = signed(&decline_payload("KYC_REF_1", &["SPDR07"]));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let repo = VerificationRepository::new(&service.db);
        let declined = repo.get(&record.id).unwrap();
        assert_eq!(declined.status, VerificationStatus::Declined);
        assert_eq!(
            declined.provider_response["auto_retry"]["needed"],
            json!(true)
        );

        let retry = repo
            .find_retry_pending_for_user("user-1")
            .unwrap()
            .expect("retry record scheduled");
        assert!(retry.reference.starts_with("RETRY_1_KYC_REF_1_"));
        assert_eq!(
            retry.provider_response["retry_info"]["attempt_number"],
            json!(1)
        );

        let user = UserRepository::new(&service.db).get("user-1").unwrap();
        assert!(!user.is_blocked);
    }

    #[tokio::test]
    async fn ineligible_decline_does_not_retry() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let (raw, sig) = signed(&decline_payload("KYC_REF_1", &["SPXX99"]));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let repo = VerificationRepository::new(&service.db);
        assert!(repo.find_retry_pending_for_user("user-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn third_decline_blocks_user_without_new_retry() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        // Two declines already on record.
        seed_record(&service, "user-1", "KYC_REF_0", VerificationStatus::Declined);
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Declined);
        seed_record(&service, "user-1", "KYC_REF_2", VerificationStatus::Pending);

        let (raw, sig) = signed(&decline_payload("KYC_REF_2", &["SPDR07"]));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let repo = VerificationRepository::new(&service.db);
        assert!(repo.find_retry_pending_for_user("user-1").unwrap().is_none());

        let user = UserRepository::new(&service.db).get("user-1").unwrap();
        assert!(user.is_blocked);
    }

    #[tokio::test]
    async fn replayed_decline_for_terminal_record_has_no_side_effects() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let (raw, sig) = signed(&decline_payload("KYC_REF_1", &["SPDR07"]));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();
        // Re-delivery of the same decline.
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let repo = VerificationRepository::new(&service.db);
        let retries: Vec<_> = repo
            .list_for_user("user-1")
            .unwrap()
            .into_iter()
            .filter(|r| r.status == VerificationStatus::RetryPending)
            .collect();
        assert_eq!(retries.len(), 1, "replay must not schedule a second retry");
    }

    #[tokio::test]
    async fn later_pending_webhook_does_not_unverify_user() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let (raw, sig) = signed(&json!({
            "reference": "KYC_REF_1",
            "event": "verification.accepted",
        }));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        seed_record(&service, "user-1", "KYC_REF_2", VerificationStatus::Initiated);
        let (raw, sig) = signed(&json!({
            "reference": "KYC_REF_2",
            "event": "request.pending",
        }));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let user = UserRepository::new(&service.db).get("user-1").unwrap();
        assert!(user.is_verified);
    }

    #[tokio::test]
    async fn status_reports_newest_record_with_copy() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let report = service.status("user-1").unwrap().expect("report");
        assert_eq!(report.status, VerificationStatus::Pending);
        assert!(!report.is_completed);
        assert_eq!(
            report.message.as_deref(),
            Some("Verification is being processed. Please wait.")
        );
        assert_eq!(
            report.verification_url.as_deref(),
            Some("https://shufti.example/v/1")
        );
    }

    #[tokio::test]
    async fn status_is_none_without_records() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        assert!(service.status("user-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn status_surfaces_decline_reasons() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");
        seed_record(&service, "user-1", "KYC_REF_1", VerificationStatus::Pending);

        let (raw, sig) = signed(&decline_payload("KYC_REF_1", &["SPXX99"]));
        service.process_webhook(&raw, Some(&sig)).await.unwrap();

        let report = service.status("user-1").unwrap().expect("report");
        assert_eq!(report.status, VerificationStatus::Declined);
        assert!(report.is_completed);
        assert_eq!(
            report.decline_reasons,
            Some(vec!["Document quality is too poor".to_string()])
        );
        assert_eq!(
            report.message.as_deref(),
            Some("Verification was declined. Please try again with valid documents.")
        );
    }

    #[tokio::test]
    async fn status_falls_back_to_retry_session_url() {
        let (service, _dir) = test_service(Environment::Development);
        seed_user(&service, "user-1");

        let record = StoredVerification::new(
            "user-1".to_string(),
            "RETRY_1_KYC_REF_1_abcd1234".to_string(),
            VerificationStatus::Pending,
            json!({
                "retry_info": { "attempt_number": 1 },
                "shufti_result": { "verification_url": "https://shufti.example/v/retry" },
            }),
            Utc::now(),
        );
        VerificationRepository::new(&service.db)
            .create(&record)
            .unwrap();

        let report = service.status("user-1").unwrap().expect("report");
        assert_eq!(
            report.verification_url.as_deref(),
            Some("https://shufti.example/v/retry")
        );
    }

    #[test]
    fn health_reports_environment_only() {
        let (service, _dir) = test_service(Environment::Development);
        let health = service.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.environment, "development");
    }

    #[test]
    fn normalize_reasons_handles_shapes() {
        assert_eq!(
            normalize_reasons(json!("bad photo")),
            Some(vec!["bad photo".to_string()])
        );
        assert_eq!(normalize_reasons(json!("   ")), None);
        assert_eq!(
            normalize_reasons(json!(["a", "b"])),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(normalize_reasons(json!([])), None);
        assert_eq!(normalize_reasons(json!(42)), None);
    }
}
