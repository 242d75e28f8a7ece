// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! KYC verification endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::service::{ServiceError, StartOutcome, StatusReport};
use crate::state::AppState;
use crate::storage::VerificationStatus;

/// Header names the provider uses to carry the webhook signature.
const SIGNATURE_HEADERS: [&str; 3] = ["signature", "sp_signature", "x-signature"];

/// Response for verification start and retry.
#[derive(Debug, Serialize, ToSchema)]
pub struct KycStartResponse {
    pub verification_id: String,
    /// Provider-facing reference for this session.
    pub reference: String,
    /// URL the user visits to complete verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
}

impl From<StartOutcome> for KycStartResponse {
    fn from(outcome: StartOutcome) -> Self {
        Self {
            verification_id: outcome.verification_id,
            reference: outcome.reference,
            verification_url: outcome.verification_url,
        }
    }
}

/// Response for GET /v1/kyc/status/{user_id}.
#[derive(Debug, Serialize, ToSchema)]
pub struct KycStatusResponse {
    pub verification_id: String,
    pub status: VerificationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reasons: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<StatusReport> for KycStatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            verification_id: report.verification_id,
            status: report.status,
            submitted_at: report.submitted_at,
            reviewed_at: report.reviewed_at,
            is_completed: report.is_completed,
            verification_url: report.verification_url,
            decline_reasons: report.decline_reasons,
            verification_details: report.verification_details,
            message: report.message,
        }
    }
}

/// Generic webhook acknowledgment. The provider only needs 200 semantics.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub message: String,
}

/// Start KYC verification for a user.
#[utoipa::path(
    post,
    path = "/v1/kyc/start/{user_id}",
    tag = "KYC",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Verification started", body = KycStartResponse),
        (status = 400, description = "Incomplete profile or provider error"),
        (status = 403, description = "User is blocked"),
        (status = 404, description = "User not found"),
    )
)]
pub async fn start_verification(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycStartResponse>, ApiError> {
    let outcome = state
        .service
        .start_verification(&user_id)
        .await
        .map_err(map_service_error)?;
    Ok(Json(outcome.into()))
}

/// Start the provider session for a scheduled retry.
#[utoipa::path(
    post,
    path = "/v1/kyc/retry/{user_id}",
    tag = "KYC",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Retry verification started", body = KycStartResponse),
        (status = 400, description = "No retry scheduled or provider error"),
        (status = 403, description = "User is blocked"),
        (status = 404, description = "User not found"),
    )
)]
pub async fn start_retry(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycStartResponse>, ApiError> {
    let outcome = state
        .service
        .start_retry(&user_id)
        .await
        .map_err(map_service_error)?;
    Ok(Json(outcome.into()))
}

/// Get the user's latest verification status.
#[utoipa::path(
    get,
    path = "/v1/kyc/status/{user_id}",
    tag = "KYC",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Latest verification status", body = KycStatusResponse),
        (status = 404, description = "User or verification not found"),
    )
)]
pub async fn get_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<KycStatusResponse>, ApiError> {
    let report = state
        .service
        .status(&user_id)
        .map_err(map_service_error)?
        .ok_or_else(|| ApiError::not_found("No verification found for this user"))?;
    Ok(Json(report.into()))
}

/// Provider webhook callback.
///
/// The body is taken as raw bytes; signature verification runs over the
/// exact wire payload before any JSON parsing.
#[utoipa::path(
    post,
    path = "/v1/kyc/webhook",
    tag = "KYC",
    request_body(content = Vec<u8>, content_type = "application/json"),
    responses(
        (status = 200, description = "Webhook processed", body = WebhookAck),
        (status = 400, description = "Invalid payload or signature"),
        (status = 404, description = "Unknown reference"),
    )
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok());

    state
        .service
        .process_webhook(&body, signature)
        .await
        .map_err(map_service_error)?;

    Ok(Json(WebhookAck {
        status: "success".to_string(),
        message: "Webhook processed successfully".to_string(),
    }))
}

pub(super) fn map_service_error(err: ServiceError) -> ApiError {
    match err {
        ServiceError::UserNotFound | ServiceError::VerificationNotFound => {
            ApiError::not_found(err.to_string())
        }
        ServiceError::Blocked => ApiError::forbidden(err.to_string()),
        ServiceError::NoRetryFound
        | ServiceError::IncompleteProfile
        | ServiceError::EmptyWebhookPayload
        | ServiceError::MissingSignature
        | ServiceError::InvalidSignature
        | ServiceError::InvalidJson
        | ServiceError::MissingReference
        | ServiceError::Provider(_) => ApiError::bad_request(err.to_string()),
        ServiceError::Storage(inner) => {
            error!(error = %inner, "storage failure while handling request");
            ApiError::internal("Internal server error")
        }
    }
}
