// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Shufti Pro identity-verification client.
//!
//! Starts provider-side verification sessions and validates inbound
//! webhook signatures. The signature scheme is the one Shufti Pro
//! documents: `sha256(raw_body || sha256(secret_key))` over the exact
//! raw request bytes, hex-encoded.

use std::time::Duration;

use base64ct::{Base64, Encoding};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::config::KycConfig;
use crate::storage::VerificationStatus;

/// Subject data handed to the provider when opening a session.
#[derive(Debug, Clone)]
pub struct VerificationSubject {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub country: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ShuftiError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Country {0} is not supported for KYC verification")]
    UnsupportedCountry(String),

    #[error("KYC provider request timed out")]
    Timeout,

    #[error("Failed to connect to KYC provider: {0}")]
    Request(String),

    #[error("{message}")]
    Provider {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Invalid response from KYC provider: {0}")]
    InvalidResponse(String),
}

/// Client for the Shufti Pro verification API.
#[derive(Debug, Clone)]
pub struct ShuftiClient {
    client_id: String,
    secret_key: String,
    base_url: String,
    callback_url: String,
    verification_ttl: u64,
    show_results: bool,
    supported_countries: Vec<String>,
    supported_document_types: Vec<String>,
    http: Client,
}

impl ShuftiClient {
    pub fn new(config: &KycConfig) -> Result<Self, ShuftiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout))
            .build()
            .map_err(|e| ShuftiError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client_id: config.shufti_client_id.clone(),
            secret_key: config.shufti_secret_key.clone(),
            base_url: config.shufti_base_url.trim_end_matches('/').to_string(),
            callback_url: config.callback_url.clone(),
            verification_ttl: config.verification_ttl,
            // Results pages are only surfaced in development deployments.
            show_results: config.is_development(),
            supported_countries: config.supported_countries.clone(),
            supported_document_types: config.supported_document_types.clone(),
            http,
        })
    }

    /// Open a verification session with the provider.
    ///
    /// Returns the provider's parsed JSON response; it carries at least an
    /// `event` field (e.g. `request.pending`) and usually a
    /// `verification_url` for the user to complete the flow.
    pub async fn start_verification(
        &self,
        reference: &str,
        subject: &VerificationSubject,
    ) -> Result<Value, ShuftiError> {
        info!(reference, "starting KYC verification session");

        if subject.first_name.trim().is_empty() {
            return Err(ShuftiError::MissingField("first_name"));
        }
        if subject.last_name.trim().is_empty() {
            return Err(ShuftiError::MissingField("last_name"));
        }
        if subject.email.trim().is_empty() {
            return Err(ShuftiError::MissingField("email"));
        }
        if subject.country.trim().is_empty() {
            return Err(ShuftiError::MissingField("country"));
        }

        let country = subject.country.trim().to_ascii_uppercase();
        if !self.supported_countries.iter().any(|c| c == &country) {
            return Err(ShuftiError::UnsupportedCountry(country));
        }

        let payload = json!({
            "reference": reference,
            "callback_url": self.callback_url,
            "email": subject.email,
            "country": country,
            "language": "EN",
            "verification_mode": "any",
            "ttl": self.verification_ttl,
            "show_results": if self.show_results { "1" } else { "0" },
            "document": {
                "supported_types": self.supported_document_types,
                "name": {
                    "first_name": subject.first_name,
                    "last_name": subject.last_name,
                },
            },
            "face": {},
            "allow_online": 1,
            "allow_offline": 1,
            "allow_retry": 1,
        });

        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .header("Authorization", format!("Basic {}", self.basic_credentials()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(reference, "timeout while calling Shufti Pro API");
                    ShuftiError::Timeout
                } else {
                    error!(reference, error = %e, "request error while calling Shufti Pro API");
                    ShuftiError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(reference, status = status.as_u16(), "Shufti Pro API response");

        if status.is_success() {
            let result: Value = response
                .json()
                .await
                .map_err(|e| ShuftiError::InvalidResponse(e.to_string()))?;
            info!(reference, "KYC verification session started");
            return Ok(result);
        }

        let body = response.text().await.unwrap_or_default();
        Err(parse_provider_error(status.as_u16(), &body))
    }

    /// Validate a webhook signature against the raw request body.
    ///
    /// The payload must be the undecoded bytes as received on the wire;
    /// re-serializing the JSON changes the byte layout and breaks the
    /// digest. Returns false on any mismatch, never an error.
    pub fn verify_webhook(&self, payload: &[u8], signature: &str) -> bool {
        // Provider signatures are 64 hex chars; anything shorter is garbage.
        if signature.len() < 8 {
            warn!("invalid signature format received");
            return false;
        }

        let expected = webhook_signature(payload, &self.secret_key);
        let received = signature.to_ascii_lowercase();

        // ct_eq yields false for mismatched lengths without early exit.
        expected.as_bytes().ct_eq(received.as_bytes()).into()
    }

    fn basic_credentials(&self) -> String {
        Base64::encode_string(format!("{}:{}", self.client_id, self.secret_key).as_bytes())
    }
}

/// Compute the expected webhook signature for a raw payload.
///
/// `hex(sha256(payload || hex(sha256(secret_key))))` per the provider's
/// documented scheme.
pub fn webhook_signature(payload: &[u8], secret_key: &str) -> String {
    let secret_hash = hex_digest(secret_key.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(secret_hash.as_bytes());
    to_hex(&hasher.finalize())
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Derive the initial record status from a session-start response.
///
/// Events look like `request.pending`; the segment after the dot is the
/// status. Anything unparseable falls back to `initiated`.
pub fn session_status_from_event(result: &Value) -> VerificationStatus {
    let event = result.get("event").and_then(Value::as_str).unwrap_or("");
    match event.split_once('.').map(|(_, status)| status) {
        Some("pending") => VerificationStatus::Pending,
        Some(_) | None => VerificationStatus::Initiated,
    }
}

fn parse_provider_error(status: u16, body: &str) -> ShuftiError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let message = match &parsed {
        Some(value) => {
            let error = value.get("error").cloned().unwrap_or(Value::Null);
            let detail = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            let code = error.get("code").and_then(Value::as_str).unwrap_or("");

            match (code, status) {
                ("400", _) => format!("Bad request: {detail}"),
                ("401", _) | (_, 401) => {
                    format!("Authentication failed. Check your API credentials. Details: {detail}")
                }
                ("403", _) => {
                    format!("Access forbidden. Your account may be restricted. Details: {detail}")
                }
                ("404", _) => format!("Resource not found. Details: {detail}"),
                ("409", _) => {
                    format!("Duplicate reference ID. Please use a unique reference. Details: {detail}")
                }
                ("429", _) => {
                    format!("Rate limit exceeded. Please try again later. Details: {detail}")
                }
                ("500", _) => {
                    format!("Shufti Pro server error. Please try again later. Details: {detail}")
                }
                _ => format!("Shufti Pro API error: {status}. Details: {detail}"),
            }
        }
        None => format!("Shufti Pro API error: {status}"),
    };

    error!(status, %message, "Shufti Pro API error");

    ShuftiError::Provider {
        status,
        message,
        body: body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, DEFAULT_DOCUMENT_TYPES, DEFAULT_SUPPORTED_COUNTRIES};

    fn test_config() -> KycConfig {
        KycConfig {
            shufti_client_id: "client-id".to_string(),
            shufti_secret_key: "super-secret".to_string(),
            shufti_base_url: "https://api.shuftipro.com".to_string(),
            callback_url: "https://example.com/v1/kyc/webhook".to_string(),
            verification_ttl: 3_600,
            webhook_timeout: 30,
            max_verification_attempts: 3,
            environment: Environment::Development,
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

    fn test_client() -> ShuftiClient {
        ShuftiClient::new(&test_config()).expect("build client")
    }

    fn subject() -> VerificationSubject {
        VerificationSubject {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            country: "GB".to_string(),
        }
    }

    #[test]
    fn signature_round_trips() {
        let client = test_client();
        let payload = br#"{"reference":"KYC_1","event":"verification.accepted"}"#;
        let signature = webhook_signature(payload, "super-secret");

        assert!(client.verify_webhook(payload, &signature));
    }

    #[test]
    fn signature_rejects_flipped_payload_byte() {
        let client = test_client();
        let payload = br#"{"reference":"KYC_1","event":"verification.accepted"}"#.to_vec();
        let signature = webhook_signature(&payload, "super-secret");

        let mut tampered = payload.clone();
        tampered[10] ^= 0x01;
        assert!(!client.verify_webhook(&tampered, &signature));
    }

    #[test]
    fn signature_rejects_flipped_signature_char() {
        let client = test_client();
        let payload = br#"{"reference":"KYC_1"}"#;
        let mut signature = webhook_signature(payload, "super-secret");

        let flipped = if signature.ends_with('0') { '1' } else { '0' };
        signature.pop();
        signature.push(flipped);
        assert!(!client.verify_webhook(payload, &signature));
    }

    #[test]
    fn signature_rejects_wrong_secret() {
        let client = test_client();
        let payload = br#"{"reference":"KYC_1"}"#;
        let signature = webhook_signature(payload, "other-secret");
        assert!(!client.verify_webhook(payload, &signature));
    }

    #[test]
    fn signature_short_circuits_on_empty_or_malformed() {
        let client = test_client();
        assert!(!client.verify_webhook(b"{}", ""));
        assert!(!client.verify_webhook(b"{}", "abc"));
    }

    #[test]
    fn signature_comparison_is_case_insensitive() {
        let client = test_client();
        let payload = br#"{"reference":"KYC_1"}"#;
        let signature = webhook_signature(payload, "super-secret").to_ascii_uppercase();
        assert!(client.verify_webhook(payload, &signature));
    }

    #[tokio::test]
    async fn start_verification_rejects_missing_fields() {
        let client = test_client();
        let mut incomplete = subject();
        incomplete.email = String::new();

        let err = client
            .start_verification("KYC_1", &incomplete)
            .await
            .expect_err("should reject");
        assert!(matches!(err, ShuftiError::MissingField("email")));
    }

    #[tokio::test]
    async fn start_verification_rejects_unsupported_country() {
        let client = test_client();
        let mut martian = subject();
        martian.country = "XX".to_string();

        let err = client
            .start_verification("KYC_1", &martian)
            .await
            .expect_err("should reject");
        assert!(matches!(err, ShuftiError::UnsupportedCountry(code) if code == "XX"));
    }

    #[test]
    fn session_status_maps_pending_event() {
        let result = serde_json::json!({ "event": "request.pending" });
        assert_eq!(
            session_status_from_event(&result),
            VerificationStatus::Pending
        );
    }

    #[test]
    fn session_status_falls_back_to_initiated() {
        assert_eq!(
            session_status_from_event(&serde_json::json!({})),
            VerificationStatus::Initiated
        );
        assert_eq!(
            session_status_from_event(&serde_json::json!({ "event": "weird" })),
            VerificationStatus::Initiated
        );
    }

    #[test]
    fn provider_error_maps_known_codes() {
        let body = r#"{"error":{"code":"409","message":"duplicate","service":"kyc","key":"reference"}}"#;
        let err = parse_provider_error(400, body);
        match err {
            ShuftiError::Provider { status, message, .. } => {
                assert_eq!(status, 400);
                assert!(message.contains("Duplicate reference ID"));
                assert!(message.contains("duplicate"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn provider_error_tolerates_non_json_body() {
        let err = parse_provider_error(502, "<html>bad gateway</html>");
        match err {
            ShuftiError::Provider { status, message, body } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Shufti Pro API error: 502");
                assert!(body.contains("bad gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
