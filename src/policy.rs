// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Decline-code retry policy.
//!
//! Pure decision logic invoked when a webhook reports a declined
//! verification. Decline codes are classified against two fixed tables:
//! retry-eligible codes (technical/document-quality issues worth another
//! attempt) and retry-blocked codes (legitimate mismatches that must not
//! be retried). Blocked codes take priority over eligible ones.

use uuid::Uuid;

/// Decline codes that qualify for an automatic retry, with the provider's
/// reason text.
pub const RETRY_ELIGIBLE_CODES: &[(&str, &str)] = &[
    // Document issues
    ("SPDR03", "Document appears to be tampered"),
    ("SPDR48", "Document appears to be photoshopped"),
    ("SPDR89", "Document appears to be fake/forged"),
    ("SPDR04", "Document appears to be a photocopy"),
    ("SPDR05", "Document appears to be a screenshot"),
    ("SPDR06", "Document appears to be digitally altered"),
    ("SPDR07", "Document quality is too poor"),
    ("SPDR08", "Document is blurry or unclear"),
    ("SPDR19", "Face could not be detected in image"),
    ("SPDR15", "Face on document doesn't match camera image"),
    // Face issues (technical/quality)
    ("SPFR01", "Face not clearly visible"),
    ("SPFR02", "Face is blurry or unclear"),
    ("SPFR03", "Face lighting is insufficient"),
    ("SPDR278", "Face proof is altered or photoshopped"),
    ("SPDR01", "Name on document does not match provided name"),
    ("SPDR02", "Date of birth does not match"),
    ("SPFR10", "Face does not match document photo"),
];

/// Decline codes that forbid a retry regardless of other codes present.
/// Empty in the default policy; kept as the extension point that takes
/// priority over eligibility.
pub const RETRY_BLOCKED_CODES: &[(&str, &str)] = &[];

/// Classification of a decline-code set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClassification {
    /// At least one blocked code present; retry forbidden.
    Blocked,
    /// No blocked codes, at least one eligible code.
    Eligible,
    /// No known codes.
    NoMatch,
}

/// Decision produced for a declined verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineOutcome {
    /// Schedule an automatic retry as a new retry_pending record.
    ScheduleRetry {
        retry_reference: String,
        attempt_number: u32,
    },
    /// Retry count exhausted; block the user.
    BlockUser,
    /// No retry offered.
    NoRetry(NoRetryReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRetryReason {
    /// A retry-blocked code was present.
    BlockedCode,
    /// No retry-eligible code was present.
    NoEligibleCode,
}

/// Classify a set of decline codes. Blocked codes win over eligible ones.
pub fn classify_codes(codes: &[String]) -> CodeClassification {
    let mut eligible = false;
    for code in codes {
        if RETRY_BLOCKED_CODES.iter().any(|(c, _)| c == code) {
            return CodeClassification::Blocked;
        }
        if RETRY_ELIGIBLE_CODES.iter().any(|(c, _)| c == code) {
            eligible = true;
        }
    }
    if eligible {
        CodeClassification::Eligible
    } else {
        CodeClassification::NoMatch
    }
}

/// Decide what happens after a decline.
///
/// `declined_count` is the user's historical count of declined records
/// (recomputed from the attempt history, not a stored counter) excluding
/// the decline being processed. `threshold` is the configured maximum
/// before blocking.
pub fn evaluate_decline(
    codes: &[String],
    declined_count: u32,
    threshold: u32,
    original_reference: &str,
) -> DeclineOutcome {
    match classify_codes(codes) {
        CodeClassification::Blocked => DeclineOutcome::NoRetry(NoRetryReason::BlockedCode),
        CodeClassification::NoMatch => DeclineOutcome::NoRetry(NoRetryReason::NoEligibleCode),
        CodeClassification::Eligible => {
            if declined_count < threshold {
                let attempt_number = declined_count + 1;
                DeclineOutcome::ScheduleRetry {
                    retry_reference: retry_reference(attempt_number, original_reference),
                    attempt_number,
                }
            } else {
                DeclineOutcome::BlockUser
            }
        }
    }
}

/// Derive a fresh retry reference from the declined record's reference.
///
/// The random suffix keeps references globally unique even when the same
/// original reference is retried more than once.
pub fn retry_reference(attempt_number: u32, original_reference: &str) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("RETRY_{attempt_number}_{original_reference}_{suffix}")
}

/// Reason text for a known decline code.
pub fn code_reason(code: &str) -> Option<&'static str> {
    RETRY_ELIGIBLE_CODES
        .iter()
        .chain(RETRY_BLOCKED_CODES.iter())
        .find(|(c, _)| *c == code)
        .map(|(_, reason)| *reason)
}
