// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Outbound verification notifications.
//!
//! Notifications are strictly post-commit and fire-and-forget: a failure
//! here never rolls back or delays a state transition. The default
//! implementation writes structured log events; a mail or push backend
//! plugs in behind the same trait.

use tracing::info;

/// What happened to the verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Verification accepted by the provider.
    Verified,
    /// Verification declined with no retry offered.
    Declined,
    /// Verification declined, automatic retry scheduled.
    RetryScheduled,
    /// Retry attempts exhausted, user blocked.
    Blocked,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Verified => "verified",
            NotificationKind::Declined => "declined",
            NotificationKind::RetryScheduled => "retry_scheduled",
            NotificationKind::Blocked => "blocked",
        }
    }
}

/// Notification payload handed to the notifier after a transition commits.
#[derive(Debug, Clone)]
pub struct VerificationNotice {
    pub user_id: String,
    pub email: String,
    pub reference: String,
    pub kind: NotificationKind,
}

/// Delivery port for verification outcome notifications.
pub trait VerificationNotifier: Send + Sync + 'static {
    fn verification_completed(&self, notice: &VerificationNotice);
}

/// Notifier that records outcomes as structured log events.
pub struct LogNotifier;

impl VerificationNotifier for LogNotifier {
    fn verification_completed(&self, notice: &VerificationNotice) {
        info!(
            user_id = %notice.user_id,
            email = %notice.email,
            reference = %notice.reference,
            outcome = notice.kind.as_str(),
            "verification notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingNotifier {
        seen: Mutex<Vec<(String, NotificationKind)>>,
    }

    impl VerificationNotifier for RecordingNotifier {
        fn verification_completed(&self, notice: &VerificationNotice) {
            self.seen
                .lock()
                .unwrap()
                .push((notice.reference.clone(), notice.kind));
        }
    }

    #[test]
    fn notifier_receives_notice() {
        let notifier = RecordingNotifier {
            seen: Mutex::new(Vec::new()),
        };
        notifier.verification_completed(&VerificationNotice {
            user_id: "user-1".to_string(),
            email: "ada@example.com".to_string(),
            reference: "KYC_REF_1".to_string(),
            kind: NotificationKind::Verified,
        });

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "KYC_REF_1");
        assert_eq!(seen[0].1, NotificationKind::Verified);
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(NotificationKind::RetryScheduled.as_str(), "retry_scheduled");
        assert_eq!(NotificationKind::Blocked.as_str(), "blocked");
    }
}
