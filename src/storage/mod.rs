// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! # Persistence Module
//!
//! Embedded ACID storage for users and verification records, backed by
//! redb. Verification records are append-heavy and never deleted: the
//! full attempt history is retained for audit and for computing the
//! decline-retry counter.
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized StoredUser
//! - `verifications`: verification_id → serialized StoredVerification
//! - `reference_index`: provider reference → verification_id (unique)
//! - `user_verification_index`: composite key (user_id|!timestamp|id) →
//!   reference, for newest-first range scans per user

pub mod db;
pub mod repository;

pub use db::{KycDatabase, KycDbError, KycDbResult, TransitionContext, TransitionPlan};
pub use repository::{
    StoredUser, StoredVerification, UserRepository, VerificationRepository, VerificationStatus,
};
