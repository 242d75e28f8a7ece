// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! Repository layer providing typed access to the embedded database.
//!
//! Each repository provides the persistence operations for one entity
//! type; business decisions live in the service and policy layers.

pub mod users;
pub mod verifications;

pub use users::{StoredUser, UserRepository};
pub use verifications::{StoredVerification, VerificationRepository, VerificationStatus};
