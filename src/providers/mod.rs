// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! External identity-verification provider clients.

pub mod shufti;

pub use shufti::{
    session_status_from_event, webhook_signature, ShuftiClient, ShuftiError, VerificationSubject,
};
