// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! SwapHubu KYC Server - Identity Verification Backend
//!
//! Webhook-driven KYC verification with Shufti Pro: session lifecycle,
//! signed webhook ingestion, decline-code auto-retry and user blocking
//! after exhausted attempts.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `config` - Environment-driven configuration
//! - `notify` - Outbound verification notifications
//! - `policy` - Decline-code retry policy
//! - `providers` - Shufti Pro client and webhook signatures
//! - `service` - Verification orchestrator
//! - `storage` - Embedded database and repositories

pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod policy;
pub mod providers;
pub mod service;
pub mod state;
pub mod storage;
