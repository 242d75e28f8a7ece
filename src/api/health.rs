// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response. Carries environment name only, never secrets.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

/// Health check endpoint handler.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.service.health();
    Json(HealthResponse {
        status: health.status.to_string(),
        environment: health.environment.to_string(),
        timestamp: health.timestamp,
    })
}
