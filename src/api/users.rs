// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! User endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::storage::{KycDbError, StoredUser, UserRepository};
use crate::state::AppState;

/// Request body for POST /v1/users.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: Option<String>,
}

/// Response for user endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub is_verified: bool,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl From<StoredUser> for UserResponse {
    fn from(user: StoredUser) -> Self {
        Self {
            user_id: user.user_id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            country: user.country,
            is_verified: user.is_verified,
            is_blocked: user.is_blocked,
            created_at: user.created_at,
        }
    }
}

/// User ids become storage index-key components, so the character set is
/// restricted: `|` in particular would break per-user key-prefix isolation.
fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Register a user for verification.
#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "User created", body = UserResponse),
        (status = 400, description = "Missing or invalid user ID"),
        (status = 409, description = "User already exists"),
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if !is_valid_user_id(&request.user_id) {
        return Err(ApiError::bad_request(
            "user_id must be non-empty and contain only letters, digits, '-' or '_'",
        ));
    }

    let user = StoredUser::new(
        request.user_id,
        request.first_name,
        request.last_name,
        request.email,
        request
            .country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty()),
    );

    UserRepository::new(state.service.database())
        .create(&user)
        .map_err(|err| match err {
            KycDbError::AlreadyExists(_) => ApiError::conflict("User already exists"),
            other => {
                error!(error = %other, "failed to create user");
                ApiError::internal("Internal server error")
            }
        })?;

    Ok(Json(user.into()))
}

/// Get a user by ID.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserResponse),
        (status = 404, description = "User not found"),
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = UserRepository::new(state.service.database())
        .get(&user_id)
        .map_err(|err| match err {
            KycDbError::NotFound(_) => ApiError::not_found("User not found"),
            other => {
                error!(error = %other, "failed to load user");
                ApiError::internal("Internal server error")
            }
        })?;
    Ok(Json(user.into()))
}
