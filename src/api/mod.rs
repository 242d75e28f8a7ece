// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;
use crate::storage::{StoredUser, StoredVerification, VerificationStatus};

pub mod health;
pub mod kyc;
pub mod users;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/kyc/start/{user_id}", post(kyc::start_verification))
        .route("/kyc/retry/{user_id}", post(kyc::start_retry))
        .route("/kyc/status/{user_id}", get(kyc::get_status))
        .route("/kyc/webhook", post(kyc::webhook))
        .route("/users", post(users::create_user))
        .route("/users/{user_id}", get(users::get_user));

    Router::new()
        .nest("/v1", v1_routes)
        .route("/health", get(health::health))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        kyc::start_verification,
        kyc::start_retry,
        kyc::get_status,
        kyc::webhook,
        users::create_user,
        users::get_user,
        health::health
    ),
    components(
        schemas(
            kyc::KycStartResponse,
            kyc::KycStatusResponse,
            kyc::WebhookAck,
            users::CreateUserRequest,
            users::UserResponse,
            health::HealthResponse,
            StoredUser,
            StoredVerification,
            VerificationStatus
        )
    ),
    tags(
        (name = "KYC", description = "Identity verification lifecycle"),
        (name = "Users", description = "User registration and lookup"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;
