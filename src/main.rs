// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

use std::{env, net::SocketAddr, path::PathBuf, process, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kyc_server::api::router;
use kyc_server::config::{KycConfig, DATA_DIR_ENV};
use kyc_server::notify::LogNotifier;
use kyc_server::providers::ShuftiClient;
use kyc_server::service::KycService;
use kyc_server::state::AppState;
use kyc_server::storage::KycDatabase;

#[tokio::main]
async fn main() {
    init_tracing();

    // Configuration errors are fatal: a misconfigured verification service
    // must not accept traffic.
    let config = match KycConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, "configuration invalid, refusing to start");
            process::exit(1);
        }
    };

    let data_dir = env::var(DATA_DIR_ENV).unwrap_or_else(|_| "./data".to_string());
    let db_path = PathBuf::from(&data_dir).join("kyc.redb");
    let db = match KycDatabase::open(&db_path) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, path = %db_path.display(), "failed to open database");
            process::exit(1);
        }
    };

    let shufti = match ShuftiClient::new(&config) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build provider client");
            process::exit(1);
        }
    };

    let service = Arc::new(KycService::new(
        Arc::clone(&config),
        shufti,
        db,
        Arc::new(LogNotifier),
    ));
    let state = AppState::new(Arc::clone(&config), service);
    let app = router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, host, port, "invalid bind address");
            process::exit(1);
        }
    };

    info!(
        %addr,
        environment = config.environment.as_str(),
        "KYC server listening (docs at /docs)"
    );

    if let Err(err) = axum_server::bind(addr).serve(app.into_make_service()).await {
        error!(error = %err, "server failed");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
