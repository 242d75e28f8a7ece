// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

use std::sync::Arc;

use crate::config::KycConfig;
use crate::service::KycService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KycConfig>,
    pub service: Arc<KycService>,
}

impl AppState {
    pub fn new(config: Arc<KycConfig>, service: Arc<KycService>) -> Self {
        Self { config, service }
    }
}
