// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SwapHubu

//! # Runtime Configuration
//!
//! KYC service configuration loaded from the environment at startup.
//! Missing or invalid values fail the boot, never a request.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `SHUFTI_CLIENT_ID` | Shufti Pro client ID (required) |
//! | `SHUFTI_SECRET_KEY` | Shufti Pro secret key (required) |
//! | `SHUFTI_BASE_URL` | Shufti Pro API base URL (required) |
//! | `CALLBACK_URL` | Webhook callback URL registered with the provider (required) |
//! | `VERIFICATION_TTL` | Session time-to-live in seconds, 3600..=43200 (required) |
//! | `WEBHOOK_TIMEOUT` | Outbound provider request timeout in seconds (required) |
//! | `MAX_VERIFICATION_ATTEMPTS` | Max verification attempts per user, 1..=10 (required) |
//! | `ENVIRONMENT` | `development` or `production` (required) |
//! | `HOST` / `PORT` | Server bind address, defaults `0.0.0.0:8080` |
//! | `DATA_DIR` | Database directory, default `./data` |
//! | `LOG_FORMAT` | `json` or `pretty`, default `pretty` |

use url::Url;

/// Environment variable name for the database directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Shufti Pro enforces a 1 hour minimum session TTL.
pub const MIN_VERIFICATION_TTL: u64 = 3_600;
/// Shufti Pro enforces a 12 hour maximum session TTL.
pub const MAX_VERIFICATION_TTL: u64 = 43_200;

/// Document types accepted for verification by default.
pub const DEFAULT_DOCUMENT_TYPES: [&str; 3] = ["passport", "id_card", "driving_license"];

/// ISO 3166-1 alpha-2 codes accepted for verification by default.
pub const DEFAULT_SUPPORTED_COUNTRIES: [&str; 237] = [
    "AF", "AL", "DZ", "AS", "AD", "AO", "AI", "AQ", "AG", "AR", "AM", "AW", "AU", "AT", "AZ",
    "BS", "BH", "BD", "BB", "BY", "BE", "BZ", "BJ", "BM", "BT", "BO", "BA", "BW", "BV", "BR",
    "IO", "BN", "BG", "BF", "BI", "KH", "CM", "CA", "CV", "KY", "CF", "TD", "CL", "CN", "CX",
    "CC", "CO", "KM", "CG", "CD", "CK", "CR", "CI", "HR", "CU", "CY", "CZ", "DK", "DJ", "DM",
    "DO", "EC", "EG", "SV", "GQ", "ER", "EE", "ET", "FK", "FO", "FJ", "FI", "FR", "GF", "PF",
    "TF", "GA", "GM", "GE", "DE", "GH", "GI", "GR", "GL", "GD", "GP", "GU", "GT", "GN", "GW",
    "GY", "HT", "HM", "VA", "HN", "HK", "HU", "IS", "IN", "ID", "IR", "IQ", "IE", "IL", "IT",
    "JM", "JP", "JO", "KZ", "KE", "KI", "KP", "KR", "KW", "KG", "LA", "LV", "LB", "LS", "LR",
    "LY", "LI", "LT", "LU", "MO", "MK", "MG", "MW", "MY", "MV", "ML", "MT", "MH", "MQ", "MR",
    "MU", "YT", "MX", "FM", "MD", "MC", "MN", "MS", "MA", "MZ", "MM", "NA", "NR", "NP", "NL",
    "NC", "NZ", "NI", "NE", "NG", "NU", "NF", "MP", "NO", "OM", "PK", "PW", "PS", "PA", "PG",
    "PY", "PE", "PH", "PN", "PL", "PT", "PR", "QA", "RE", "RO", "RU", "RW", "SH", "KN", "LC",
    "PM", "VC", "WS", "SM", "ST", "SA", "SN", "SC", "SL", "SG", "SK", "SI", "SB", "SO", "ZA",
    "GS", "ES", "LK", "SD", "SR", "SJ", "SZ", "SE", "CH", "SY", "TW", "TJ", "TZ", "TH", "TL",
    "TG", "TK", "TO", "TT", "TN", "TR", "TM", "TC", "TV", "UG", "UA", "AE", "GB", "US", "UM",
    "UY", "UZ", "VU", "VE", "VN", "VG", "VI", "WF", "EH", "YE", "ZM", "ZW",
];

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// KYC service configuration. Constructed once in `main` and shared by
/// reference through the application state.
#[derive(Debug, Clone)]
pub struct KycConfig {
    pub shufti_client_id: String,
    pub shufti_secret_key: String,
    pub shufti_base_url: String,
    pub callback_url: String,
    /// Session TTL in seconds handed to the provider.
    pub verification_ttl: u64,
    /// Outbound provider request timeout in seconds.
    pub webhook_timeout: u64,
    /// Maximum verification attempts per user before blocking.
    pub max_verification_attempts: u32,
    pub environment: Environment,
    pub supported_document_types: Vec<String>,
    pub supported_countries: Vec<String>,
}

impl KycConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let shufti_client_id = env_required("SHUFTI_CLIENT_ID")?;
        let shufti_secret_key = env_required("SHUFTI_SECRET_KEY")?;
        let shufti_base_url = env_url("SHUFTI_BASE_URL")?;
        let callback_url = env_url("CALLBACK_URL")?;

        let verification_ttl = env_parse::<u64>("VERIFICATION_TTL")?;
        if !(MIN_VERIFICATION_TTL..=MAX_VERIFICATION_TTL).contains(&verification_ttl) {
            return Err(ConfigError::Invalid {
                name: "VERIFICATION_TTL",
                reason: format!(
                    "must be between {MIN_VERIFICATION_TTL} and {MAX_VERIFICATION_TTL} seconds"
                ),
            });
        }

        let webhook_timeout = env_parse::<u64>("WEBHOOK_TIMEOUT")?;
        if webhook_timeout == 0 {
            return Err(ConfigError::Invalid {
                name: "WEBHOOK_TIMEOUT",
                reason: "must be at least 1 second".to_string(),
            });
        }

        let max_verification_attempts = env_parse::<u32>("MAX_VERIFICATION_ATTEMPTS")?;
        if !(1..=10).contains(&max_verification_attempts) {
            return Err(ConfigError::Invalid {
                name: "MAX_VERIFICATION_ATTEMPTS",
                reason: "must be between 1 and 10".to_string(),
            });
        }

        let environment = match env_required("ENVIRONMENT")?.as_str() {
            "development" => Environment::Development,
            "production" => Environment::Production,
            other => {
                return Err(ConfigError::Invalid {
                    name: "ENVIRONMENT",
                    reason: format!("must be `development` or `production`, got `{other}`"),
                })
            }
        };

        Ok(Self {
            shufti_client_id,
            shufti_secret_key,
            shufti_base_url,
            callback_url,
            verification_ttl,
            webhook_timeout,
            max_verification_attempts,
            environment,
            supported_document_types: DEFAULT_DOCUMENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            supported_countries: DEFAULT_SUPPORTED_COUNTRIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Number of historical declines after which the next retry-eligible
    /// decline blocks the user instead of scheduling another retry.
    ///
    /// With the default of 3 attempts the threshold is 2: the third decline
    /// is final.
    pub fn decline_retry_threshold(&self) -> u32 {
        self.max_verification_attempts.saturating_sub(1)
    }

    pub fn supports_country(&self, country: &str) -> bool {
        let code = country.trim().to_ascii_uppercase();
        self.supported_countries.iter().any(|c| c == &code)
    }
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                Err(ConfigError::Missing(name))
            } else {
                Ok(trimmed)
            }
        }
        Err(_) => Err(ConfigError::Missing(name)),
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<T, ConfigError> {
    let raw = env_required(name)?;
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("`{raw}` is not a valid number"),
    })
}

fn env_url(name: &'static str) -> Result<String, ConfigError> {
    let raw = env_required(name)?;
    Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("`{raw}` is not a valid URL: {e}"),
    })?;
    Ok(raw.trim_end_matches('/').to_string())
}
