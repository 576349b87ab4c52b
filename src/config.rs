//! Startup configuration loaded from the environment.
//!
//! Everything the server needs to run is resolved once, before the first
//! connection is accepted. A missing required variable is a fatal
//! [`ConfigError`], never a per-request `Option` check.

use std::net::SocketAddr;

/// Configuration error raised during startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for environment variable {0}: {1}")]
    InvalidVar(&'static str, String),
}

/// Mercado Pago client configuration.
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

/// Blob storage configuration (S3-compatible object store).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub public_base_url: String,
    pub access_token: String,
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Origin used to build checkout back-URLs and the webhook notification URL.
    pub public_base_url: String,
    pub jwt_secret: String,
    /// Shared secret for webhook signature verification. `None` means the
    /// webhook endpoint rejects every request (fail-closed).
    pub webhook_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub mercadopago: MercadoPagoConfig,
    pub storage: StorageConfig,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a required variable is absent or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match optional("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidVar("PORT", e.to_string()))?,
            None => 3001,
        };

        let timeout_ms = match optional("MERCADOPAGO_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidVar("MERCADOPAGO_TIMEOUT_MS", e.to_string()))?,
            None => 15_000,
        };

        let cors_allowed_origins = optional("CORS_ALLOWED_ORIGINS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port,
            public_base_url: optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3001".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            webhook_secret: optional("MERCADOPAGO_WEBHOOK_SECRET"),
            cors_allowed_origins,
            mercadopago: MercadoPagoConfig {
                access_token: required("MERCADOPAGO_ACCESS_TOKEN")?,
                base_url: optional("MERCADOPAGO_BASE_URL")
                    .unwrap_or_else(|| "https://api.mercadopago.com".to_string()),
                timeout_ms,
            },
            storage: StorageConfig {
                base_url: optional("STORAGE_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:9000/trekko".to_string()),
                public_base_url: optional("STORAGE_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:9000/trekko".to_string()),
                access_token: optional("STORAGE_ACCESS_TOKEN").unwrap_or_default(),
            },
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
