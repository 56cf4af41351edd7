//! Environment-driven settings.

use std::time::Duration;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub gateway: GatewaySettings,
}

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub base_url: String,
    pub secret_key: String,
    /// Prefix for internally generated transaction references.
    pub reference_prefix: String,
    /// Public base URL of this service, used to build redirect URLs.
    pub callback_base_url: String,
    pub environment: String,
    pub timeout: Duration,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let port = env_or("PORT", "3001").parse().context("PORT is not a number")?;
        let timeout_secs: u64 = env_or("GATEWAY_TIMEOUT_SECS", "15")
            .parse()
            .context("GATEWAY_TIMEOUT_SECS is not a number")?;

        Ok(Self {
            database_url,
            port,
            nats_url: std::env::var("NATS_URL").ok(),
            gateway: GatewaySettings {
                base_url: env_or("FLUTTERWAVE_BASE_URL", "https://api.flutterwave.com/v3"),
                secret_key: env_or("FLUTTERWAVE_SECRET_KEY", ""),
                reference_prefix: env_or("FLUTTERWAVE_PREFIX", "CM"),
                callback_base_url: env_or("API_URL", "http://localhost:3001"),
                environment: env_or("FLUTTERWAVE_ENVIRONMENT", "sandbox"),
                timeout: Duration::from_secs(timeout_secs),
            },
        })
    }
}
