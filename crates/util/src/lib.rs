//! Shared runtime plumbing: dotenv loading and environment-driven
//! configuration for the notification relay.

pub mod config;

pub use config::{AppConfig, ConfigError, Environment, RateLimitSettings, DEFAULT_BIND_ADDR};

/// Loads environment variables from `.env` when available. Missing files are
/// ignored so deployments without a dotenv file start cleanly.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}
