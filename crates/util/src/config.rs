use std::{env, fmt, net::SocketAddr, time::Duration};

/// Address the HTTP server binds to when `APP_BIND_ADDR` is not set. Port
/// matches the deployment the service replaced.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

fn bind_address_from_env() -> Result<SocketAddr, std::net::AddrParseError> {
    env::var("APP_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
}

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Fixed-window ceiling for one rate-limiter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u64,
    pub window: Duration,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    /// Shared secret used to verify inbound webhook signatures.
    pub webhook_shared_secret: String,
    pub redis_url: String,
    /// WhatsApp Cloud API credentials. Both must be present for dispatch to
    /// work; when either is missing the dispatcher reports `Misconfigured`.
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_api_base: String,
    /// Admin API token for order enrichment. Enrichment is disabled when unset.
    pub shopify_admin_token: Option<String>,
    pub shopify_api_version: String,
    /// Country code prepended to local phone numbers without one.
    pub default_country_code: String,
    pub global_rate_limit: RateLimitSettings,
    pub webhook_rate_limit: RateLimitSettings,
    pub messaging_rate_limit: RateLimitSettings,
    pub ledger_ttl: Duration,
    pub http_timeout: Duration,
}

const DEFAULT_WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v17.0/";
const DEFAULT_SHOPIFY_API_VERSION: &str = "2024-01";
const DEFAULT_COUNTRY_CODE: &str = "254";

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = bind_address_from_env().map_err(ConfigError::BindAddress)?;

        let webhook_shared_secret = env::var("WEBHOOK_SHARED_SECRET")
            .map_err(|_| ConfigError::MissingVariable("WEBHOOK_SHARED_SECRET"))?;
        if webhook_shared_secret.is_empty() {
            return Err(ConfigError::MissingVariable("WEBHOOK_SHARED_SECRET"));
        }

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let default_country_code =
            env::var("DEFAULT_COUNTRY_CODE").unwrap_or_else(|_| DEFAULT_COUNTRY_CODE.to_string());
        if default_country_code.is_empty()
            || default_country_code.len() > 3
            || !default_country_code.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ConfigError::InvalidCountryCode(default_country_code));
        }

        Ok(Self {
            bind_addr,
            environment,
            webhook_shared_secret,
            redis_url,
            whatsapp_phone_number_id: optional_var("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_access_token: optional_var("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_api_base: env::var("WHATSAPP_API_BASE")
                .unwrap_or_else(|_| DEFAULT_WHATSAPP_API_BASE.to_string()),
            shopify_admin_token: optional_var("SHOPIFY_ADMIN_TOKEN"),
            shopify_api_version: env::var("SHOPIFY_API_VERSION")
                .unwrap_or_else(|_| DEFAULT_SHOPIFY_API_VERSION.to_string()),
            default_country_code,
            global_rate_limit: rate_limit_from_env(
                "GLOBAL_RATE_LIMIT_MAX",
                300,
                "GLOBAL_RATE_LIMIT_WINDOW_SECS",
                60,
            )?,
            webhook_rate_limit: rate_limit_from_env(
                "WEBHOOK_RATE_LIMIT_MAX",
                50,
                "WEBHOOK_RATE_LIMIT_WINDOW_SECS",
                60,
            )?,
            messaging_rate_limit: rate_limit_from_env(
                "MESSAGING_RATE_LIMIT_MAX",
                30,
                "MESSAGING_RATE_LIMIT_WINDOW_SECS",
                60,
            )?,
            ledger_ttl: Duration::from_secs(u64_from_env("LEDGER_TTL_SECS", 86_400)?),
            http_timeout: Duration::from_secs(u64_from_env("HTTP_TIMEOUT_SECS", 10)?),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn u64_from_env(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn rate_limit_from_env(
    max_name: &'static str,
    max_default: u64,
    window_name: &'static str,
    window_default: u64,
) -> Result<RateLimitSettings, ConfigError> {
    let max_requests = u64_from_env(max_name, max_default)?;
    let window_secs = u64_from_env(window_name, window_default)?;
    if max_requests == 0 || window_secs == 0 {
        return Err(ConfigError::InvalidNumber {
            name: if max_requests == 0 { max_name } else { window_name },
            value: "0".to_string(),
        });
    }
    Ok(RateLimitSettings {
        max_requests,
        window: Duration::from_secs(window_secs),
    })
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    InvalidNumber { name: &'static str, value: String },
    InvalidCountryCode(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(name) => write!(f, "{name} must be set and non-empty"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::InvalidCountryCode(value) => write!(
                f,
                "DEFAULT_COUNTRY_CODE must be 1-3 digits (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
