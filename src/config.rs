//! Configuration types.
//!
//! Everything is read once at startup and passed to constructors. Nothing in
//! the content or billing cores reads the environment on its own.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub billing: BillingConfig,
    pub generation: GenerationConfig,
}

/// Text-generation API configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Payment provider configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub api_base: String,
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    /// Price id of the PRO plan used for checkout sessions.
    pub pro_price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Maximum accepted age of a webhook signature timestamp.
    pub signature_tolerance: Duration,
}

/// Generation quota configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Generations per day allowed to users without an active PRO subscription.
    pub free_daily_limit: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: 5,
        }
    }
}

impl AppConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm = LlmConfig {
            api_key: required_secret("GEMINI_API_KEY")?,
            model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            timeout: Duration::from_secs(parse_env("GEMINI_TIMEOUT_SECS", 30)?),
            temperature: parse_env("GEMINI_TEMPERATURE", 0.7)?,
            max_tokens: parse_env("GEMINI_MAX_TOKENS", 2048)?,
        };

        let billing = BillingConfig {
            api_base: env_or("STRIPE_API_BASE", "https://api.stripe.com"),
            secret_key: required_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: required_secret("STRIPE_WEBHOOK_SECRET")?,
            pro_price_id: required("STRIPE_PRICE_PRO")?,
            success_url: env_or("APP_SUCCESS_URL", "http://localhost:3000/billing/success"),
            cancel_url: env_or("APP_CANCEL_URL", "http://localhost:3000/billing/cancel"),
            signature_tolerance: Duration::from_secs(parse_env(
                "STRIPE_SIGNATURE_TOLERANCE_SECS",
                300,
            )?),
        };

        let generation = GenerationConfig {
            free_daily_limit: parse_env("FREE_DAILY_LIMIT", 5)?,
        };

        Ok(Self {
            port: parse_env("CONTENT_FORGE_PORT", 8080)?,
            db_path: PathBuf::from(env_or("CONTENT_FORGE_DB_PATH", "./data/content-forge.db")),
            log_dir: std::env::var("CONTENT_FORGE_LOG_DIR").ok().map(PathBuf::from),
            llm,
            billing,
            generation,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn required_secret(key: &str) -> Result<SecretString, ConfigError> {
    required(key).map(SecretString::from)
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
