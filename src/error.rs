//! Error types for Content Forge.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("Webhook signature error: {0}")]
    Signature(#[from] SignatureError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
///
/// This is the operational failure class for every store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payment gateway errors (network or lookup failure).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Transport(String),

    #[error("Gateway returned {status} for {resource}: {body}")]
    Status {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected gateway response for {resource}: {reason}")]
    InvalidResponse { resource: String, reason: String },
}

/// Webhook signature verification errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature header is malformed")]
    MalformedHeader,

    #[error("Signature header has no timestamp")]
    MissingTimestamp,

    #[error("Signature header has no v1 signature")]
    MissingSignature,

    #[error("Signature timestamp outside tolerance ({age_secs}s old)")]
    TimestampOutOfTolerance { age_secs: u64 },

    #[error("Signature does not match payload")]
    Mismatch,
}

/// Errors surfaced by the subscription reconciler.
///
/// Payload-shape problems are never represented here: they are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Content generation errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Daily limit of {limit} generations reached. Upgrade to PRO for unlimited access.")]
    QuotaExceeded { limit: u32 },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
