//! Store traits for subscriptions, daily usage and generation history.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::model::SubscriptionRecord;
use crate::content::model::ContentBundle;
use crate::error::DatabaseError;

/// A persisted generation, kept for audit and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub email: String,
    pub platform: String,
    pub industry: String,
    pub tone: String,
    pub keywords: Option<String>,
    /// Model output exactly as received.
    pub raw_output: String,
    pub bundle: ContentBundle,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Subscription records keyed by email.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Find the record for an email, if any.
    async fn find_by_email(&self, email: &str)
    -> Result<Option<SubscriptionRecord>, DatabaseError>;

    /// Insert or replace the record for `record.email` in one atomic write.
    async fn save(&self, record: &SubscriptionRecord) -> Result<(), DatabaseError>;
}

/// Per-day generation counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Generations counted for `email` on `day`.
    async fn daily_usage(&self, email: &str, day: NaiveDate) -> Result<u32, DatabaseError>;

    /// Count one more generation and return the new total for `day`.
    async fn increment_daily_usage(&self, email: &str, day: NaiveDate)
    -> Result<u32, DatabaseError>;
}

/// Generation history.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert_generation(&self, record: &GenerationRecord) -> Result<(), DatabaseError>;

    /// Most recent generations for `email`, newest first.
    async fn list_generations(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<GenerationRecord>, DatabaseError>;
}

/// Everything the service persists.
#[async_trait]
pub trait Database: SubscriptionStore + UsageStore + GenerationStore {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
