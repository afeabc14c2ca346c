//! libSQL backend implementing the async store traits.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::billing::model::{Plan, SubscriptionRecord};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, GenerationRecord, GenerationStore, SubscriptionStore, UsageStore,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_count(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

/// Map a libsql Row to a SubscriptionRecord.
///
/// Column order matches SUBSCRIPTION_COLUMNS.
fn row_to_subscription(row: &libsql::Row) -> Result<SubscriptionRecord, libsql::Error> {
    let plan_str: String = row.get(3)?;
    let active: i64 = row.get(4)?;
    let period_end_str: Option<String> = row.get(5).ok();

    Ok(SubscriptionRecord {
        email: row.get(0)?,
        external_subscription_id: row.get(1).ok(),
        external_customer_id: row.get(2).ok(),
        plan: Plan::from_str(&plan_str).unwrap_or_default(),
        active: active != 0,
        current_period_end: parse_optional_datetime(&period_end_str),
    })
}

/// Map a libsql Row to a GenerationRecord.
///
/// Column order matches GENERATION_COLUMNS.
fn row_to_generation(row: &libsql::Row) -> Result<GenerationRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("generation row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let bundle_str: String = row.get(7).map_err(parse)?;
    let input_tokens: i64 = row.get(9).map_err(parse)?;
    let output_tokens: i64 = row.get(10).map_err(parse)?;
    let cost_str: String = row.get(11).map_err(parse)?;
    let created_str: String = row.get(12).map_err(parse)?;

    Ok(GenerationRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        email: row.get(1).map_err(parse)?,
        platform: row.get(2).map_err(parse)?,
        industry: row.get(3).map_err(parse)?,
        tone: row.get(4).map_err(parse)?,
        keywords: row.get(5).ok(),
        raw_output: row.get(6).map_err(parse)?,
        bundle: serde_json::from_str(&bundle_str)
            .map_err(|e| DatabaseError::Serialization(format!("generation bundle: {e}")))?,
        model: row.get(8).map_err(parse)?,
        input_tokens: to_count(input_tokens),
        output_tokens: to_count(output_tokens),
        cost: Decimal::from_str(&cost_str).unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const SUBSCRIPTION_COLUMNS: &str =
    "email, external_subscription_id, external_customer_id, plan, active, current_period_end";

const GENERATION_COLUMNS: &str = "id, email, platform, industry, tone, keywords, raw_output, bundle, model, input_tokens, output_tokens, cost, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

// ── Subscriptions ───────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for LibSqlBackend {
    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SubscriptionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_subscription(&row)
                    .map_err(|e| DatabaseError::Query(format!("find_by_email row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_email: {e}"))),
        }
    }

    async fn save(&self, record: &SubscriptionRecord) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let period_end = record.current_period_end.map(|dt| dt.to_rfc3339());

        // Single statement, so the row is never written partially.
        self.conn()
            .execute(
                "INSERT INTO user_subscriptions (email, external_subscription_id, external_customer_id, plan, active, current_period_end, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(email) DO UPDATE SET
                    external_subscription_id = excluded.external_subscription_id,
                    external_customer_id = excluded.external_customer_id,
                    plan = excluded.plan,
                    active = excluded.active,
                    current_period_end = excluded.current_period_end,
                    updated_at = excluded.updated_at",
                params![
                    record.email.as_str(),
                    opt_text(record.external_subscription_id.as_deref()),
                    opt_text(record.external_customer_id.as_deref()),
                    record.plan.as_str(),
                    i64::from(record.active),
                    opt_text(period_end.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_subscription: {e}")))?;

        debug!(email = %record.email, plan = %record.plan, active = record.active, "Subscription saved");
        Ok(())
    }
}

// ── Usage ───────────────────────────────────────────────────────────

#[async_trait]
impl UsageStore for LibSqlBackend {
    async fn daily_usage(&self, email: &str, day: NaiveDate) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT count FROM daily_usage WHERE email = ?1 AND usage_date = ?2",
                params![email, day.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("daily_usage: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("daily_usage row parse: {e}")))?;
                Ok(to_count(count))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("daily_usage: {e}"))),
        }
    }

    async fn increment_daily_usage(
        &self,
        email: &str,
        day: NaiveDate,
    ) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO daily_usage (email, usage_date, count) VALUES (?1, ?2, 1)
                 ON CONFLICT(email) DO UPDATE SET
                    count = CASE WHEN daily_usage.usage_date = excluded.usage_date
                                 THEN daily_usage.count + 1 ELSE 1 END,
                    usage_date = excluded.usage_date
                 RETURNING count",
                params![email, day.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_daily_usage: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("increment_daily_usage row parse: {e}"))
                })?;
                Ok(to_count(count))
            }
            Ok(None) => Err(DatabaseError::Query(
                "increment_daily_usage: no row returned".to_string(),
            )),
            Err(e) => Err(DatabaseError::Query(format!("increment_daily_usage: {e}"))),
        }
    }
}

// ── Generation history ──────────────────────────────────────────────

#[async_trait]
impl GenerationStore for LibSqlBackend {
    async fn insert_generation(&self, record: &GenerationRecord) -> Result<(), DatabaseError> {
        let bundle_json = serde_json::to_string(&record.bundle)
            .map_err(|e| DatabaseError::Serialization(format!("generation bundle: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO generation_history ({GENERATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    record.id.to_string(),
                    record.email.as_str(),
                    record.platform.as_str(),
                    record.industry.as_str(),
                    record.tone.as_str(),
                    opt_text(record.keywords.as_deref()),
                    record.raw_output.as_str(),
                    bundle_json,
                    record.model.as_str(),
                    i64::from(record.input_tokens),
                    i64::from(record.output_tokens),
                    record.cost.to_string(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_generation: {e}")))?;

        debug!(generation_id = %record.id, email = %record.email, "Generation stored");
        Ok(())
    }

    async fn list_generations(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<GenerationRecord>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {GENERATION_COLUMNS} FROM generation_history WHERE email = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![email, limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_generations: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_generation(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping generation row: {e}");
                }
            }
        }
        Ok(records)
    }
}
