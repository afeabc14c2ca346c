//! Persistence layer: libSQL-backed storage for subscriptions, usage and history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, GenerationRecord, GenerationStore, SubscriptionStore, UsageStore};
