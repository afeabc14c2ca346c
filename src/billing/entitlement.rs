//! PRO entitlement check, recomputed from stored fields on every call.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::SubscriptionStore;

#[derive(Clone)]
pub struct Entitlements {
    store: Arc<dyn SubscriptionStore>,
}

impl Entitlements {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Whether `email` currently has an active, unexpired PRO subscription.
    pub async fn is_pro(&self, email: &str) -> Result<bool, DatabaseError> {
        self.is_pro_at(email, Utc::now()).await
    }

    pub async fn is_pro_at(&self, email: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        Ok(self
            .store
            .find_by_email(email)
            .await?
            .is_some_and(|record| record.is_entitled_at(now)))
    }
}
