//! Subscription reconciler.
//!
//! Applies verified webhook events to the subscription store. Payload-shape
//! problems are logged and skipped without touching the store; gateway and
//! store failures propagate so the caller can ask the provider to retry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::billing::gateway::SubscriptionGateway;
use crate::billing::model::{EventKind, Plan, SubscriptionRecord, WebhookEvent};
use crate::error::BillingError;
use crate::store::SubscriptionStore;

/// What a reconcile call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// A PRO subscription was created or renewed.
    Activated { email: String },
    /// An existing subscription was marked inactive.
    Deactivated { email: String },
    /// A known event whose payload could not be used. No state changed.
    Skipped { reason: String },
    /// An event type the reconciler does not handle.
    Ignored { event_type: String },
}

/// Identifiers pulled from a checkout or invoice payload.
struct ActivationTarget<'a> {
    email: &'a str,
    subscription_id: &'a str,
    customer_id: &'a str,
}

pub struct SubscriptionReconciler {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn SubscriptionGateway>,
}

impl SubscriptionReconciler {
    pub fn new(store: Arc<dyn SubscriptionStore>, gateway: Arc<dyn SubscriptionGateway>) -> Self {
        Self { store, gateway }
    }

    /// Apply one verified event.
    pub async fn reconcile(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, BillingError> {
        let event_id = event.id.as_deref().unwrap_or("-");
        match &event.kind {
            EventKind::CheckoutSessionCompleted => {
                let email = event
                    .text_at(&["customer_email"])
                    .or_else(|| event.text_at(&["customer_details", "email"]));
                let target = match Self::target(
                    email,
                    event.text_at(&["subscription"]),
                    event.text_at(&["customer"]),
                ) {
                    Ok(target) => target,
                    Err(reason) => return Ok(skip(event, event_id, reason)),
                };
                self.activate(target).await
            }
            EventKind::InvoicePaymentSucceeded => {
                let subscription_id = event.text_at(&["subscription"]).or_else(|| {
                    event.text_at(&["parent", "subscription_details", "subscription"])
                });
                let target = match Self::target(
                    event.text_at(&["customer_email"]),
                    subscription_id,
                    event.text_at(&["customer"]),
                ) {
                    Ok(target) => target,
                    Err(reason) => return Ok(skip(event, event_id, reason)),
                };
                self.activate(target).await
            }
            EventKind::InvoicePaymentFailed => {
                let Some(email) = event.text_at(&["customer_email"]) else {
                    return Ok(skip(event, event_id, "missing customer_email"));
                };
                self.deactivate(email).await
            }
            EventKind::Unknown(event_type) => {
                info!(event_id, event_type = %event_type, "Ignoring webhook event");
                Ok(ReconcileOutcome::Ignored {
                    event_type: event_type.clone(),
                })
            }
        }
    }

    fn target<'a>(
        email: Option<&'a str>,
        subscription_id: Option<&'a str>,
        customer_id: Option<&'a str>,
    ) -> Result<ActivationTarget<'a>, &'static str> {
        Ok(ActivationTarget {
            email: email.ok_or("missing customer_email")?,
            subscription_id: subscription_id.ok_or("missing subscription id")?,
            customer_id: customer_id.ok_or("missing customer id")?,
        })
    }

    /// Create or renew the PRO subscription for an email.
    async fn activate(
        &self,
        target: ActivationTarget<'_>,
    ) -> Result<ReconcileOutcome, BillingError> {
        let details = self
            .gateway
            .fetch_subscription(target.subscription_id)
            .await
            .map_err(|e| {
                error!(
                    email = %target.email,
                    subscription_id = %target.subscription_id,
                    error = %e,
                    "Failed to fetch subscription from gateway"
                );
                e
            })?;

        let mut record = self
            .store
            .find_by_email(target.email)
            .await?
            .unwrap_or_else(|| SubscriptionRecord::new(target.email));

        record.external_subscription_id = Some(target.subscription_id.to_string());
        record.external_customer_id = Some(target.customer_id.to_string());
        record.plan = Plan::Pro;
        record.active = true;
        if let Some(period_end) = details.period_end {
            record.current_period_end = Some(period_end);
        }

        self.store.save(&record).await?;
        info!(
            email = %record.email,
            subscription_id = %target.subscription_id,
            period_end = ?record.current_period_end,
            "Subscription activated"
        );
        Ok(ReconcileOutcome::Activated {
            email: record.email,
        })
    }

    /// Stop renewal for an email. Plan and period are left as they were.
    async fn deactivate(&self, email: &str) -> Result<ReconcileOutcome, BillingError> {
        let Some(mut record) = self.store.find_by_email(email).await? else {
            return Ok(ReconcileOutcome::Skipped {
                reason: "no subscription for email".to_string(),
            });
        };

        record.active = false;
        self.store.save(&record).await?;
        info!(email = %email, "Subscription deactivated after failed payment");
        Ok(ReconcileOutcome::Deactivated {
            email: record.email,
        })
    }
}

fn skip(event: &WebhookEvent, event_id: &str, reason: &str) -> ReconcileOutcome {
    warn!(
        event_id,
        event_type = event.kind.as_str(),
        reason,
        "Skipping webhook event with unusable payload"
    );
    ReconcileOutcome::Skipped {
        reason: reason.to_string(),
    }
}
