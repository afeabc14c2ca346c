//! Billing data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    #[default]
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Pro => "PRO",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FREE" => Ok(Plan::Free),
            "PRO" => Ok(Plan::Pro),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

/// Persisted subscription state, at most one per email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub email: String,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub plan: Plan,
    pub active: bool,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Fresh record for an email that has never subscribed.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            external_subscription_id: None,
            external_customer_id: None,
            plan: Plan::Free,
            active: false,
            current_period_end: None,
        }
    }

    /// Whether the record grants paid features at `now`.
    pub fn is_entitled_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.current_period_end.is_some_and(|end| end > now)
    }
}

/// Canonical subscription data fetched from the payment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDetails {
    pub period_end: Option<DateTime<Utc>>,
}

/// Webhook event kinds the reconciler knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Unknown(String),
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => EventKind::CheckoutSessionCompleted,
            "invoice.payment_succeeded" => EventKind::InvoicePaymentSucceeded,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::CheckoutSessionCompleted => "checkout.session.completed",
            EventKind::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            EventKind::InvoicePaymentFailed => "invoice.payment_failed",
            EventKind::Unknown(other) => other,
        }
    }
}

/// A verified webhook event. `raw_payload` is the event's `data.object`.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: Option<String>,
    pub kind: EventKind,
    pub raw_payload: Value,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EnvelopeData,
}

#[derive(Deserialize, Default)]
struct EnvelopeData {
    #[serde(default)]
    object: Value,
}

impl WebhookEvent {
    pub fn new(event_type: &str, raw_payload: Value) -> Self {
        Self {
            id: None,
            kind: EventKind::parse(event_type),
            raw_payload,
        }
    }

    /// Parse the provider's `{id, type, data: {object}}` envelope.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(body)?;
        Ok(Self {
            id: envelope.id,
            kind: EventKind::parse(&envelope.event_type),
            raw_payload: envelope.data.object,
        })
    }

    /// Non-blank string at a dotted path inside the payload.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        let mut node = &self.raw_payload;
        for key in path {
            node = node.get(key)?;
        }
        node.as_str().map(str::trim).filter(|s| !s.is_empty())
    }
}
