//! Payment provider gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::billing::model::SubscriptionDetails;
use crate::config::BillingConfig;
use crate::error::GatewayError;

/// Source of canonical subscription data.
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Fetch a subscription by its provider id.
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionDetails, GatewayError>;
}

/// Creates hosted checkout pages for the PRO plan.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Start a checkout for `email` and return the page URL.
    async fn create_checkout_session(&self, email: &str) -> Result<String, GatewayError>;
}

/// Stripe REST client.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    pro_price_id: String,
    success_url: String,
    cancel_url: String,
}

impl StripeGateway {
    pub fn new(config: &BillingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            pro_price_id: config.pro_price_id.clone(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }

    async fn read_json(resource: &str, resp: reqwest::Response) -> Result<Value, GatewayError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("{resource}: {e}")))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                resource: resource.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse {
            resource: resource.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SubscriptionGateway for StripeGateway {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionDetails, GatewayError> {
        let resource = format!("subscription {subscription_id}");
        let resp = self
            .client
            .get(format!("{}/v1/subscriptions/{subscription_id}", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(subscription_id, error = %e, "Subscription lookup failed");
                GatewayError::Transport(format!("{resource}: {e}"))
            })?;

        let body = Self::read_json(&resource, resp).await?;
        Ok(SubscriptionDetails {
            period_end: period_end(&body),
        })
    }
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    async fn create_checkout_session(&self, email: &str) -> Result<String, GatewayError> {
        let resource = "checkout session";
        let form = [
            ("mode", "subscription"),
            ("customer_email", email),
            ("line_items[0][price]", self.pro_price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.success_url.as_str()),
            ("cancel_url", self.cancel_url.as_str()),
        ];

        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{resource}: {e}")))?;

        let body = Self::read_json(resource, resp).await?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse {
                resource: resource.to_string(),
                reason: "missing url".to_string(),
            })?;

        tracing::info!(email, "Checkout session created");
        Ok(url.to_string())
    }
}

/// `current_period_end` from a subscription object.
///
/// Older API versions carry it at the top level; newer ones move it onto the
/// first subscription item.
fn period_end(subscription: &Value) -> Option<DateTime<Utc>> {
    subscription
        .get("current_period_end")
        .and_then(Value::as_i64)
        .or_else(|| {
            subscription
                .pointer("/items/data/0/current_period_end")
                .and_then(Value::as_i64)
        })
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config(api_base: &str) -> BillingConfig {
        BillingConfig {
            api_base: api_base.to_string(),
            secret_key: SecretString::from("sk_test"),
            webhook_secret: SecretString::from("whsec_test"),
            pro_price_id: "price_pro".to_string(),
            success_url: "http://localhost/ok".to_string(),
            cancel_url: "http://localhost/cancel".to_string(),
            signature_tolerance: Duration::from_secs(300),
        }
    }

    #[test]
    fn period_end_reads_top_level() {
        let body = json!({ "id": "sub_1", "current_period_end": 1_900_000_000 });
        assert_eq!(period_end(&body).unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn period_end_falls_back_to_first_item() {
        let body = json!({
            "id": "sub_1",
            "items": { "data": [{ "current_period_end": 1_800_000_000 }] }
        });
        assert_eq!(period_end(&body).unwrap().timestamp(), 1_800_000_000);
    }

    #[test]
    fn period_end_absent() {
        assert_eq!(period_end(&json!({ "id": "sub_1" })), None);
        assert_eq!(period_end(&json!({ "current_period_end": "soon" })), None);
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let gateway = StripeGateway::new(&config("http://localhost:9999/"));
        assert_eq!(gateway.api_base, "http://localhost:9999");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transport_error() {
        let gateway = StripeGateway::new(&config("http://127.0.0.1:1"));
        let err = gateway.fetch_subscription("sub_1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
