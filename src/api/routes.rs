//! REST endpoints for generation, history and billing.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::billing::signature::{SIGNATURE_HEADER, verify_signature};
use crate::billing::{
    CheckoutGateway, Entitlements, ReconcileOutcome, StripeGateway, SubscriptionReconciler,
    WebhookEvent,
};
use crate::config::AppConfig;
use crate::content::{GenerateRequest, GenerationService};
use crate::error::{BillingError, GenerationError};
use crate::llm::create_provider;
use crate::store::LibSqlBackend;

/// Header carrying the caller's identity, set by the fronting auth layer.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

/// Webhook verification settings.
#[derive(Clone)]
pub struct WebhookSettings {
    pub secret: SecretString,
    pub tolerance: Duration,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub generation: Arc<GenerationService>,
    pub reconciler: Arc<SubscriptionReconciler>,
    pub entitlements: Entitlements,
    pub checkout: Arc<dyn CheckoutGateway>,
    pub webhook: WebhookSettings,
}

impl AppState {
    /// Open the database and wire every service from configuration.
    pub async fn from_config(config: &AppConfig) -> crate::error::Result<Self> {
        let db = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
        let llm = create_provider(&config.llm)?;
        let stripe = Arc::new(StripeGateway::new(&config.billing));
        let entitlements = Entitlements::new(db.clone());

        let generation = Arc::new(GenerationService::new(
            llm,
            db.clone(),
            db.clone(),
            entitlements.clone(),
            config.generation.clone(),
        ));
        let reconciler = Arc::new(SubscriptionReconciler::new(db, stripe.clone()));

        Ok(Self {
            generation,
            reconciler,
            entitlements,
            checkout: stripe,
            webhook: WebhookSettings {
                secret: config.billing.webhook_secret.clone(),
                tolerance: config.billing.signature_tolerance,
            },
        })
    }
}

/// Build the Axum router with all REST routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/generate", post(generate))
        .route("/api/v1/history", get(history))
        .route("/api/v1/billing/status", get(billing_status))
        .route("/api/v1/billing/checkout", post(checkout))
        .route("/api/v1/billing/webhook", post(webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Caller email from the identity header.
fn caller_email(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing user identity"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "content-forge"
    }))
}

// ── Generation ──────────────────────────────────────────────────────────

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let email = match caller_email(&headers) {
        Ok(email) => email,
        Err(resp) => return resp,
    };

    match state.generation.generate_for_user(&email, req).await {
        Ok(content) => Json(content).into_response(),
        Err(e) => generation_error_response(&e),
    }
}

fn generation_error_response(err: &GenerationError) -> Response {
    match err {
        GenerationError::InvalidRequest(_) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        GenerationError::QuotaExceeded { .. } => {
            error_response(StatusCode::FORBIDDEN, err.to_string())
        }
        GenerationError::Llm(e) => {
            error!(error = %e, "Generation failed at the model");
            error_response(StatusCode::BAD_GATEWAY, "content generation failed")
        }
        GenerationError::Store(e) => {
            error!(error = %e, "Generation failed at the store");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let email = match caller_email(&headers) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match state.generation.history(&email, limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => generation_error_response(&e),
    }
}

// ── Billing ─────────────────────────────────────────────────────────────

async fn billing_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let email = match caller_email(&headers) {
        Ok(email) => email,
        Err(resp) => return resp,
    };

    match state.entitlements.is_pro(&email).await {
        Ok(pro) => Json(json!({ "email": email, "pro": pro })).into_response(),
        Err(e) => {
            error!(email = %email, error = %e, "Entitlement lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn checkout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let email = match caller_email(&headers) {
        Ok(email) => email,
        Err(resp) => return resp,
    };

    match state.checkout.create_checkout_session(&email).await {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(e) => {
            error!(email = %email, error = %e, "Checkout session creation failed");
            error_response(StatusCode::BAD_GATEWAY, "payment provider unavailable")
        }
    }
}

/// POST /api/v1/billing/webhook
///
/// Verifies the signature, then hands the event to the reconciler. Unusable
/// payloads are acknowledged with 200 so the provider stops retrying them;
/// gateway and store failures return 5xx so it tries again.
async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("Webhook without signature header");
        return error_response(StatusCode::BAD_REQUEST, "missing signature");
    };

    if let Err(e) = verify_signature(
        &body,
        signature,
        state.webhook.secret.expose_secret(),
        state.webhook.tolerance,
        Utc::now(),
    ) {
        warn!(error = %e, "Rejected webhook");
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let payload = String::from_utf8_lossy(&body);
    let event = match WebhookEvent::from_json(&payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Skipping unparsable webhook envelope");
            let outcome = ReconcileOutcome::Skipped {
                reason: "malformed event envelope".to_string(),
            };
            return Json(json!({ "received": true, "result": outcome })).into_response();
        }
    };

    match state.reconciler.reconcile(&event).await {
        Ok(outcome) => Json(json!({ "received": true, "result": outcome })).into_response(),
        Err(BillingError::Gateway(e)) => {
            error!(event_type = event.kind.as_str(), error = %e, "Webhook reconcile hit gateway failure");
            error_response(StatusCode::BAD_GATEWAY, "payment provider unavailable")
        }
        Err(BillingError::Store(e)) => {
            error!(event_type = event.kind.as_str(), error = %e, "Webhook reconcile hit store failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_email_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("  ann@example.com "));
        assert_eq!(caller_email(&headers).unwrap(), "ann@example.com");
    }

    #[test]
    fn missing_or_blank_identity_is_unauthorized() {
        let resp = caller_email(&HeaderMap::new()).unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("   "));
        assert_eq!(caller_email(&headers).unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn generation_errors_map_to_status_codes() {
        let cases = [
            (GenerationError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (GenerationError::QuotaExceeded { limit: 5 }, StatusCode::FORBIDDEN),
            (
                GenerationError::Llm(crate::error::LlmError::RequestFailed {
                    provider: "p".into(),
                    reason: "r".into(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GenerationError::Store(crate::error::DatabaseError::Query("q".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(generation_error_response(&err).status(), status);
        }
    }

    fn test_config(db_path: std::path::PathBuf) -> AppConfig {
        AppConfig {
            port: 0,
            db_path,
            log_dir: None,
            llm: crate::config::LlmConfig {
                api_key: SecretString::from("test-key"),
                model: "gemini-2.0-flash".into(),
                timeout: Duration::from_secs(5),
                temperature: 0.7,
                max_tokens: 256,
            },
            billing: crate::config::BillingConfig {
                api_base: "http://127.0.0.1:1".into(),
                secret_key: SecretString::from("sk_test"),
                webhook_secret: SecretString::from("whsec_test"),
                pro_price_id: "price_pro".into(),
                success_url: "http://localhost/ok".into(),
                cancel_url: "http://localhost/cancel".into(),
                signature_tolerance: Duration::from_secs(300),
            },
            generation: crate::config::GenerationConfig::default(),
        }
    }

    #[tokio::test]
    async fn state_from_config_opens_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("nested").join("forge.db"));

        let state = AppState::from_config(&config).await.unwrap();
        assert!(!state.entitlements.is_pro("new@example.com").await.unwrap());
        assert_eq!(state.webhook.tolerance, Duration::from_secs(300));
        assert!(config.db_path.exists());
    }

    #[tokio::test]
    async fn state_from_config_reports_unusable_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = AppState::from_config(&test_config(blocker.join("forge.db")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::error::Error::Database(_)));
    }
}
