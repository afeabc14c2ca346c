//! Generation service: quota gate, prompt, model call, normalization and history.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::Entitlements;
use crate::config::GenerationConfig;
use crate::content::model::{ContentBundle, GenerateRequest};
use crate::content::normalizer::{self, ResponseSource};
use crate::content::prompt::{COPYWRITER_SYSTEM_PROMPT, build_prompt};
use crate::error::GenerationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::{GenerationRecord, GenerationStore, UsageStore};

/// Result of a successful generation.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedContent {
    /// History record id.
    pub id: Uuid,
    #[serde(flatten)]
    pub bundle: ContentBundle,
}

pub struct GenerationService {
    llm: Arc<dyn LlmProvider>,
    usage: Arc<dyn UsageStore>,
    history: Arc<dyn GenerationStore>,
    entitlements: Entitlements,
    config: GenerationConfig,
}

impl GenerationService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        usage: Arc<dyn UsageStore>,
        history: Arc<dyn GenerationStore>,
        entitlements: Entitlements,
        config: GenerationConfig,
    ) -> Self {
        Self {
            llm,
            usage,
            history,
            entitlements,
            config,
        }
    }

    /// Generate content for `email`, enforcing the free-tier daily limit.
    pub async fn generate_for_user(
        &self,
        email: &str,
        req: GenerateRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        req.validate()?;

        let today = Utc::now().date_naive();
        if !self.entitlements.is_pro(email).await? {
            let used = self.usage.daily_usage(email, today).await?;
            if used >= self.config.free_daily_limit {
                warn!(email = %email, used, limit = self.config.free_daily_limit, "Daily generation limit reached");
                return Err(GenerationError::QuotaExceeded {
                    limit: self.config.free_daily_limit,
                });
            }
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(COPYWRITER_SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(&req)),
        ]);
        let response = self.llm.complete(request).await?;

        let normalized = normalizer::normalize_response(Some(&response.content));
        if normalized.source == ResponseSource::PlainText {
            warn!(email = %email, "Model ignored the JSON instruction; used plain-text fallback");
        }

        let record = GenerationRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            platform: req.platform.trim().to_string(),
            industry: req.industry.trim().to_string(),
            tone: req.tone().to_string(),
            keywords: req.keywords().map(str::to_string),
            raw_output: response.content,
            bundle: normalized.bundle,
            model: self.llm.model_name().to_string(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost: self
                .llm
                .calculate_cost(response.input_tokens, response.output_tokens),
            created_at: Utc::now(),
        };
        self.history.insert_generation(&record).await?;
        let used = self.usage.increment_daily_usage(email, today).await?;

        info!(
            email = %email,
            generation_id = %record.id,
            source = ?normalized.source,
            captions = record.bundle.captions.len(),
            hashtags = record.bundle.hashtags.len(),
            ideas = record.bundle.ideas.len(),
            used_today = used,
            "Content generated"
        );

        Ok(GeneratedContent {
            id: record.id,
            bundle: record.bundle,
        })
    }

    /// Recent generations for `email`, newest first.
    pub async fn history(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<GenerationRecord>, GenerationError> {
        Ok(self.history.list_generations(email, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::billing::model::{Plan, SubscriptionRecord};
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use crate::store::{LibSqlBackend, SubscriptionStore};

    const JSON_REPLY: &str = "Here you go:\n{\"captions\":[\"Hi!\"],\"hashtags\":[\"#a\"],\"ideas\":[{\"title\":\"T\",\"description\":\"D\",\"imageIdea\":\"I\"}]}";

    struct StubLlm {
        reply: String,
        calls: AtomicUsize,
    }

    impl StubLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (dec!(0.000001), dec!(0.000002))
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.messages.len() == 2);
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "failing".into(),
                reason: "boom".into(),
            })
        }
    }

    fn service(
        db: &Arc<LibSqlBackend>,
        llm: Arc<dyn LlmProvider>,
        limit: u32,
    ) -> GenerationService {
        GenerationService::new(
            llm,
            db.clone(),
            db.clone(),
            Entitlements::new(db.clone()),
            GenerationConfig {
                free_daily_limit: limit,
            },
        )
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            platform: "Instagram".into(),
            industry: "Coffee".into(),
            tone: None,
            keywords: Some("latte".into()),
        }
    }

    #[tokio::test]
    async fn generates_and_records_history() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let svc = service(&db, Arc::new(StubLlm::new(JSON_REPLY)), 5);

        let out = svc.generate_for_user("a@example.com", request()).await.unwrap();
        assert_eq!(out.bundle.captions, vec!["Hi!"]);
        assert_eq!(out.bundle.hashtags, vec!["#a"]);
        assert_eq!(out.bundle.ideas.len(), 1);

        let history = svc.history("a@example.com", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        let record = &history[0];
        assert_eq!(record.id, out.id);
        assert_eq!(record.raw_output, JSON_REPLY);
        assert_eq!(record.bundle, out.bundle);
        assert_eq!(record.tone, "friendly");
        assert_eq!(record.keywords.as_deref(), Some("latte"));
        assert_eq!(record.model, "stub-model");
        assert_eq!(record.cost, dec!(0.0002));

        let today = Utc::now().date_naive();
        assert_eq!(db.daily_usage("a@example.com", today).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn free_user_hits_daily_limit() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(StubLlm::new(JSON_REPLY));
        let svc = service(&db, llm.clone(), 2);

        svc.generate_for_user("a@example.com", request()).await.unwrap();
        svc.generate_for_user("a@example.com", request()).await.unwrap();
        let err = svc.generate_for_user("a@example.com", request()).await.unwrap_err();

        assert!(matches!(err, GenerationError::QuotaExceeded { limit: 2 }));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        // Other users are unaffected.
        assert!(svc.generate_for_user("b@example.com", request()).await.is_ok());
    }

    #[tokio::test]
    async fn pro_user_is_unlimited() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.save(&SubscriptionRecord {
            email: "pro@example.com".into(),
            external_subscription_id: Some("sub_1".into()),
            external_customer_id: Some("cus_1".into()),
            plan: Plan::Pro,
            active: true,
            current_period_end: Some(Utc::now() + Duration::days(10)),
        })
        .await
        .unwrap();
        let svc = service(&db, Arc::new(StubLlm::new(JSON_REPLY)), 1);

        for _ in 0..3 {
            svc.generate_for_user("pro@example.com", request()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn invalid_request_skips_model() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(StubLlm::new(JSON_REPLY));
        let svc = service(&db, llm.clone(), 5);

        let mut req = request();
        req.industry = " ".into();
        let err = svc.generate_for_user("a@example.com", req).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRequest(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn llm_failure_is_not_counted() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let svc = service(&db, Arc::new(FailingLlm), 5);

        let err = svc.generate_for_user("a@example.com", request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Llm(_)));

        let today = Utc::now().date_naive();
        assert_eq!(db.daily_usage("a@example.com", today).await.unwrap(), 0);
        assert!(svc.history("a@example.com", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prose_reply_falls_back_to_plain_text() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let svc = service(&db, Arc::new(StubLlm::new("buy now sale sale #summer #sale")), 5);

        let out = svc.generate_for_user("a@example.com", request()).await.unwrap();
        assert_eq!(out.bundle.hashtags, vec!["#summer", "#sale"]);
        assert_eq!(out.bundle.captions, vec![normalizer::PLACEHOLDER_CAPTION]);
    }

    #[test]
    fn generated_content_flattens_bundle() {
        let content = GeneratedContent {
            id: Uuid::nil(),
            bundle: ContentBundle::empty(),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert!(json["captions"].is_array());
        assert!(json["id"].is_string());
    }
}
