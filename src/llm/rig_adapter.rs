//! Bridge from rig's `CompletionModel` to [`LlmProvider`].

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Wraps any rig completion model as an [`LlmProvider`].
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    pricing: (Decimal, Decimal),
    timeout: Duration,
    temperature: f64,
    max_tokens: u64,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            pricing: (Decimal::ZERO, Decimal::ZERO),
            timeout: Duration::from_secs(30),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    pub fn with_pricing(mut self, pricing: (Decimal, Decimal)) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Defaults used when a request does not set its own.
    pub fn with_defaults(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = f64::from(temperature);
        self.max_tokens = u64::from(max_tokens);
        self
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.pricing
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let turns = split_messages(&request.messages).ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "completion request has no user message".to_string(),
        })?;

        let temperature = request
            .temperature
            .map(f64::from)
            .unwrap_or(self.temperature);
        let max_tokens = request.max_tokens.map(u64::from).unwrap_or(self.max_tokens);

        let mut builder = self
            .model
            .completion_request(Message::user(turns.prompt))
            .messages(turns.history.into_iter().map(Message::user).collect())
            .temperature(temperature)
            .max_tokens(max_tokens);
        if let Some(preamble) = turns.preamble {
            builder = builder.preamble(preamble);
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| map_completion_error(self.provider, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "response contained no text".to_string(),
            });
        }

        let input_tokens = saturating_u32(response.usage.input_tokens);
        let output_tokens = saturating_u32(response.usage.output_tokens);
        tracing::debug!(
            model = %self.model_name,
            input_tokens,
            output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

/// A chat transcript in the shape rig's request builder wants.
#[derive(Debug, PartialEq)]
struct Turns {
    preamble: Option<String>,
    history: Vec<String>,
    prompt: String,
}

/// System messages join into the preamble; the last user message is the
/// prompt and earlier ones become history. `None` without a user message.
fn split_messages(messages: &[ChatMessage]) -> Option<Turns> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut history: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .collect();
    let prompt = history.pop()?;

    Some(Turns {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history,
        prompt,
    })
}

fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    match err {
        CompletionError::JsonError(e) => LlmError::Json(e),
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        CompletionError::ProviderError(reason) if is_rate_limited(&reason) => {
            LlmError::RateLimited {
                provider: provider.to_string(),
                retry_after: None,
            }
        }
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Provider error bodies for quota exhaustion carry HTTP 429 or
/// `RESOURCE_EXHAUSTED`.
fn is_rate_limited(reason: &str) -> bool {
    reason.contains("429") || reason.contains("RESOURCE_EXHAUSTED")
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_joins_system_and_keeps_last_user_as_prompt() {
        let turns = split_messages(&[
            ChatMessage::system("be terse"),
            ChatMessage::user("earlier"),
            ChatMessage::system("json only"),
            ChatMessage::user("write captions"),
        ])
        .unwrap();
        assert_eq!(
            turns,
            Turns {
                preamble: Some("be terse\n\njson only".into()),
                history: vec!["earlier".into()],
                prompt: "write captions".into(),
            }
        );
    }

    #[test]
    fn split_without_user_message_is_none() {
        assert!(split_messages(&[ChatMessage::system("only system")]).is_none());
        assert!(split_messages(&[]).is_none());

        let turns = split_messages(&[ChatMessage::user("hi")]).unwrap();
        assert_eq!(turns.preamble, None);
        assert!(turns.history.is_empty());
    }

    #[test]
    fn quota_errors_map_to_rate_limited() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#;
        let err = map_completion_error("gemini", CompletionError::ProviderError(body.into()));
        assert!(matches!(err, LlmError::RateLimited { retry_after: None, .. }));
    }

    #[test]
    fn other_errors_keep_their_class() {
        let err = map_completion_error(
            "gemini",
            CompletionError::ProviderError("API key not valid".into()),
        );
        assert!(matches!(err, LlmError::RequestFailed { .. }));

        let err = map_completion_error(
            "gemini",
            CompletionError::ResponseError("no candidates".into()),
        );
        assert!(matches!(err, LlmError::InvalidResponse { .. }));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = map_completion_error("gemini", CompletionError::JsonError(json_err));
        assert!(matches!(err, LlmError::Json(_)));
    }

    #[test]
    fn token_counts_saturate() {
        assert_eq!(saturating_u32(12), 12);
        assert_eq!(saturating_u32(u64::MAX), u32::MAX);
    }
}
