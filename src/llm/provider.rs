//! LLM provider trait and request/response types.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A plain completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw completion text plus token accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A text-generation backend. Treated as a black box returning raw text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, recorded with each generation.
    fn model_name(&self) -> &str;

    /// Cost per (input, output) token.
    fn cost_per_token(&self) -> (Decimal, Decimal);

    /// Run a completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Cost of a completion with the given token counts.
    fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> Decimal {
        let (input_rate, output_rate) = self.cost_per_token();
        input_rate * Decimal::from(input_tokens) + output_rate * Decimal::from(output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Fixed;

    #[async_trait]
    impl LlmProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (dec!(0.000001), dec!(0.000004))
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "{}".into(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    #[test]
    fn calculate_cost_combines_rates() {
        assert_eq!(Fixed.calculate_cost(1000, 500), dec!(0.003));
    }

    #[test]
    fn request_builder_sets_options() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(64);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.messages[0].role, Role::User);
    }
}
