//! LLM integration for Content Forge.
//!
//! The model is a black box that returns raw text; everything downstream of
//! [`LlmProvider::complete`] goes through the response normalizer. rig-core
//! handles HTTP transport and [`RigAdapter`] bridges its `CompletionModel`
//! to our [`LlmProvider`] trait.

mod costs;
pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Create the configured LLM provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    create_gemini_provider(config)
}

fn create_gemini_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::gemini;

    let client: rig::client::Client<gemini::client::GeminiExt> =
        gemini::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to create Gemini client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Gemini (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model, "gemini")
            .with_pricing(costs::gemini_cost(&config.model))
            .with_timeout(config.timeout)
            .with_defaults(config.temperature, config.max_tokens),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn create_provider_constructs_without_network() {
        // The key is only checked when a request is made.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "gemini-2.0-flash".to_string(),
            timeout: Duration::from_secs(5),
            temperature: 0.7,
            max_tokens: 256,
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gemini-2.0-flash");
        assert_eq!(provider.calculate_cost(1_000_000, 0), dec!(0.1));
    }
}
