//! Mistral adapter. La Plateforme speaks the same OpenAI-compatible
//! chat-completions wire format as the rest of the `openai_compatible`
//! family.

use crate::error::ProviderError;
use crate::models::{Capabilities, Request, Response};
use crate::providers::openai_compatible::{OpenAiCompatibleProvider, OpenAiCompatibleSpec};
use crate::providers::{Provider, ProviderConfig, StreamResult, ValidationResult};
use tokio_util::sync::CancellationToken;

const SPEC: OpenAiCompatibleSpec = OpenAiCompatibleSpec {
    provider_id: "mistral",
    default_base_url: "https://api.mistral.ai/v1",
    confidence_base: 0.8,
    supported_models: &["mistral-large-latest", "mistral-small-latest", "open-mixtral-8x22b"],
};

pub struct MistralProvider(OpenAiCompatibleProvider);

impl MistralProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self(OpenAiCompatibleProvider::new(config, SPEC)?))
    }
}

#[async_trait::async_trait]
impl Provider for MistralProvider {
    fn id(&self) -> &str {
        self.0.id()
    }

    async fn complete(&self, request: &Request, cancel: &CancellationToken) -> Result<Response, ProviderError> {
        self.0.complete(request, cancel).await
    }

    async fn complete_stream(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<StreamResult, ProviderError> {
        self.0.complete_stream(request, cancel).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.0.health_check().await
    }

    fn capabilities(&self) -> Capabilities {
        self.0.capabilities()
    }

    fn validate_config(&self) -> ValidationResult {
        self.0.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        let config = ProviderConfig::new("mistral", "").with_model("mistral-large-latest");
        let provider = MistralProvider::new(config).unwrap();
        assert!(!provider.validate_config().valid);
    }

    #[test]
    fn rejects_missing_model() {
        let provider = MistralProvider::new(ProviderConfig::new("mistral", "key")).unwrap();
        let result = provider.validate_config();
        assert!(!result.valid);
        assert!(result.messages.iter().any(|m| m.contains("model")));
    }
}
