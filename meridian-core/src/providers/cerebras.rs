//! Cerebras adapter. Cerebras' inference API is OpenAI-compatible.

use crate::error::ProviderError;
use crate::models::{Capabilities, Request, Response};
use crate::providers::openai_compatible::{OpenAiCompatibleProvider, OpenAiCompatibleSpec};
use crate::providers::{Provider, ProviderConfig, StreamResult, ValidationResult};
use tokio_util::sync::CancellationToken;

const SPEC: OpenAiCompatibleSpec = OpenAiCompatibleSpec {
    provider_id: "cerebras",
    default_base_url: "https://api.cerebras.ai/v1",
    confidence_base: 0.8,
    supported_models: &["llama3.1-8b", "llama3.1-70b"],
};

pub struct CerebrasProvider(OpenAiCompatibleProvider);

impl CerebrasProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self(OpenAiCompatibleProvider::new(config, SPEC)?))
    }
}

#[async_trait::async_trait]
impl Provider for CerebrasProvider {
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
        let config = ProviderConfig::new("cerebras", "").with_model("llama3.1-8b");
        let provider = CerebrasProvider::new(config).unwrap();
        assert!(!provider.validate_config().valid);
    }

    #[test]
    fn rejects_missing_model() {
        let provider = CerebrasProvider::new(ProviderConfig::new("cerebras", "key")).unwrap();
        let result = provider.validate_config();
        assert!(!result.valid);
        assert!(result.messages.iter().any(|m| m.contains("model")));
    }
}
