// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible adapters for the Storyloom retrieval backend.
//!
//! Implements [`ProviderAdapter`] over the chat completions endpoint
//! (answer scoring, formula generation) and [`EmbeddingAdapter`] over the
//! embeddings endpoint (all vector generation). A configurable `api_base`
//! supports compatible gateways such as Azure OpenAI or vLLM.

pub mod client;
pub mod types;

use async_trait::async_trait;
use storyloom_config::StoryloomConfig;
use storyloom_core::{
    AdapterType, EmbeddingAdapter, EmbeddingInput, EmbeddingOutput, HealthStatus,
    PluginAdapter, ProviderAdapter, ProviderRequest, ProviderResponse, StoryloomError,
    TokenUsage,
};
use tracing::{debug, info};

use crate::client::OpenAiClient;
use crate::types::{ChatCompletionRequest, ChatMessage, EmbeddingsRequest};

/// Resolves the API key: config value first, then `OPENAI_API_KEY`.
fn resolve_api_key(configured: &Option<String>) -> Result<String, StoryloomError> {
    if let Some(key) = configured
        && !key.is_empty()
    {
        return Ok(key.clone());
    }
    std::env::var("OPENAI_API_KEY").map_err(|_| {
        StoryloomError::Config(
            "no OpenAI API key: set [openai] api_key or the OPENAI_API_KEY environment variable"
                .to_string(),
        )
    })
}

/// Chat completion provider implementing [`ProviderAdapter`].
pub struct OpenAiProvider {
    client: OpenAiClient,
}

impl OpenAiProvider {
    pub fn new(config: &StoryloomConfig) -> Result<Self, StoryloomError> {
        let api_key = resolve_api_key(&config.openai.api_key)?;
        let client = OpenAiClient::new(&api_key, config.openai.api_base.clone())?;
        info!(
            model = config.openai.chat_model,
            api_base = config.openai.api_base,
            "OpenAI provider initialized"
        );
        Ok(Self { client })
    }
}

#[async_trait]
impl PluginAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, StoryloomError> {
        // Constructing the client already validated configuration; a full
        // check would consume tokens on every doctor run.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), StoryloomError> {
        debug!("OpenAI provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, StoryloomError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let api_request = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let response = self.client.chat(&api_request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| StoryloomError::Provider {
                message: "chat response contained no choices".to_string(),
                source: None,
            })?;

        Ok(ProviderResponse {
            content: choice.message.content,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

/// Embedding generator implementing [`EmbeddingAdapter`].
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    default_model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &StoryloomConfig) -> Result<Self, StoryloomError> {
        let api_key = resolve_api_key(&config.openai.api_key)?;
        let client = OpenAiClient::new(&api_key, config.openai.api_base.clone())?;
        info!(
            model = config.openai.embedding_model,
            "OpenAI embedder initialized"
        );
        Ok(Self {
            client,
            default_model: config.openai.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl PluginAdapter for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, StoryloomError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), StoryloomError> {
        debug!("OpenAI embedder shutting down");
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, StoryloomError> {
        let expected = input.texts.len();
        let request = EmbeddingsRequest {
            model: input.model.unwrap_or_else(|| self.default_model.clone()),
            input: input.texts,
        };
        let response = self.client.embeddings(&request).await?;

        if response.data.len() != expected {
            return Err(StoryloomError::Embedding {
                message: format!(
                    "expected {expected} embeddings, API returned {}",
                    response.data.len()
                ),
                source: None,
            });
        }

        // Restore input order; the API indexes each vector explicitly.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);

        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base: &str) -> StoryloomConfig {
        let mut config = StoryloomConfig::default();
        config.openai.api_base = api_base.to_string();
        config.openai.api_key = Some("test-key".to_string());
        config
    }

    #[tokio::test]
    async fn provider_maps_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "rater-model",
                "temperature": 0.1,
                "messages": [
                    {"role": "system", "content": "rate strictly"},
                    {"role": "user", "content": "the answer"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "rater-model",
                "choices": [{"message": {"role": "assistant", "content": "{\"score\": 0.9}"},
                             "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&test_config(&server.uri())).unwrap();
        let response = provider
            .complete(ProviderRequest {
                model: "rater-model".to_string(),
                system_prompt: Some("rate strictly".to_string()),
                prompt: "the answer".to_string(),
                max_tokens: 256,
                temperature: 0.1,
            })
            .await
            .unwrap();

        assert_eq!(response.content, "{\"score\": 0.9}");
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input_tokens: 42,
                output_tokens: 7
            })
        );
    }

    #[tokio::test]
    async fn provider_errors_on_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "m", "choices": []
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(&test_config(&server.uri())).unwrap();
        let result = provider
            .complete(ProviderRequest {
                model: "m".to_string(),
                system_prompt: None,
                prompt: "p".to_string(),
                max_tokens: 16,
                temperature: 0.0,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn embedder_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "data": [
                    {"embedding": [0.5, 0.5], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder
            .embed(EmbeddingInput {
                texts: vec!["first".to_string(), "second".to_string()],
                model: None,
            })
            .await
            .unwrap();

        assert_eq!(output.embeddings[0], vec![1.0, 0.0]);
        assert_eq!(output.embeddings[1], vec![0.5, 0.5]);
        assert_eq!(output.dimensions, 2);
    }

    #[tokio::test]
    async fn embedder_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "data": [{"embedding": [0.1], "index": 0}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&test_config(&server.uri())).unwrap();
        let result = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".to_string(), "b".to_string()],
                model: None,
            })
            .await;
        assert!(matches!(result, Err(StoryloomError::Embedding { .. })));
    }

    #[tokio::test]
    async fn embedder_uses_model_override() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "custom-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "custom-embed",
                "data": [{"embedding": [0.1, 0.2], "index": 0}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".to_string()],
                model: Some("custom-embed".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(output.dimensions, 2);
    }

    #[test]
    fn api_key_resolution_prefers_config() {
        let key = resolve_api_key(&Some("from-config".to_string())).unwrap();
        assert_eq!(key, "from-config");
    }
}
