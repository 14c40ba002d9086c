// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible APIs.
//!
//! Provides [`OpenAiClient`] which handles request construction, bearer
//! authentication, and transient error retry for the chat completions
//! and embeddings endpoints.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use storyloom_core::StoryloomError;
use tracing::{debug, warn};

use crate::types::{
    ApiErrorResponse, ChatCompletionRequest, ChatCompletionResponse, EmbeddingsRequest,
    EmbeddingsResponse,
};

/// HTTP client for an OpenAI-compatible API.
///
/// Manages authentication headers, connection pooling, and retry logic
/// for transient errors (429, 500, 503). The base URL is configurable to
/// support compatible gateways.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl OpenAiClient {
    /// Creates a new client against `api_base` (no trailing slash).
    pub fn new(api_key: &str, api_base: String) -> Result<Self, StoryloomError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| {
            StoryloomError::Config(format!("invalid API key header value: {e}"))
        })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StoryloomError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: api_base.trim_end_matches('/').to_string(),
            max_retries: 1,
        })
    }

    /// Sends a chat completion request.
    pub async fn chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, StoryloomError> {
        self.post("/chat/completions", request).await
    }

    /// Sends an embeddings request.
    pub async fn embeddings(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, StoryloomError> {
        self.post("/embeddings", request).await
    }

    /// POST a JSON body and parse a JSON response.
    ///
    /// On transient errors (429, 500, 503), retries once after a
    /// 1-second delay.
    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, StoryloomError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, path, "retrying request after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|e| StoryloomError::Provider {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, path, attempt, "response received");

            if status.is_success() {
                let body = response.text().await.map_err(|e| StoryloomError::Provider {
                    message: format!("failed to read response body: {e}"),
                    source: Some(Box::new(e)),
                })?;
                return serde_json::from_str(&body).map_err(|e| StoryloomError::Provider {
                    message: format!("failed to parse API response: {e}"),
                    source: Some(Box::new(e)),
                });
            }

            if is_transient_error(status) && attempt < self.max_retries {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "transient error, will retry");
                last_error = Some(StoryloomError::Provider {
                    message: format!("API returned {status}: {body}"),
                    source: None,
                });
                continue;
            }

            // Non-transient error or exhausted retries.
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_err) => format!(
                    "OpenAI API error ({}): {}",
                    api_err.error.type_.as_deref().unwrap_or("unknown"),
                    api_err.error.message
                ),
                Err(_) => format!("API returned {status}: {body}"),
            };
            return Err(StoryloomError::Provider {
                message,
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| StoryloomError::Provider {
            message: "request failed after retries".into(),
            source: None,
        }))
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 503)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> OpenAiClient {
        OpenAiClient::new("test-api-key", base_url.to_string()).unwrap()
    }

    fn chat_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "Hello".into(),
            }],
            max_tokens: 64,
            temperature: 0.1,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": content},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("Hi there!")))
            .mount(&server)
            .await;

        let response = test_client(&server.uri()).chat(&chat_request()).await.unwrap();
        assert_eq!(response.choices[0].message.content, "Hi there!");
        assert_eq!(response.usage.unwrap().prompt_tokens, 10);
    }

    #[tokio::test]
    async fn chat_retries_on_429() {
        let server = MockServer::start().await;
        let error_body = serde_json::json!({
            "error": {"message": "Rate limited", "type": "rate_limit_error"}
        });

        // First request returns 429, second returns 200.
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(&error_body))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("After retry")))
            .mount(&server)
            .await;

        let response = test_client(&server.uri()).chat(&chat_request()).await.unwrap();
        assert_eq!(response.choices[0].message.content, "After retry");
    }

    #[tokio::test]
    async fn chat_fails_on_400_with_api_message() {
        let server = MockServer::start().await;
        let error_body = serde_json::json!({
            "error": {"message": "Unknown model", "type": "invalid_request_error"}
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(&error_body))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .chat(&chat_request())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("invalid_request_error"), "got: {err}");
        assert!(err.contains("Unknown model"), "got: {err}");
    }

    #[tokio::test]
    async fn chat_exhausts_retries_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(2)
            .mount(&server)
            .await;

        let result = test_client(&server.uri()).chat(&chat_request()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn embeddings_success() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "model": "text-embedding-3-small",
            "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]
        });
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let response = test_client(&server.uri())
            .embeddings(&EmbeddingsRequest {
                model: "text-embedding-3-small".into(),
                input: vec!["a paragraph".into()],
            })
            .await
            .unwrap();
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("ok")))
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/", server.uri()));
        assert!(client.chat(&chat_request()).await.is_ok());
    }
}
