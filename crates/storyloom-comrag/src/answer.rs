// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-rubric scoring of generated answers against retrieval contexts.

use std::sync::Arc;

use serde_json::Value;
use storyloom_core::{ProviderAdapter, ProviderRequest, StoryloomError};
use tracing::{debug, warn};

use crate::quality::clamp01;
use crate::repair::repair_and_parse;

const SCORING_SYSTEM_PROMPT: &str = "You are a strict quality rater for fiction prose. \
Rate the answer on correctness with respect to the provided context, fluency, \
and consistency with the context. Respond with JSON only, no prose, exactly: \
{\"score\": <float between 0.0 and 1.0>, \"reason\": \"<one sentence>\"}";

const SCORING_MAX_TOKENS: u32 = 256;

/// Scores generated answers via an LLM rubric.
///
/// Scoring is advisory: the overall pipeline must not depend on it
/// succeeding, so provider errors and unparsable responses degrade to a
/// neutral 0.5 instead of propagating. The fallback guard is narrow, at
/// the provider-call and parse boundary only.
pub struct AnswerScorer {
    provider: Arc<dyn ProviderAdapter>,
    model: String,
    temperature: f64,
    max_contexts: usize,
}

/// Neutral score used when the rubric call cannot produce a verdict.
pub const NEUTRAL_SCORE: f64 = 0.5;

impl AnswerScorer {
    /// `model` is the scoring model, already resolved by the caller
    /// (`[comrag] scoring_model`, falling back to the chat model).
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        model: String,
        temperature: f64,
        max_contexts: usize,
    ) -> Self {
        Self {
            provider,
            model,
            temperature,
            max_contexts: max_contexts.max(1),
        }
    }

    /// Build a scorer from configuration. An empty `scoring_model`
    /// falls back to the chat model.
    pub fn from_config(
        provider: Arc<dyn ProviderAdapter>,
        openai: &storyloom_config::OpenAiConfig,
        comrag: &storyloom_config::ComragConfig,
    ) -> Self {
        let model = if comrag.scoring_model.is_empty() {
            openai.chat_model.clone()
        } else {
            comrag.scoring_model.clone()
        };
        Self::new(
            provider,
            model,
            comrag.scoring_temperature,
            comrag.max_scoring_contexts,
        )
    }

    /// Rate `answer` against `contexts`, returning a score in [0, 1].
    pub async fn score(&self, answer: &str, contexts: &[String]) -> f64 {
        let prompt = self.build_prompt(answer, contexts);
        let request = ProviderRequest {
            model: self.model.clone(),
            system_prompt: Some(SCORING_SYSTEM_PROMPT.to_string()),
            prompt,
            max_tokens: SCORING_MAX_TOKENS,
            temperature: self.temperature,
        };

        match self.rubric_score(request).await {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "answer scoring failed, using neutral score");
                NEUTRAL_SCORE
            }
        }
    }

    async fn rubric_score(&self, request: ProviderRequest) -> Result<f64, StoryloomError> {
        let response = self.provider.complete(request).await?;
        let value = repair_and_parse(&response.content, Value::Null);
        let score = value
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| StoryloomError::Provider {
                message: format!(
                    "scoring response carried no numeric score: {}",
                    truncate_for_log(&response.content)
                ),
                source: None,
            })?;
        if let Some(reason) = value.get("reason").and_then(Value::as_str) {
            debug!(score, reason, "answer scored");
        }
        Ok(clamp01(score))
    }

    fn build_prompt(&self, answer: &str, contexts: &[String]) -> String {
        let mut prompt = String::from("Context passages:\n");
        if contexts.is_empty() {
            prompt.push_str("(none provided)\n");
        }
        for (i, context) in contexts.iter().take(self.max_contexts).enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, context));
        }
        prompt.push_str("\nAnswer to rate:\n");
        prompt.push_str(answer);
        prompt
    }
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 120;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use storyloom_core::{
        AdapterType, HealthStatus, PluginAdapter, ProviderResponse,
    };

    /// Test provider returning canned responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, StoryloomError>>>,
        last_request: Mutex<Option<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, StoryloomError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PluginAdapter for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn version(&self) -> semver::Version {
            semver::Version::new(0, 1, 0)
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Provider
        }
        async fn health_check(&self) -> Result<HealthStatus, StoryloomError> {
            Ok(HealthStatus::Healthy)
        }
        async fn shutdown(&self) -> Result<(), StoryloomError> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, StoryloomError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            let next = self.responses.lock().unwrap().remove(0);
            next.map(|content| ProviderResponse {
                content,
                model: request.model,
                usage: None,
            })
        }
    }

    fn scorer_with(responses: Vec<Result<String, StoryloomError>>) -> AnswerScorer {
        AnswerScorer::new(
            Arc::new(ScriptedProvider::new(responses)),
            "rater-model".to_string(),
            0.1,
            5,
        )
    }

    #[tokio::test]
    async fn clean_json_response_scores() {
        let scorer = scorer_with(vec![Ok(
            r#"{"score": 0.85, "reason": "faithful to the context"}"#.to_string(),
        )]);
        let score = scorer.score("answer text", &["context".to_string()]).await;
        assert_eq!(score, 0.85);
    }

    #[tokio::test]
    async fn fenced_response_is_repaired() {
        let scorer = scorer_with(vec![Ok(
            "```json\n{\"score\": 0.4, \"reason\": \"drifts from context\"}\n```".to_string(),
        )]);
        let score = scorer.score("answer", &[]).await;
        assert_eq!(score, 0.4);
    }

    #[tokio::test]
    async fn provider_error_degrades_to_neutral() {
        let scorer = scorer_with(vec![Err(StoryloomError::Provider {
            message: "upstream 500".to_string(),
            source: None,
        })]);
        let score = scorer.score("answer", &[]).await;
        assert_eq!(score, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn unparsable_response_degrades_to_neutral() {
        let scorer = scorer_with(vec![Ok("I think it's pretty good!".to_string())]);
        let score = scorer.score("answer", &[]).await;
        assert_eq!(score, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn out_of_range_score_is_clamped() {
        let scorer = scorer_with(vec![Ok(r#"{"score": 1.7, "reason": "x"}"#.to_string())]);
        assert_eq!(scorer.score("answer", &[]).await, 1.0);
    }

    #[test]
    fn from_config_falls_back_to_chat_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let openai = storyloom_config::OpenAiConfig::default();
        let mut comrag = storyloom_config::ComragConfig::default();

        let scorer = AnswerScorer::from_config(provider.clone(), &openai, &comrag);
        assert_eq!(scorer.model, openai.chat_model);

        comrag.scoring_model = "rater".to_string();
        let scorer = AnswerScorer::from_config(provider, &openai, &comrag);
        assert_eq!(scorer.model, "rater");
    }

    #[tokio::test]
    async fn contexts_are_capped_in_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"score": 0.5, "reason": "x"}"#.to_string(),
        )]));
        let scorer = AnswerScorer::new(provider.clone(), "m".to_string(), 0.1, 2);
        let contexts: Vec<String> =
            (1..=5).map(|i| format!("context number {i}")).collect();
        scorer.score("answer", &contexts).await;

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert!(request.prompt.contains("context number 2"));
        assert!(!request.prompt.contains("context number 3"));
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.model, "m");
    }
}
