use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::{Question, QuestionRequest, QuestionSource};

/// External generator of aptitude questions. Any error is recoverable: the
/// selector falls back to the static bank.
#[async_trait]
pub trait QuestionProvider: Send + Sync {
    async fn get_next_question(&self, request: &QuestionRequest) -> Result<Question, EngineError>;
}

/// Runs a provider call under a deadline so a slow generator never stalls delivery.
pub async fn fetch_with_timeout(
    provider: &dyn QuestionProvider,
    request: &QuestionRequest,
    timeout: Duration,
) -> Result<Question, EngineError> {
    match tokio::time::timeout(timeout, provider.get_next_question(request)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::ProviderTimeout(timeout)),
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    id: String,
    text: String,
    options: BTreeMap<String, String>,
    #[serde(alias = "correctAnswer")]
    correct_answer: String,
    explanation: Option<String>,
}

/// Calls the question generation service over HTTP.
pub struct HttpQuestionProvider {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpQuestionProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuestionProvider for HttpQuestionProvider {
    async fn get_next_question(&self, request: &QuestionRequest) -> Result<Question, EngineError> {
        let url = format!("{}/v1/questions/next", self.base_url);

        let response = self.http_client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(EngineError::ProviderFailure(format!(
                "question generator returned status {}",
                response.status()
            )));
        }

        let generated: GeneratedQuestion = response.json().await?;
        if generated.text.trim().is_empty() || generated.options.is_empty() {
            return Err(EngineError::ProviderFailure(
                "question generator returned an empty question".to_string(),
            ));
        }

        Ok(Question {
            id: generated.id,
            text: generated.text,
            options: generated.options,
            correct_answer: generated.correct_answer,
            explanation: generated.explanation,
            subtag: request.subtag,
            difficulty: request.difficulty,
            source: QuestionSource::Provider,
        })
    }
}

/// Used when no generator is configured: every request goes to the fallback bank.
pub struct DisabledQuestionProvider;

#[async_trait]
impl QuestionProvider for DisabledQuestionProvider {
    async fn get_next_question(&self, _request: &QuestionRequest) -> Result<Question, EngineError> {
        Err(EngineError::ProviderFailure(
            "question generation is not configured".to_string(),
        ))
    }
}
