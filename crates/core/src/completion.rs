//! Completion provider abstraction.
//!
//! The pipeline only ever talks to [`CompletionClient`]; the OpenAI-compatible
//! implementation below covers any provider that speaks that API surface.
//! Provider failures are classified into [`CompletionError`] variants at this
//! boundary so nothing downstream has to inspect provider-specific errors.

use crate::error::CompletionError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

/// One prompt for the provider, with its sampling budget.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generated text plus the token usage the provider reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// A generic text-completion provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError>;
}

/// An implementation of [`CompletionClient`] for any OpenAI-compatible API.
pub struct OpenAiCompletionClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletionClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The provider configuration, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions.
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self { client: Client::with_config(config), model }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system)
                    .build()
                    .map_err(|e| CompletionError::Permanent(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.user)
                    .build()
                    .map_err(|e| CompletionError::Permanent(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| CompletionError::Permanent(e.to_string()))?;

        let response = self.client.chat().create(chat_request).await.map_err(classify)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                CompletionError::Permanent("response contained no text content".to_string())
            })?;

        let (tokens_in, tokens_out) = response
            .usage
            .map(|usage| (usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or((0, 0));

        Ok(Completion { text, tokens_in, tokens_out })
    }
}

fn classify(err: OpenAIError) -> CompletionError {
    match err {
        // Transport-level failures (timeouts, resets, DNS) are always worth
        // retrying: they say something about the connection, not the request.
        OpenAIError::Reqwest(e) if e.is_timeout() => {
            CompletionError::Transient(format!("provider call timed out: {e}"))
        }
        OpenAIError::Reqwest(e) => CompletionError::Transient(e.to_string()),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or("");
            let message = api.message.clone();
            if kind.contains("rate_limit")
                || kind.contains("server_error")
                || kind.contains("overloaded")
                || message.contains("overloaded")
            {
                CompletionError::Transient(message)
            } else if kind.contains("content_policy") || kind.contains("content_filter") {
                CompletionError::PolicyViolation(message)
            } else {
                CompletionError::Permanent(message)
            }
        }
        other => CompletionError::Permanent(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(kind: &str, message: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: Some(kind.to_string()),
            param: None,
            code: None,
        })
    }

    #[test]
    fn rate_limits_classify_as_transient() {
        let err = classify(api_error("rate_limit_exceeded", "slow down"));
        assert!(matches!(err, CompletionError::Transient(_)));
    }

    #[test]
    fn server_errors_classify_as_transient() {
        let err = classify(api_error("server_error", "internal error"));
        assert!(matches!(err, CompletionError::Transient(_)));
    }

    #[test]
    fn policy_violations_classify_as_policy() {
        let err = classify(api_error("content_policy_violation", "refused"));
        assert!(matches!(err, CompletionError::PolicyViolation(_)));
    }

    #[test]
    fn other_api_errors_classify_as_permanent() {
        let err = classify(api_error("invalid_request_error", "unknown model"));
        assert!(matches!(err, CompletionError::Permanent(_)));
    }
}
