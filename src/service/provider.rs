//! Adapter over `edgequake-llm` providers.
//!
//! Anthropic, Gemini, Ollama, Mistral, Azure and friends each speak their
//! own protocol; `edgequake-llm` already hides those differences behind
//! [`LLMProvider`]. This adapter turns the assembled [`Message`] into a
//! `ChatMessage`, applies the attempt timeout, and classifies provider errors
//! into the transient/fatal buckets the retry loop understands.
//!
//! Providers here have no uniform structured-output switch, so the schema is
//! not transmitted; [`crate::ResponseNormalizer`] enforces it on the reply.
//! API keys for these providers are read by `edgequake-llm` itself from the
//! usual variables (`ANTHROPIC_API_KEY`, `GEMINI_API_KEY`, …).

use super::{ServiceCall, ServiceReply, VisionService};
use crate::config::ServiceConfig;
use crate::error::{InvocationError, VlmError};
use crate::pipeline::prompt::{ContentPart, Message};
use crate::request::TokenUsage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct ProviderService {
    name: String,
    provider: Arc<dyn LLMProvider>,
    temperature: Option<f32>,
}

impl ProviderService {
    /// Wrap a pre-built provider (custom middleware, tests).
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>, temperature: Option<f32>) -> Self {
        Self {
            name: name.into(),
            provider,
            temperature,
        }
    }

    /// Build the provider named by `config.service` through [`ProviderFactory`].
    pub fn from_config(config: &ServiceConfig) -> Result<Self, VlmError> {
        let provider = ProviderFactory::create_llm_provider(&config.service, &config.model)
            .map_err(|e| VlmError::ServiceNotConfigured {
                service: config.service.clone(),
                hint: format!("{e}"),
            })?;
        Ok(Self::new(config.service.clone(), provider, config.temperature))
    }

    fn to_chat_message(message: &Message) -> ChatMessage {
        let images: Vec<ImageData> = message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ImageUrl { image_url } => split_data_url(&image_url.url)
                    .map(|(mime, b64)| ImageData::new(b64.to_string(), mime).with_detail("high")),
                ContentPart::Text { .. } => None,
            })
            .collect();
        ChatMessage::user_with_images(message.text(), images)
    }
}

#[async_trait]
impl VisionService for ProviderService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, call: ServiceCall<'_>) -> Result<ServiceReply, InvocationError> {
        let messages = vec![Self::to_chat_message(call.message)];
        let options = CompletionOptions {
            temperature: self.temperature,
            ..Default::default()
        };

        let start = Instant::now();
        let response = tokio::time::timeout(call.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| InvocationError::Timeout {
                service: self.name.clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            })?
            .map_err(|e| classify_message(&self.name, &e.to_string()))?;

        let usage = TokenUsage {
            total_tokens: response.prompt_tokens as u64 + response.completion_tokens as u64,
        };
        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.name,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(InvocationError::Service {
                service: self.name.clone(),
                status: None,
                detail: "Empty response content".to_string(),
            });
        }

        Ok(ServiceReply {
            text: response.content,
            usage,
        })
    }
}

/// `data:<mime>;base64,<payload>` → `(mime, payload)`.
fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime, payload))
}

/// Providers surface errors as text; classify by the status and phrases they embed.
pub(crate) fn classify_message(service: &str, message: &str) -> InvocationError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let status = |codes: &[&str]| codes.iter().any(|c| mentions_status(&lower, c));

    if status(&["429"])
        || has(&["rate limit", "rate_limit", "ratelimit", "too many requests", "quota exceeded"])
    {
        InvocationError::RateLimited {
            service: service.to_string(),
            retry_after_secs: None,
        }
    } else if has(&["timed out", "timeout", "deadline exceeded"]) {
        InvocationError::Timeout {
            service: service.to_string(),
            elapsed_ms: 0,
        }
    } else if status(&["401", "403"])
        || has(&["unauthorized", "forbidden", "invalid api key", "authentication"])
    {
        InvocationError::Auth {
            service: service.to_string(),
            detail: message.to_string(),
        }
    } else {
        InvocationError::Service {
            service: service.to_string(),
            status: None,
            detail: message.to_string(),
        }
    }
}

/// `code` appears as an HTTP status: a standalone number at the start of the
/// message or right after `status`, `code`, `http` or `error`.
fn mentions_status(lower: &str, code: &str) -> bool {
    lower.match_indices(code).any(|(i, _)| {
        let before = &lower[..i];
        let after = &lower[i + code.len()..];
        if before.ends_with(|c: char| c.is_ascii_alphanumeric())
            || after.starts_with(|c: char| c.is_ascii_alphanumeric())
        {
            return false;
        }
        let lead = before.trim_end_matches(|c: char| matches!(c, ' ' | ':' | '=' | '(' | '['));
        lead.is_empty()
            || ["status", "code", "http", "http/1.1", "http/2", "error"]
                .iter()
                .any(|k| lead.ends_with(k))
    })
}
