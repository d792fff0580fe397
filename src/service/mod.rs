//! The network boundary: one trait, two implementations, one registry.
//!
//! [`VisionService`] performs exactly one round trip and classifies its
//! failure; it never retries. Retry policy belongs to
//! [`crate::InvocationClient`], so every service gets identical retry and
//! fallback semantics.
//!
//! Services are picked by name from a static [`ServiceRegistry`] when the
//! client is built:
//!
//! | Name | Implementation |
//! |------|----------------|
//! | `openai`, `openai-compatible` | [`OpenAiService`]: direct HTTP with native JSON-schema output |
//! | `anthropic`, `gemini`, `ollama`, `mistral`, `azure`, `openrouter`, `lmstudio` | [`ProviderService`] over `edgequake-llm` |

pub mod openai;
pub mod provider;

pub use openai::OpenAiService;
pub use provider::ProviderService;

use crate::config::ServiceConfig;
use crate::error::{InvocationError, VlmError};
use crate::pipeline::prompt::Message;
use crate::request::TokenUsage;
use crate::schema::ResponseSchema;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Inputs of a single attempt.
#[derive(Debug, Clone, Copy)]
pub struct ServiceCall<'a> {
    pub message: &'a Message,
    pub schema: &'a ResponseSchema,
    pub timeout: Duration,
}

/// A transport-level success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// A multimodal model reachable over the network.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Identifier used in logs and errors.
    fn name(&self) -> &str;

    /// One round trip. Must not retry.
    async fn complete(&self, call: ServiceCall<'_>) -> Result<ServiceReply, InvocationError>;
}

type Constructor = fn(&ServiceConfig) -> Result<Arc<dyn VisionService>, VlmError>;

fn build_openai(config: &ServiceConfig) -> Result<Arc<dyn VisionService>, VlmError> {
    Ok(Arc::new(OpenAiService::new(config)?))
}

fn build_provider(config: &ServiceConfig) -> Result<Arc<dyn VisionService>, VlmError> {
    Ok(Arc::new(ProviderService::from_config(config)?))
}

static REGISTRY: Lazy<BTreeMap<&'static str, Constructor>> = Lazy::new(|| {
    let mut m: BTreeMap<&'static str, Constructor> = BTreeMap::new();
    m.insert("openai", build_openai);
    m.insert("openai-compatible", build_openai);
    for name in [
        "anthropic",
        "gemini",
        "ollama",
        "mistral",
        "azure",
        "openrouter",
        "lmstudio",
    ] {
        m.insert(name, build_provider);
    }
    m
});

/// Static name → implementation table.
pub struct ServiceRegistry;

impl ServiceRegistry {
    /// Build the service named by `config.service`.
    pub fn resolve(config: &ServiceConfig) -> Result<Arc<dyn VisionService>, VlmError> {
        let ctor = REGISTRY
            .get(config.service.as_str())
            .ok_or_else(|| VlmError::UnknownService {
                name: config.service.clone(),
                known: Self::names().join(", "),
            })?;
        ctor(config)
    }

    /// Registered names, sorted.
    pub fn names() -> Vec<&'static str> {
        REGISTRY.keys().copied().collect()
    }

    pub fn contains(name: &str) -> bool {
        REGISTRY.contains_key(name)
    }
}
