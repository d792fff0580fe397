//! The invocation client: encode → assemble → send (with retry) → normalise.
//!
//! ## Failure policy
//!
//! `invoke` never returns an error. Every failure path ends in
//! [`InvocationOutcome::Empty`] with a `warn!` for operators:
//!
//! | Failure | Attempts | Backoff |
//! |---------|----------|---------|
//! | Timeout / rate limit | up to `max_retries + 1` | `min(n * unit, cap)` before retry n |
//! | Auth / validation / server / transport | 1 | none |
//! | Image encoding | 0 | none |
//! | Unparseable output, fallback disabled | as above | none |
//!
//! Transient failures self-correct under load; the rest will not improve by
//! retrying, so they fail fast and leave the budget untouched.

use crate::config::ServiceConfig;
use crate::document::{DocumentUnit, MetadataRecorder};
use crate::error::{InvocationError, VlmError};
use crate::pipeline::encode::ImageEncoder;
use crate::pipeline::normalize::ResponseNormalizer;
use crate::pipeline::prompt::{Message, PromptAssembler};
use crate::pipeline::retry::{CallState, RetryPolicy};
use crate::request::{InvocationOutcome, InvocationRequest};
use crate::service::{ServiceCall, ServiceRegistry, ServiceReply, VisionService};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Sends multimodal requests to one configured service.
///
/// Holds only read-only state, so one client can be shared (`Arc` or `&`)
/// across any number of concurrent invocations.
#[derive(Clone)]
pub struct InvocationClient {
    config: Arc<ServiceConfig>,
    service: Arc<dyn VisionService>,
    encoder: ImageEncoder,
    normalizer: ResponseNormalizer,
}

impl std::fmt::Debug for InvocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationClient")
            .field("config", &self.config)
            .field("service", &self.service.name())
            .finish()
    }
}

impl InvocationClient {
    /// Use an already-built service (custom transports, tests).
    pub fn new(config: ServiceConfig, service: Arc<dyn VisionService>) -> Self {
        Self {
            encoder: ImageEncoder::new(config.image_encoding),
            normalizer: ResponseNormalizer::new(config.fallback_to_text, config.output_format),
            config: Arc::new(config),
            service,
        }
    }

    /// Resolve `config.service` through the [`ServiceRegistry`].
    pub fn from_config(config: ServiceConfig) -> Result<Self, VlmError> {
        let service = ServiceRegistry::resolve(&config)?;
        Ok(Self::new(config, service))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Run one invocation and record usage on `unit` if it succeeds.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        unit: &mut dyn DocumentUnit,
    ) -> InvocationOutcome {
        let images = match self.encoder.encode_all(request.images()) {
            Ok(images) => images,
            Err(e) => {
                warn!("{}: {}; skipping call", self.service.name(), e);
                return InvocationOutcome::Empty;
            }
        };
        let message = PromptAssembler::assemble(request.instruction(), &images);

        let policy = self.policy_for(request);
        let timeout = request
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());

        let Some(reply) = self.send_with_retry(&message, request, &policy, timeout).await else {
            return InvocationOutcome::Empty;
        };

        match self.normalizer.normalize(&reply.text, request.schema()) {
            Ok(normalized) => {
                debug!(
                    "{}: resolved via {:?}, {} tokens",
                    self.service.name(),
                    normalized.resolution,
                    reply.usage.total_tokens
                );
                MetadataRecorder::record(unit, &reply.usage);
                InvocationOutcome::Success {
                    payload: normalized.payload,
                    raw_text: reply.text,
                    usage: reply.usage,
                }
            }
            Err(e) => {
                warn!("{}: {}", self.service.name(), e);
                InvocationOutcome::Empty
            }
        }
    }

    /// Like [`invoke`](Self::invoke) but returns the payload mapping (`{}` on failure).
    pub async fn call(&self, request: &InvocationRequest, unit: &mut dyn DocumentUnit) -> Value {
        self.invoke(request, unit).await.into_payload()
    }

    fn policy_for(&self, request: &InvocationRequest) -> RetryPolicy {
        let mut policy = self.config.retry_policy();
        if let Some(n) = request.max_retries() {
            policy.max_retries = n;
        }
        policy
    }

    /// Drive the state machine until `Success` or `Failed`.
    async fn send_with_retry(
        &self,
        message: &Message,
        request: &InvocationRequest,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Option<ServiceReply> {
        let start = Instant::now();
        let mut state = CallState::Idle;
        let mut last_err: Option<InvocationError> = None;
        let mut reply: Option<ServiceReply> = None;

        loop {
            state = match state {
                CallState::Idle => CallState::Sending { attempt: 1 },
                CallState::RetryWait { attempt, delay } => {
                    warn!(
                        "{}: retry {}/{} after {}ms",
                        self.service.name(),
                        attempt,
                        policy.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    CallState::Sending {
                        attempt: attempt + 1,
                    }
                }
                CallState::Sending { attempt } => {
                    let call = ServiceCall {
                        message,
                        schema: request.schema(),
                        timeout,
                    };
                    match self.service.complete(call).await {
                        Ok(r) => {
                            reply = Some(r);
                            CallState::Success { attempt }
                        }
                        Err(e) => {
                            warn!(
                                "{}: attempt {}/{} failed ({:?}): {}",
                                self.service.name(),
                                attempt,
                                policy.max_attempts(),
                                e.class(),
                                e
                            );
                            let next = state.on_failure(&e, policy);
                            last_err = Some(e);
                            next
                        }
                    }
                }
                CallState::Failed { attempts } => {
                    warn!(
                        "{}: giving up after {} attempt(s) in {:?}; last error: {}",
                        self.service.name(),
                        attempts,
                        start.elapsed(),
                        last_err
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    );
                    return None;
                }
                CallState::Success { attempt } => {
                    debug!(
                        "{}: attempt {} succeeded in {:?}",
                        self.service.name(),
                        attempt,
                        start.elapsed()
                    );
                    return reply;
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LlmUsage;
    use crate::request::TokenUsage;
    use crate::schema::ResponseSchema;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the timeout of every attempt and always answers the same text.
    struct EchoService {
        text: String,
        timeouts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl VisionService for EchoService {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, call: ServiceCall<'_>) -> Result<ServiceReply, InvocationError> {
            self.timeouts.lock().unwrap().push(call.timeout);
            Ok(ServiceReply {
                text: self.text.clone(),
                usage: TokenUsage { total_tokens: 5 },
            })
        }
    }

    fn client(text: &str) -> (InvocationClient, Arc<EchoService>) {
        let svc = Arc::new(EchoService {
            text: text.to_string(),
            timeouts: Mutex::new(Vec::new()),
        });
        let config = ServiceConfig::builder()
            .max_retries(4)
            .timeout_secs(12)
            .build()
            .unwrap();
        (InvocationClient::new(config, svc.clone()), svc)
    }

    #[test]
    fn request_override_replaces_configured_retries() {
        let (c, _) = client("{}");
        let req = InvocationRequest::new("x", ResponseSchema::any_object("s"));
        assert_eq!(c.policy_for(&req).max_retries, 4);
        assert_eq!(c.policy_for(&req.with_max_retries(1)).max_retries, 1);
    }

    #[tokio::test]
    async fn timeout_defaults_to_config_and_honours_override() {
        let (c, svc) = client(r#"{"ok":true}"#);
        let mut usage = LlmUsage::default();
        let req = InvocationRequest::new("x", ResponseSchema::any_object("s"));

        c.invoke(&req, &mut usage).await;
        c.invoke(&req.clone().with_timeout_secs(3), &mut usage).await;

        let seen = svc.timeouts.lock().unwrap().clone();
        assert_eq!(seen, vec![Duration::from_secs(12), Duration::from_secs(3)]);
        assert_eq!(usage.llm_request_count, 2);
        assert_eq!(usage.llm_tokens_used, 10);
    }

    #[tokio::test]
    async fn call_returns_payload_mapping() {
        let (c, _) = client(r#"{"rows":[]}"#);
        let mut usage = LlmUsage::default();
        let req = InvocationRequest::new("x", ResponseSchema::any_object("s"));
        let value = c.call(&req, &mut usage).await;
        assert_eq!(value, serde_json::json!({ "rows": [] }));
        assert_eq!(c.service_name(), "echo");
    }
}
