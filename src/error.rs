//! Error types for the edgequake-vlm library.
//!
//! Failures fall into two groups with different propagation rules:
//!
//! * [`VlmError`]: **Construction-time**: the client cannot be built at all
//!   (invalid configuration, unknown service name, provider not configured).
//!   Returned as `Err(VlmError)` from builders and constructors.
//!
//! * Call-time errors: [`EncodingError`], [`InvocationError`] and
//!   [`ResponseParseError`]. Each is produced by one pipeline stage and is
//!   downgraded to [`crate::InvocationOutcome::Empty`] by
//!   [`crate::InvocationClient::invoke`], so one failed unit never aborts a
//!   multi-unit run. Only [`crate::ResponseNormalizer::normalize`] hands its
//!   error to the caller directly.

use thiserror::Error;

/// Fatal errors raised while building a client.
#[derive(Debug, Error)]
pub enum VlmError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured service name is not in the registry.
    #[error("Unknown LLM service '{name}'. Known services: {known}")]
    UnknownService { name: String, known: String },

    /// The service exists but could not be initialised (missing API key etc.).
    #[error("LLM service '{service}' is not configured.\n{hint}")]
    ServiceNotConfigured { service: String, hint: String },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// An image could not be serialised for the request body.
///
/// Local and deterministic, so it is never retried.
#[derive(Debug, Clone, Error)]
#[error("Image {index} could not be encoded as {format}: {detail}")]
pub struct EncodingError {
    /// Position of the image in the request (0-indexed).
    pub index: usize,
    /// Target encoding name, e.g. `"webp"`.
    pub format: &'static str,
    pub detail: String,
}

/// Retry eligibility of an [`InvocationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts and rate limits: retried with backoff.
    Transient,
    /// Everything else: abort the call immediately.
    Fatal,
}

/// A failed round trip to the model service.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    /// The attempt exceeded its timeout.
    #[error("Request to '{service}' timed out after {elapsed_ms}ms")]
    Timeout { service: String, elapsed_ms: u64 },

    /// HTTP 429 or an equivalent provider signal.
    #[error("Rate limit exceeded for service '{service}'")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    /// 401/403: retrying with the same credential cannot help.
    #[error("Authentication error from service '{service}': {detail}")]
    Auth { service: String, detail: String },

    /// Any other transport, server or protocol failure.
    #[error("Service '{service}' failed{}: {detail}", status_suffix(.status))]
    Service {
        service: String,
        status: Option<u16>,
        detail: String,
    },
}

impl InvocationError {
    pub fn class(&self) -> FailureClass {
        match self {
            InvocationError::Timeout { .. } | InvocationError::RateLimited { .. } => {
                FailureClass::Transient
            }
            InvocationError::Auth { .. } | InvocationError::Service { .. } => FailureClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// No structured payload could be recovered and text fallback is disabled.
#[derive(Debug, Clone, Error)]
#[error("Response does not match schema '{schema}': {detail}")]
pub struct ResponseParseError {
    pub schema: String,
    pub detail: String,
    /// The raw model output, kept so callers can log or inspect it.
    pub raw_text: String,
}
