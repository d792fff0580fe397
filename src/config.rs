//! Configuration for the invocation layer.
//!
//! Everything the client needs from the outside world (endpoint, model,
//! credential, retry defaults and fallback mode) lives in one immutable
//! [`ServiceConfig`]. It is built once at startup (typically from
//! environment variables by the binary) and handed to
//! [`crate::InvocationClient`]; the library itself never reads the
//! environment or the filesystem.
//!
//! Construction follows the builder pattern: callers set only what they care
//! about and rely on documented defaults for the rest.

use crate::error::VlmError;
use crate::pipeline::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Immutable settings for one [`crate::InvocationClient`].
///
/// # Example
/// ```rust
/// use edgequake_vlm::{OutputFormat, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .model("gpt-4.1")
///     .max_retries(2)
///     .output_format(OutputFormat::Json)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 2);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Registry key of the service implementation. Default: `"openai"`.
    pub service: String,

    /// Base URL of the OpenAI-compatible endpoint, without trailing slash.
    pub base_url: String,

    /// Model identifier sent with every request. Default: `gpt-4o-mini`.
    pub model: String,

    /// Bearer credential. `None` is allowed for local endpoints (vLLM, Ollama).
    pub api_key: Option<String>,

    /// Retries after the first attempt on transient failures. Default: 3.
    ///
    /// A call makes at most `max_retries + 1` attempts. Fatal failures
    /// (auth, validation, 5xx) never consume this budget; they abort at once.
    pub max_retries: u32,

    /// Per-attempt timeout in seconds. Default: 30.
    pub timeout_secs: u64,

    /// Backoff unit in milliseconds. Default: 3000.
    ///
    /// The n-th retry waits `min(n * backoff_unit_ms, backoff_cap_ms)`:
    /// 3 s → 6 s → 9 s → 10 s → 10 s … with the defaults.
    pub backoff_unit_ms: u64,

    /// Upper bound on any single backoff wait. Default: 10000.
    pub backoff_cap_ms: u64,

    /// Return `{content, format}` when no structure can be recovered. Default: true.
    pub fallback_to_text: bool,

    /// Format tag written into the text-fallback envelope. Default: markdown.
    pub output_format: OutputFormat,

    /// Wire encoding for images. Default: lossless WebP.
    pub image_encoding: ImageEncoding,

    /// Sampling temperature. Default: 0.1.
    ///
    /// `None` omits the field from requests; reasoning models reject any
    /// non-default value.
    pub temperature: Option<f32>,

    /// Value of the `X-Title` header.
    pub app_title: String,

    /// Value of the `HTTP-Referer` header.
    pub app_referer: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: "openai".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_retries: 3,
            timeout_secs: 30,
            backoff_unit_ms: 3000,
            backoff_cap_ms: 10_000,
            fallback_to_text: true,
            output_format: OutputFormat::default(),
            image_encoding: ImageEncoding::default(),
            temperature: Some(0.1),
            app_title: "edgequake-vlm".to_string(),
            app_referer: "https://github.com/raphaelmansuy/edgequake-vlm".to_string(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .field("backoff_unit_ms", &self.backoff_unit_ms)
            .field("backoff_cap_ms", &self.backoff_cap_ms)
            .field("fallback_to_text", &self.fallback_to_text)
            .field("output_format", &self.output_format)
            .field("image_encoding", &self.image_encoding)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Default retry policy, before per-request overrides.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.config.service = name.into().trim().to_lowercase();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn backoff_unit_ms(mut self, ms: u64) -> Self {
        self.config.backoff_unit_ms = ms;
        self
    }

    pub fn backoff_cap_ms(mut self, ms: u64) -> Self {
        self.config.backoff_cap_ms = ms;
        self
    }

    pub fn fallback_to_text(mut self, v: bool) -> Self {
        self.config.fallback_to_text = v;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn image_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.config.image_encoding = encoding;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t);
        self
    }

    /// Leave the temperature to the model's default.
    pub fn without_temperature(mut self) -> Self {
        self.config.temperature = None;
        self
    }

    pub fn app_title(mut self, title: impl Into<String>) -> Self {
        self.config.app_title = title.into();
        self
    }

    pub fn app_referer(mut self, referer: impl Into<String>) -> Self {
        self.config.app_referer = referer.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, VlmError> {
        let c = &self.config;
        if c.service.is_empty() {
            return Err(VlmError::InvalidConfig("Service name must not be empty".into()));
        }
        if c.model.trim().is_empty() {
            return Err(VlmError::InvalidConfig("Model must not be empty".into()));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(VlmError::InvalidConfig(format!(
                "Base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.timeout_secs == 0 {
            return Err(VlmError::InvalidConfig("Timeout must be ≥ 1 second".into()));
        }
        if let Some(t) = c.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(VlmError::InvalidConfig(format!(
                    "Temperature must be 0.0–2.0, got {t}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output format tag carried by the text-fallback envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Html,
    Chunks,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
            OutputFormat::Chunks => "chunks",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = VlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            "chunks" => Ok(OutputFormat::Chunks),
            other => Err(VlmError::InvalidConfig(format!(
                "Unknown output format '{other}' (expected markdown, json, html or chunks)"
            ))),
        }
    }
}

/// Image wire encoding.
///
/// WebP is the default: the `image` crate writes it losslessly, so rendered
/// text stays crisp, and payloads are noticeably smaller than PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    #[default]
    WebP,
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::WebP => "image/webp",
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageEncoding::WebP => "webp",
            ImageEncoding::Png => "png",
            ImageEncoding::Jpeg => "jpeg",
        }
    }

    pub(crate) fn image_format(&self) -> image::ImageFormat {
        match self {
            ImageEncoding::WebP => image::ImageFormat::WebP,
            ImageEncoding::Png => image::ImageFormat::Png,
            ImageEncoding::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl FromStr for ImageEncoding {
    type Err = VlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "webp" => Ok(ImageEncoding::WebP),
            "png" => Ok(ImageEncoding::Png),
            "jpg" | "jpeg" => Ok(ImageEncoding::Jpeg),
            other => Err(VlmError::InvalidConfig(format!(
                "Unknown image format '{other}' (expected webp, png or jpeg)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = ServiceConfig::default();
        assert_eq!(c.service, "openai");
        assert_eq!(c.base_url, DEFAULT_BASE_URL);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.timeout(), Duration::from_secs(30));
        assert!(c.fallback_to_text);
        assert_eq!(c.output_format, OutputFormat::Markdown);
        assert_eq!(c.image_encoding, ImageEncoding::WebP);

        let policy = c.retry_policy();
        assert_eq!(policy.backoff_unit, Duration::from_secs(3));
        assert_eq!(policy.backoff_cap, Duration::from_secs(10));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let c = ServiceConfig::builder()
            .base_url("http://localhost:8000/v1/")
            .build()
            .unwrap();
        assert_eq!(c.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn builder_rejects_bad_url() {
        let err = ServiceConfig::builder().base_url("localhost").build().unwrap_err();
        assert!(matches!(err, VlmError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_timeout_and_empty_model() {
        assert!(ServiceConfig::builder().timeout_secs(0).build().is_err());
        assert!(ServiceConfig::builder().model("  ").build().is_err());
    }

    #[test]
    fn empty_api_key_is_none() {
        let c = ServiceConfig::builder().api_key("").build().unwrap();
        assert!(c.api_key.is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ServiceConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn output_format_parses_case_insensitively() {
        assert_eq!("Markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn image_encoding_parses_aliases() {
        assert_eq!("jpg".parse::<ImageEncoding>().unwrap(), ImageEncoding::Jpeg);
        assert_eq!("webp".parse::<ImageEncoding>().unwrap().mime_type(), "image/webp");
    }

    #[test]
    fn temperature_can_be_omitted_and_is_validated() {
        assert_eq!(ServiceConfig::default().temperature, Some(0.1));
        let c = ServiceConfig::builder().without_temperature().build().unwrap();
        assert_eq!(c.temperature, None);
        assert!(ServiceConfig::builder().temperature(3.5).build().is_err());
    }
}
