//! Request and outcome types for one invocation.

use crate::schema::ResponseSchema;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything needed for one call, except the document unit.
///
/// Fields are private and only readable once built, so a request can be
/// shared between attempts without being altered.
///
/// # Example
/// ```rust
/// use edgequake_vlm::{InvocationRequest, ResponseSchema};
/// use image::{DynamicImage, RgbImage};
///
/// let page = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
/// let request = InvocationRequest::new(
///     "Extract the table as JSON.",
///     ResponseSchema::any_object("table"),
/// )
/// .with_image(page)
/// .with_max_retries(1);
/// assert_eq!(request.images().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    instruction: String,
    images: Vec<DynamicImage>,
    schema: ResponseSchema,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
}

impl InvocationRequest {
    pub fn new(instruction: impl Into<String>, schema: ResponseSchema) -> Self {
        Self {
            instruction: instruction.into(),
            images: Vec::new(),
            schema,
            max_retries: None,
            timeout_secs: None,
        }
    }

    pub fn with_image(mut self, image: DynamicImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_images(mut self, images: impl IntoIterator<Item = DynamicImage>) -> Self {
        self.images.extend(images);
        self
    }

    /// Override the configured retry budget for this call only.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Override the configured per-attempt timeout for this call only.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs.max(1));
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn images(&self) -> &[DynamicImage] {
        &self.images
    }

    pub fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}

/// Token usage reported by the service for one successful round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
}

/// Result of one invocation. There is no third state: failures are `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success {
        payload: Value,
        raw_text: String,
        usage: TokenUsage,
    },
    /// Retries exhausted, fatal error, encoding failure, or unparseable
    /// output with fallback disabled.
    Empty,
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            InvocationOutcome::Success { payload, .. } => Some(payload),
            InvocationOutcome::Empty => None,
        }
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            InvocationOutcome::Success { usage, .. } => Some(*usage),
            InvocationOutcome::Empty => None,
        }
    }

    /// The payload, or `{}` for `Empty`.
    pub fn into_payload(self) -> Value {
        match self {
            InvocationOutcome::Success { payload, .. } => payload,
            InvocationOutcome::Empty => Value::Object(Map::new()),
        }
    }
}
