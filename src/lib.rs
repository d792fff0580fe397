//! # edgequake-vlm
//!
//! Resilient multimodal LLM invocation for document pipelines.
//!
//! ## Why this crate?
//!
//! Document converters increasingly hand hard regions (tables, forms,
//! equations) to a vision-language model and ask for structured JSON back.
//! In production that call fails in boring ways: rate limits under
//! concurrency, slow responses, bad keys, and models that wrap their JSON in
//! chatter or ignore the schema altogether. This crate is the one canonical
//! wrapper for that call: classified retries with capped backoff, tiered
//! output recovery, and per-unit usage accounting, without ever aborting the
//! surrounding pipeline.
//!
//! ## Call Overview
//!
//! ```text
//! (instruction, images, schema)
//!  │
//!  ├─ 1. Encode    DynamicImage → lossless WebP / PNG / JPEG bytes
//!  ├─ 2. Assemble  one user message: text, then images in order
//!  ├─ 3. Send      VisionService round trip; timeout / 429 → backoff + retry,
//!  │               anything else → stop
//!  ├─ 4. Normalise strict JSON → boundary repair → {content, format} fallback
//!  └─ 5. Record    +1 request, +tokens on the caller's document unit
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_vlm::{InvocationClient, InvocationRequest, LlmUsage, ResponseSchema, ServiceConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .model("gpt-4o-mini")
//!         .build()?;
//!     let client = InvocationClient::from_config(config)?;
//!
//!     let page = image::open("table.png")?;
//!     let schema = ResponseSchema::new(
//!         "table",
//!         json!({ "type": "object", "properties": { "html": { "type": "string" } }, "required": ["html"] }),
//!     );
//!     let request = InvocationRequest::new("Convert this table to HTML.", schema).with_image(page);
//!
//!     let mut usage = LlmUsage::default();
//!     let payload = client.call(&request, &mut usage).await;
//!     println!("{payload}");
//!     eprintln!("{} tokens over {} request(s)", usage.llm_tokens_used, usage.llm_request_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vlm-call` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod enrich;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod schema;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImageEncoding, OutputFormat, ServiceConfig, ServiceConfigBuilder};
pub use document::{DocumentUnit, LlmUsage, MetadataRecorder};
pub use enrich::{enrich_units, EnrichmentSummary};
pub use error::{EncodingError, FailureClass, InvocationError, ResponseParseError, VlmError};
pub use pipeline::client::InvocationClient;
pub use pipeline::encode::{EncodedImage, ImageEncoder};
pub use pipeline::normalize::{Normalized, Resolution, ResponseNormalizer};
pub use pipeline::prompt::{ContentPart, Message, PromptAssembler};
pub use pipeline::retry::{CallState, RetryPolicy};
pub use request::{InvocationOutcome, InvocationRequest, TokenUsage};
pub use schema::ResponseSchema;
pub use service::{OpenAiService, ProviderService, ServiceCall, ServiceRegistry, ServiceReply, VisionService};
