//! Usage accounting on caller-owned document units.
//!
//! A document unit (a page, a table block, a figure…) belongs to the
//! surrounding pipeline. The invocation layer borrows it for the duration of
//! one call and may only append to its LLM usage counters.

use crate::request::TokenUsage;
use serde::{Deserialize, Serialize};

/// LLM usage accumulated on one document unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub llm_tokens_used: u64,
    pub llm_request_count: u64,
}

/// A caller-owned entity that accumulates LLM usage.
///
/// Implementors expose their usage counters and nothing else; the rest of
/// their metadata is invisible to this crate.
pub trait DocumentUnit: Send {
    fn llm_usage_mut(&mut self) -> &mut LlmUsage;
}

/// A bare counter is a valid unit.
impl DocumentUnit for LlmUsage {
    fn llm_usage_mut(&mut self) -> &mut LlmUsage {
        self
    }
}

/// Applies successful-call usage to a [`DocumentUnit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataRecorder;

impl MetadataRecorder {
    /// One more request, `usage.total_tokens` more tokens.
    pub fn record(unit: &mut dyn DocumentUnit, usage: &TokenUsage) {
        let counters = unit.llm_usage_mut();
        counters.llm_request_count = counters.llm_request_count.saturating_add(1);
        counters.llm_tokens_used = counters.llm_tokens_used.saturating_add(usage.total_tokens);
    }
}
