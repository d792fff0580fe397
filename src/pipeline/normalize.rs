//! Response normalisation: raw model text → structured payload.
//!
//! Model output comes in three qualities. Well-behaved runs return exactly
//! the requested JSON; degraded runs wrap it in commentary ("Here is the
//! result: {...}") or code fences; failing runs ignore the schema and answer
//! in prose. The normaliser resolves them in tiers:
//!
//! 1. **Strict**: parse the trimmed text as JSON and check it against the schema.
//! 2. **Boundary repair**: cut from the first `{`/`[` to the last matching
//!    closer and parse again.
//! 3. **Text fallback**: if enabled, wrap the raw text as
//!    `{"content": <raw>, "format": <tag>}`.
//! 4. Otherwise fail with [`ResponseParseError`].

use crate::config::OutputFormat;
use crate::error::ResponseParseError;
use crate::schema::ResponseSchema;
use serde_json::{json, Value};
use tracing::debug;

/// Which tier produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Strict,
    BoundaryRepair,
    TextFallback,
}

/// A resolved payload and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub payload: Value,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseNormalizer {
    fallback_to_text: bool,
    format: OutputFormat,
}

impl ResponseNormalizer {
    pub fn new(fallback_to_text: bool, format: OutputFormat) -> Self {
        Self {
            fallback_to_text,
            format,
        }
    }

    pub fn normalize(
        &self,
        raw: &str,
        schema: &ResponseSchema,
    ) -> Result<Normalized, ResponseParseError> {
        let strict_err = match parse_against(raw.trim(), schema) {
            Ok(payload) => {
                return Ok(Normalized {
                    payload,
                    resolution: Resolution::Strict,
                })
            }
            Err(e) => e,
        };

        for candidate in bounded_candidates(raw) {
            if let Ok(payload) = parse_against(candidate, schema) {
                debug!("Recovered structured payload by boundary repair");
                return Ok(Normalized {
                    payload,
                    resolution: Resolution::BoundaryRepair,
                });
            }
        }

        if self.fallback_to_text {
            debug!(
                "No structure recovered; wrapping {} chars as {}",
                raw.len(),
                self.format
            );
            return Ok(Normalized {
                payload: json!({ "content": raw, "format": self.format.as_str() }),
                resolution: Resolution::TextFallback,
            });
        }

        Err(ResponseParseError {
            schema: schema.name.clone(),
            detail: strict_err,
            raw_text: raw.to_string(),
        })
    }
}

fn parse_against(text: &str, schema: &ResponseSchema) -> Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if schema.accepts(&value) {
        Ok(value)
    } else {
        Err(format!("parsed JSON does not have the shape of '{}'", schema.name))
    }
}

/// Substrings from an opener to the last matching closer, tried in the order
/// the openers first appear.
fn bounded_candidates(raw: &str) -> Vec<&str> {
    let mut openers: Vec<(usize, char)> = ['{', '[']
        .into_iter()
        .filter_map(|open| raw.find(open).map(|i| (i, open)))
        .collect();
    openers.sort_unstable_by_key(|&(i, _)| i);

    openers
        .into_iter()
        .filter_map(|(start, open)| {
            let close = if open == '{' { '}' } else { ']' };
            raw.rfind(close)
                .filter(|&end| end > start)
                .map(|end| &raw[start..=end])
        })
        .collect()
}
