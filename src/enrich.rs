//! Concurrent enrichment of many document units.
//!
//! A document typically has dozens of units (tables, figures, equations)
//! that each need one invocation. Calls are network-bound, so they run
//! concurrently up to a limit. A unit whose call ends `Empty` simply gets no
//! enrichment; the others carry on.

use crate::document::DocumentUnit;
use crate::pipeline::client::InvocationClient;
use crate::request::{InvocationOutcome, InvocationRequest};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Aggregate counters for one [`enrich_units`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub succeeded: usize,
    pub empty: usize,
    pub total_tokens: u64,
    pub duration_ms: u64,
}

/// Invoke every `(request, unit)` job with at most `concurrency` in flight.
///
/// Outcomes are returned in job order regardless of completion order.
pub async fn enrich_units<'a, U>(
    client: &InvocationClient,
    jobs: Vec<(InvocationRequest, &'a mut U)>,
    concurrency: usize,
) -> (Vec<InvocationOutcome>, EnrichmentSummary)
where
    U: DocumentUnit,
{
    let start = Instant::now();
    let total = jobs.len();

    let outcomes: Vec<InvocationOutcome> = stream::iter(jobs.into_iter().map(|(request, unit)| {
        async move { client.invoke(&request, unit).await }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut summary = EnrichmentSummary {
        duration_ms: start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    for outcome in &outcomes {
        match outcome.usage() {
            Some(usage) => {
                summary.succeeded += 1;
                summary.total_tokens += usage.total_tokens;
            }
            None => summary.empty += 1,
        }
    }

    info!(
        "Enrichment complete: {}/{} units, {} tokens, {}ms",
        summary.succeeded, total, summary.total_tokens, summary.duration_ms
    );

    (outcomes, summary)
}
