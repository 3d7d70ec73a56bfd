//! Two-state harvest: one baseline attempt, an optional deepened retry, and adoption of
//! whichever attempt yielded more items.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;
use vvw_adapters::{AdapterContext, Attempt, HarvestLimits, SourceAdapter};
use vvw_core::{DiagnosticRecord, Mode, RawItem, RuntimeStats, Source};

#[derive(Debug, Clone)]
pub struct HarvestRequest {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub days: u32,
    pub queries: Vec<String>,
    pub limits: HarvestLimits,
}

/// Immutable snapshot of one attempt: its own items and its own diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestAttempt {
    pub attempt: Attempt,
    pub limits: HarvestLimits,
    pub items: Vec<RawItem>,
    pub diagnostics: Vec<DiagnosticRecord>,
    #[serde(skip)]
    sources: Vec<Source>,
}

impl HarvestAttempt {
    /// A reddit search/listing call came back ok with at least one result.
    pub fn reddit_productive(&self) -> bool {
        self.diagnostics.iter().any(|d| {
            d.source_kind.source() == Source::Reddit
                && d.source_kind.counts_as_hit()
                && d.is_productive()
        })
    }

    /// Result counts summed over search/listing/seed calls; comment and enrichment calls
    /// are not hits.
    pub fn raw_hits(&self) -> BTreeMap<Source, usize> {
        let mut hits = self.zeroed();
        for record in self.diagnostics.iter().filter(|d| d.source_kind.counts_as_hit()) {
            *hits.entry(record.source_kind.source()).or_default() += record.result_count;
        }
        hits
    }

    pub fn analyzed_hits(&self) -> BTreeMap<Source, usize> {
        let mut hits = self.zeroed();
        for item in &self.items {
            *hits.entry(item.source).or_default() += 1;
        }
        hits
    }

    fn zeroed(&self) -> BTreeMap<Source, usize> {
        self.sources.iter().map(|s| (*s, 0)).collect()
    }
}

/// Sufficiency predicate: too few items, or reddit produced nothing.
pub fn needs_retry(mode: Mode, attempt: &HarvestAttempt) -> bool {
    attempt.items.len() < mode.retry_threshold() || !attempt.reddit_productive()
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub adopted: HarvestAttempt,
    /// Item count of the attempt that lost, when a retry ran.
    pub superseded_items: Option<usize>,
    pub stats: RuntimeStats,
}

pub struct HarvestOrchestrator {
    mode: Mode,
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl HarvestOrchestrator {
    pub fn new(mode: Mode, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        Self { mode, adapters }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.adapters.iter().map(|a| a.source()).collect()
    }

    pub async fn run(&self, request: &HarvestRequest) -> HarvestOutcome {
        let initial = self
            .run_attempt(request, Attempt::Initial, request.limits)
            .await;
        let retry_wanted = needs_retry(self.mode, &initial);
        info!(
            run_id = %request.run_id,
            mode = self.mode.as_str(),
            items = initial.items.len(),
            threshold = self.mode.retry_threshold(),
            reddit_productive = initial.reddit_productive(),
            retry = retry_wanted,
            "initial harvest settled"
        );
        if !retry_wanted {
            return finish(initial, None, false, false);
        }

        let retried = self
            .run_attempt(request, Attempt::Retried, request.limits.deepened())
            .await;
        if retried.items.len() > initial.items.len() {
            info!(
                initial = initial.items.len(),
                retried = retried.items.len(),
                "adopting deepened retry"
            );
            let superseded = initial.items.len();
            finish(retried, Some(superseded), true, true)
        } else {
            info!(
                initial = initial.items.len(),
                retried = retried.items.len(),
                "retry did not improve yield; keeping initial harvest"
            );
            let superseded = retried.items.len();
            finish(initial, Some(superseded), true, false)
        }
    }

    async fn run_attempt(
        &self,
        request: &HarvestRequest,
        attempt: Attempt,
        limits: HarvestLimits,
    ) -> HarvestAttempt {
        let ctx = AdapterContext {
            run_id: request.run_id,
            attempt,
            now: request.now,
            days: request.days,
            queries: request.queries.clone(),
            limits,
        };
        // Distinct sources run concurrently; each adapter keeps its own calls sequential.
        let harvests = join_all(self.adapters.iter().map(|a| a.harvest(&ctx))).await;

        let mut seen: HashSet<(Source, String)> = HashSet::new();
        let mut items = Vec::new();
        let mut diagnostics = Vec::new();
        for harvest in harvests {
            diagnostics.extend(harvest.diagnostics);
            for item in harvest.items {
                if seen.insert((item.source, item.id.clone())) {
                    items.push(item);
                }
            }
        }

        HarvestAttempt {
            attempt,
            limits,
            items,
            diagnostics,
            sources: self.sources(),
        }
    }
}

fn finish(
    adopted: HarvestAttempt,
    superseded_items: Option<usize>,
    retry_used: bool,
    retry_adopted: bool,
) -> HarvestOutcome {
    let stats = RuntimeStats {
        raw_hits_per_source: adopted.raw_hits(),
        analyzed_hits_per_source: adopted.analyzed_hits(),
        retry_used,
        retry_adopted,
    };
    HarvestOutcome {
        adopted,
        superseded_items,
        stats,
    }
}
