//! Source adapter contract + Reddit/YouTube adapter implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use vvw_core::{
    window_cutoff, DiagnosticRecord, DiagnosticStatus, RawItem, RunConfig, Source, SourceKind,
};
use vvw_storage::{HttpFetcher, Url};

pub mod reddit;
pub mod youtube;

pub use reddit::RedditAdapter;
pub use youtube::YoutubeAdapter;

pub const CRATE_NAME: &str = "vvw-adapters";

/// State of the harvest state machine an adapter call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    Initial,
    Retried,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarvestLimits {
    pub per_query_limit: usize,
    pub per_sub_limit: usize,
    pub per_post_comment_limit: usize,
    pub max_videos_per_channel: usize,
    pub max_videos_total: usize,
}

impl HarvestLimits {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            per_query_limit: config.reddit.per_query_limit,
            per_sub_limit: config.reddit.per_sub_limit,
            per_post_comment_limit: config.reddit.per_post_comment_limit,
            max_videos_per_channel: config.youtube.max_videos_per_channel,
            max_videos_total: config.youtube.max_videos_total,
        }
    }

    /// Raises every limit to its retry floor; limits already above a floor are kept.
    pub fn deepened(&self) -> Self {
        Self {
            per_query_limit: self.per_query_limit.max(20),
            per_sub_limit: self.per_sub_limit.max(50),
            per_post_comment_limit: self.per_post_comment_limit.max(30),
            max_videos_per_channel: self.max_videos_per_channel.max(4),
            max_videos_total: self.max_videos_total.max(12),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub attempt: Attempt,
    pub now: DateTime<Utc>,
    pub days: u32,
    pub queries: Vec<String>,
    pub limits: HarvestLimits,
}

impl AdapterContext {
    pub fn cutoff(&self) -> DateTime<Utc> {
        window_cutoff(self.now, self.days)
    }

    pub fn is_within_window(&self, created_at: Option<DateTime<Utc>>) -> bool {
        created_at.map_or(true, |ts| ts >= self.cutoff())
    }
}

/// Items plus one diagnostic record per call actually made.
#[derive(Debug, Clone, Default)]
pub struct SourceHarvest {
    pub items: Vec<RawItem>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

impl SourceHarvest {
    pub fn record(&mut self, record: DiagnosticRecord) {
        match record.status {
            DiagnosticStatus::Ok | DiagnosticStatus::NoResults => debug!(
                kind = ?record.source_kind,
                target = %record.target,
                status = %record.status,
                results = record.result_count,
                "adapter call"
            ),
            _ => warn!(
                kind = ?record.source_kind,
                target = %record.target,
                status = %record.status,
                "adapter call failed"
            ),
        }
        self.diagnostics.push(record);
    }

    pub fn record_failure(&mut self, kind: SourceKind, target: &str, status: DiagnosticStatus) {
        self.record(DiagnosticRecord::new(kind, target, status, 0));
    }
}

/// Never fails: transport problems surface as diagnostic statuses and an empty item list.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn harvest(&self, ctx: &AdapterContext) -> SourceHarvest;
}

pub(crate) fn endpoint(base: &str, path: &str, params: &[(&str, String)]) -> Option<Url> {
    let raw = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    match Url::parse_with_params(&raw, params) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(url = %raw, error = %err, "could not build endpoint url");
            None
        }
    }
}

pub(crate) fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Builds one adapter per enabled source, in configuration order.
pub fn adapters_for_config(
    config: &RunConfig,
    http: Arc<HttpFetcher>,
    youtube_api_key: Option<String>,
) -> Vec<Box<dyn SourceAdapter>> {
    let mut out: Vec<Box<dyn SourceAdapter>> = Vec::new();
    for source in &config.sources {
        if out.iter().any(|a| a.source() == *source) {
            continue;
        }
        match source {
            Source::Reddit => out.push(Box::new(RedditAdapter::new(
                http.clone(),
                config.reddit.clone(),
            ))),
            Source::Youtube => out.push(Box::new(YoutubeAdapter::new(
                http.clone(),
                config.youtube.clone(),
                youtube_api_key.clone(),
            ))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vvw_storage::HttpClientConfig;

    #[test]
    fn deepened_limits_respect_floors_and_keep_larger_values() {
        let base = HarvestLimits {
            per_query_limit: 5,
            per_sub_limit: 80,
            per_post_comment_limit: 10,
            max_videos_per_channel: 2,
            max_videos_total: 5,
        };
        let deep = base.deepened();
        assert_eq!(deep.per_query_limit, 20);
        assert_eq!(deep.per_sub_limit, 80);
        assert_eq!(deep.per_post_comment_limit, 30);
        assert_eq!(deep.max_videos_per_channel, 4);
        assert_eq!(deep.max_videos_total, 12);
    }

    #[test]
    fn window_check_keeps_undated_items() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).single().unwrap();
        let ctx = AdapterContext {
            run_id: Uuid::new_v4(),
            attempt: Attempt::Initial,
            now,
            days: 7,
            queries: vec![],
            limits: HarvestLimits::from_config(&RunConfig::default()),
        };
        assert!(ctx.is_within_window(None));
        assert!(ctx.is_within_window(Some(Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).single().unwrap())));
        assert!(!ctx.is_within_window(Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).single().unwrap())));
    }

    #[test]
    fn endpoint_joins_base_and_encodes_params() {
        let url = endpoint(
            "https://www.googleapis.com/youtube/v3/",
            "/search",
            &[("q", "\"Roborock\" robot vacuum".to_string())],
        )
        .unwrap();
        assert_eq!(url.path(), "/youtube/v3/search");
        assert!(url.query().unwrap().starts_with("q=%22Roborock%22"));
    }

    #[test]
    fn one_adapter_per_enabled_source() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let mut config = RunConfig::default();
        config.sources = vec![Source::Youtube, Source::Reddit, Source::Youtube];
        let adapters = adapters_for_config(&config, http, None);
        let sources: Vec<Source> = adapters.iter().map(|a| a.source()).collect();
        assert_eq!(sources, vec![Source::Youtube, Source::Reddit]);
    }
}
