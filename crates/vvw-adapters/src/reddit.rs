//! Reddit public JSON adapter: global search, subreddit search/listing, per-post comments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;
use vvw_core::{
    Comment, DiagnosticRecord, DiagnosticStatus, ItemBody, RawItem, RedditConfig, Source,
    SourceKind,
};
use vvw_storage::{HttpFetcher, Url};

use crate::{endpoint, non_empty, AdapterContext, SourceAdapter, SourceHarvest};

pub const SOURCE_FAMILY: &str = "reddit";
pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

/// Reddit caps listing pages at 100 entries.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct Listing {
    #[serde(default)]
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    data: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostData {
    id: String,
    title: String,
    selftext: String,
    permalink: String,
    url: String,
    subreddit: String,
    score: i64,
    num_comments: u64,
    created_utc: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentData {
    body: String,
    author: String,
    score: i64,
}

pub struct RedditAdapter {
    http: Arc<HttpFetcher>,
    config: RedditConfig,
    base_url: String,
}

impl RedditAdapter {
    pub fn new(http: Arc<HttpFetcher>, config: RedditConfig) -> Self {
        Self {
            http,
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn listing_sort(&self) -> &'static str {
        match self.config.listing_sort.trim().to_ascii_lowercase().as_str() {
            "hot" => "hot",
            "top" => "top",
            _ => "new",
        }
    }

    /// Quoted keywords OR-joined, the subreddit-search form.
    fn keyword_query(&self) -> Option<String> {
        let terms: Vec<String> = self
            .config
            .query_keywords
            .iter()
            .filter_map(|k| non_empty(k))
            .map(|k| format!("\"{k}\""))
            .collect();
        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" OR "))
        }
    }

    async fn global_search(&self, ctx: &AdapterContext, out: &mut SourceHarvest) -> Vec<RawItem> {
        let mut items = Vec::new();
        let limit = ctx.limits.per_query_limit.min(MAX_PAGE_SIZE);
        if limit == 0 {
            return items;
        }
        for query in ctx.queries.iter().filter_map(|q| non_empty(q)) {
            let url = endpoint(
                &self.base_url,
                "search.json",
                &[
                    ("q", query.clone()),
                    ("sort", "new".to_string()),
                    ("t", time_filter(ctx.days).to_string()),
                    ("limit", limit.to_string()),
                    ("raw_json", "1".to_string()),
                ],
            );
            let found = self
                .fetch_posts(ctx, SourceKind::RedditSearch, &query, url, out)
                .await;
            items.extend(found);
        }
        items
    }

    async fn subreddit_pass(&self, ctx: &AdapterContext, out: &mut SourceHarvest) -> Vec<RawItem> {
        let mut items = Vec::new();
        let limit = ctx.limits.per_sub_limit.min(MAX_PAGE_SIZE);
        if limit == 0 {
            return items;
        }
        let keyword_query = self.keyword_query();
        for sub in self.config.subreddits.iter().filter_map(|s| non_empty(s)) {
            let sub = sub.trim_start_matches("r/").to_string();
            let url = match &keyword_query {
                Some(q) => endpoint(
                    &self.base_url,
                    &format!("r/{sub}/search.json"),
                    &[
                        ("q", q.clone()),
                        ("restrict_sr", "1".to_string()),
                        ("sort", "new".to_string()),
                        ("t", time_filter(ctx.days).to_string()),
                        ("limit", limit.to_string()),
                        ("raw_json", "1".to_string()),
                    ],
                ),
                None => endpoint(
                    &self.base_url,
                    &format!("r/{sub}/{}.json", self.listing_sort()),
                    &[("limit", limit.to_string()), ("raw_json", "1".to_string())],
                ),
            };
            let found = self
                .fetch_posts(ctx, SourceKind::RedditListing, &sub, url, out)
                .await;
            items.extend(found);
        }
        items
    }

    /// One call; duplicates within this single response are dropped.
    async fn fetch_posts(
        &self,
        ctx: &AdapterContext,
        kind: SourceKind,
        target: &str,
        url: Option<Url>,
        out: &mut SourceHarvest,
    ) -> Vec<RawItem> {
        // Unbuildable url: `endpoint` already warned and no call is made, so nothing is recorded.
        let Some(url) = url else {
            return Vec::new();
        };
        let listing: Listing = match self.http.fetch_json(SOURCE_FAMILY, &url).await {
            Ok(listing) => listing,
            Err(err) => {
                out.record_failure(kind, target, err.diagnostic_status());
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let items: Vec<RawItem> = listing
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind.is_empty() || thing.kind == "t3")
            .filter_map(|thing| serde_json::from_value::<PostData>(thing.data).ok())
            .filter_map(|post| self.post_to_item(post))
            .filter(|item| ctx.is_within_window(item.created_at))
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        out.record(DiagnosticRecord::new(
            kind,
            target,
            DiagnosticStatus::from_count(items.len()),
            items.len(),
        ));
        items
    }

    fn post_to_item(&self, post: PostData) -> Option<RawItem> {
        let id = non_empty(&post.id)?;
        let url = match non_empty(&post.permalink) {
            Some(permalink) => format!("{}{}", DEFAULT_BASE_URL, permalink),
            None => post.url.clone(),
        };
        Some(RawItem {
            source: Source::Reddit,
            id,
            title: post.title,
            url,
            community: post.subreddit,
            body: ItemBody::Post {
                selftext: post.selftext,
            },
            created_at: DateTime::<Utc>::from_timestamp(post.created_utc as i64, 0),
            engagement_score: post.score,
            reported_comment_count: post.num_comments,
            comments: Vec::new(),
        })
    }

    async fn fetch_comments(
        &self,
        post_id: &str,
        limit: usize,
        out: &mut SourceHarvest,
    ) -> Vec<Comment> {
        let kind = SourceKind::RedditComments;
        let url = endpoint(
            &self.base_url,
            &format!("comments/{post_id}.json"),
            &[
                ("limit", limit.to_string()),
                ("sort", "top".to_string()),
                ("depth", "1".to_string()),
                ("raw_json", "1".to_string()),
            ],
        );
        let Some(url) = url else {
            return Vec::new();
        };
        // Response is [post listing, comment listing].
        let pages: Vec<Listing> = match self.http.fetch_json(SOURCE_FAMILY, &url).await {
            Ok(pages) => pages,
            Err(err) => {
                out.record_failure(kind, post_id, err.diagnostic_status());
                return Vec::new();
            }
        };

        let comments: Vec<Comment> = pages
            .into_iter()
            .nth(1)
            .map(|listing| listing.data.children)
            .unwrap_or_default()
            .into_iter()
            .filter(|thing| thing.kind == "t1")
            .filter_map(|thing| serde_json::from_value::<CommentData>(thing.data).ok())
            .filter(|c| !matches!(c.body.trim(), "" | "[deleted]" | "[removed]"))
            .take(limit)
            .map(|c| Comment {
                body: c.body,
                score: c.score,
                author: c.author,
            })
            .collect();

        out.record(DiagnosticRecord::new(
            kind,
            post_id,
            DiagnosticStatus::from_count(comments.len()),
            comments.len(),
        ));
        comments
    }

    async fn attach_comments(
        &self,
        ctx: &AdapterContext,
        items: &mut [RawItem],
        out: &mut SourceHarvest,
    ) {
        let limit = ctx.limits.per_post_comment_limit.min(MAX_PAGE_SIZE);
        if limit == 0 {
            return;
        }
        // A post surfaced by several queries is fetched once.
        let mut fetched: HashMap<String, Vec<Comment>> = HashMap::new();
        for item in items.iter_mut() {
            if item.reported_comment_count == 0 {
                continue;
            }
            if let Some(cached) = fetched.get(&item.id) {
                item.comments = cached.clone();
                continue;
            }
            let comments = self.fetch_comments(&item.id, limit, out).await;
            fetched.insert(item.id.clone(), comments.clone());
            item.comments = comments;
        }
    }
}

/// Reddit's `t` search window covering the day window.
fn time_filter(days: u32) -> &'static str {
    match days {
        0..=1 => "day",
        2..=7 => "week",
        8..=31 => "month",
        32..=365 => "year",
        _ => "all",
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn source(&self) -> Source {
        Source::Reddit
    }

    async fn harvest(&self, ctx: &AdapterContext) -> SourceHarvest {
        let mut out = SourceHarvest::default();

        let mut items = if self.config.global_search_first {
            let found = self.global_search(ctx, &mut out).await;
            if found.is_empty() {
                self.subreddit_pass(ctx, &mut out).await
            } else {
                found
            }
        } else {
            let found = self.subreddit_pass(ctx, &mut out).await;
            if found.is_empty() {
                self.global_search(ctx, &mut out).await
            } else {
                found
            }
        };

        self.attach_comments(ctx, &mut items, &mut out).await;

        info!(
            run_id = %ctx.run_id,
            attempt = ?ctx.attempt,
            items = items.len(),
            calls = out.diagnostics.len(),
            "reddit harvest finished"
        );
        out.items = items;
        out
    }
}
