//! YouTube adapter: seed discovery (search, configured ids, channels), hydration,
//! transcripts and top-level comments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{info, warn};
use vvw_core::{
    Comment, DiagnosticRecord, DiagnosticStatus, ItemBody, RawItem, Source, SourceKind,
    YoutubeConfig, YoutubeInclude,
};
use vvw_storage::HttpFetcher;

use crate::{endpoint, non_empty, AdapterContext, SourceAdapter, SourceHarvest};

pub const SOURCE_FAMILY: &str = "youtube";
pub const DEFAULT_DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_TIMEDTEXT_URL: &str = "https://video.google.com";

/// Data API page size ceiling for search/videos calls.
const MAX_PAGE_SIZE: usize = 50;
const MAX_COMMENT_PAGE: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchId {
    video_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Snippet {
    title: String,
    description: String,
    channel_title: String,
    published_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideosResponse {
    items: Vec<VideoResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct VideoResource {
    id: String,
    snippet: Snippet,
    statistics: Statistics,
}

/// The Data API reports counters as decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Statistics {
    like_count: Option<String>,
    comment_count: Option<String>,
}

impl Statistics {
    fn likes(&self) -> i64 {
        self.like_count
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn comments(&self) -> u64 {
        self.comment_count
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentThreadsResponse {
    items: Vec<CommentThread>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentThread {
    snippet: ThreadSnippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CommentSnippet {
    text_display: String,
    author_display_name: String,
    like_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedOrigin {
    Search,
    Configured,
    Channel,
}

impl SeedOrigin {
    fn hydrate_kind(self) -> SourceKind {
        match self {
            SeedOrigin::Configured => SourceKind::YoutubeSeed,
            SeedOrigin::Search | SeedOrigin::Channel => SourceKind::YoutubeVideos,
        }
    }

    fn hydrate_target(self) -> &'static str {
        match self {
            SeedOrigin::Configured => "configured_videos",
            SeedOrigin::Search | SeedOrigin::Channel => "discovered_videos",
        }
    }
}

pub struct YoutubeAdapter {
    http: Arc<HttpFetcher>,
    config: YoutubeConfig,
    api_key: Option<String>,
    data_api_url: String,
    timedtext_url: String,
}

impl YoutubeAdapter {
    pub fn new(http: Arc<HttpFetcher>, config: YoutubeConfig, api_key: Option<String>) -> Self {
        Self {
            http,
            config,
            api_key: api_key.and_then(|k| non_empty(&k)),
            data_api_url: DEFAULT_DATA_API_URL.to_string(),
            timedtext_url: DEFAULT_TIMEDTEXT_URL.to_string(),
        }
    }

    pub fn with_base_urls(
        mut self,
        data_api_url: impl Into<String>,
        timedtext_url: impl Into<String>,
    ) -> Self {
        self.data_api_url = data_api_url.into();
        self.timedtext_url = timedtext_url.into();
        self
    }

    async fn collect_seeds(
        &self,
        ctx: &AdapterContext,
        key: &str,
        out: &mut SourceHarvest,
    ) -> (Vec<String>, SeedOrigin) {
        let order = if self.config.global_search_first {
            [SeedOrigin::Search, SeedOrigin::Configured, SeedOrigin::Channel]
        } else {
            [SeedOrigin::Configured, SeedOrigin::Channel, SeedOrigin::Search]
        };
        for origin in order {
            let ids = match origin {
                SeedOrigin::Search => self.search_global(ctx, key, out).await,
                SeedOrigin::Configured => self
                    .config
                    .videos
                    .iter()
                    .filter_map(|v| non_empty(v.id()))
                    .collect(),
                SeedOrigin::Channel => self.discover_channels(ctx, key, out).await,
            };
            if !ids.is_empty() {
                return (ids, origin);
            }
        }
        (Vec::new(), SeedOrigin::Channel)
    }

    async fn search(
        &self,
        ctx: &AdapterContext,
        key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchItem>, Option<DiagnosticStatus>> {
        let url = endpoint(
            &self.data_api_url,
            "search",
            &[
                ("part", "snippet".to_string()),
                ("type", "video".to_string()),
                ("order", "date".to_string()),
                ("q", query.to_string()),
                ("maxResults", max_results.min(MAX_PAGE_SIZE).to_string()),
                (
                    "publishedAfter",
                    ctx.cutoff().to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("key", key.to_string()),
            ],
        )
        // `None`: the url could not be built, so no call was made.
        .ok_or(None::<DiagnosticStatus>)?;
        let resp: SearchResponse = self
            .http
            .fetch_json(SOURCE_FAMILY, &url)
            .await
            .map_err(|e| Some(e.diagnostic_status()))?;
        Ok(resp
            .items
            .into_iter()
            .filter(|item| !item.id.video_id.trim().is_empty())
            .collect())
    }

    async fn search_global(
        &self,
        ctx: &AdapterContext,
        key: &str,
        out: &mut SourceHarvest,
    ) -> Vec<String> {
        let total = ctx.limits.max_videos_total;
        let mut ids = Vec::new();
        if total == 0 {
            return ids;
        }
        for query in ctx.queries.iter().filter_map(|q| non_empty(q)) {
            if ids.len() >= total {
                break;
            }
            let found = match self.search(ctx, key, &query, total).await {
                Ok(found) => found,
                Err(Some(status)) => {
                    out.record_failure(SourceKind::YoutubeSearch, &query, status);
                    continue;
                }
                Err(None) => continue,
            };
            let mut seen = HashSet::new();
            let found: Vec<String> = found
                .into_iter()
                .map(|item| item.id.video_id)
                .filter(|id| seen.insert(id.clone()))
                .collect();
            out.record(DiagnosticRecord::new(
                SourceKind::YoutubeSearch,
                &query,
                DiagnosticStatus::from_count(found.len()),
                found.len(),
            ));
            let room = total - ids.len();
            ids.extend(found.into_iter().take(room));
        }
        ids
    }

    async fn discover_channels(
        &self,
        ctx: &AdapterContext,
        key: &str,
        out: &mut SourceHarvest,
    ) -> Vec<String> {
        let per_channel = ctx.limits.max_videos_per_channel;
        let mut ids = Vec::new();
        if per_channel == 0 {
            return ids;
        }
        for channel in self.config.channels.iter().filter_map(|c| non_empty(c)) {
            let entries = match self.search(ctx, key, &channel, per_channel * 2).await {
                Ok(entries) => entries,
                Err(Some(status)) => {
                    out.record_failure(SourceKind::YoutubeListing, &channel, status);
                    continue;
                }
                Err(None) => continue,
            };
            let picked = pick_channel_entries(&channel, &entries, per_channel);
            out.record(DiagnosticRecord::new(
                SourceKind::YoutubeListing,
                &channel,
                DiagnosticStatus::from_count(picked.len()),
                picked.len(),
            ));
            ids.extend(picked);
        }
        ids
    }

    /// Fetches snippet + statistics for the seeds, returned in seed order.
    async fn hydrate(
        &self,
        ids: &[String],
        origin: SeedOrigin,
        key: &str,
        out: &mut SourceHarvest,
    ) -> Vec<VideoResource> {
        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if seen.insert(id.as_str()) {
                unique.push(id.clone());
            }
        }

        let kind = origin.hydrate_kind();
        let target = origin.hydrate_target();
        let mut by_id: HashMap<String, VideoResource> = HashMap::new();
        for chunk in unique.chunks(MAX_PAGE_SIZE) {
            let url = endpoint(
                &self.data_api_url,
                "videos",
                &[
                    ("part", "snippet,statistics".to_string()),
                    ("id", chunk.join(",")),
                    ("key", key.to_string()),
                ],
            );
            let Some(url) = url else {
                continue;
            };
            match self.http.fetch_json::<VideosResponse>(SOURCE_FAMILY, &url).await {
                Ok(resp) => {
                    let count = resp.items.len();
                    out.record(DiagnosticRecord::new(
                        kind,
                        target,
                        DiagnosticStatus::from_count(count),
                        count,
                    ));
                    for video in resp.items {
                        by_id.insert(video.id.clone(), video);
                    }
                }
                Err(err) => out.record_failure(kind, target, err.diagnostic_status()),
            }
        }

        ids.iter().filter_map(|id| by_id.get(id).cloned()).collect()
    }

    async fn fetch_transcript(&self, video_id: &str, out: &mut SourceHarvest) -> String {
        let kind = SourceKind::YoutubeTranscript;
        let url = endpoint(
            &self.timedtext_url,
            "timedtext",
            &[("lang", "en".to_string()), ("v", video_id.to_string())],
        );
        let Some(url) = url else {
            return String::new();
        };
        match self.http.fetch_bytes(SOURCE_FAMILY, &url).await {
            Ok(resp) => {
                let segments = parse_timedtext(&String::from_utf8_lossy(&resp.body));
                out.record(DiagnosticRecord::new(
                    kind,
                    video_id,
                    DiagnosticStatus::from_count(segments.len()),
                    segments.len(),
                ));
                segments.join(" ")
            }
            Err(err) => {
                out.record_failure(kind, video_id, err.diagnostic_status());
                String::new()
            }
        }
    }

    async fn fetch_comments(
        &self,
        video_id: &str,
        limit: usize,
        key: &str,
        out: &mut SourceHarvest,
    ) -> Vec<Comment> {
        let kind = SourceKind::YoutubeComments;
        let url = endpoint(
            &self.data_api_url,
            "commentThreads",
            &[
                ("part", "snippet".to_string()),
                ("videoId", video_id.to_string()),
                ("maxResults", limit.min(MAX_COMMENT_PAGE).to_string()),
                ("order", "relevance".to_string()),
                ("textFormat", "plainText".to_string()),
                ("key", key.to_string()),
            ],
        );
        let Some(url) = url else {
            return Vec::new();
        };
        let resp: CommentThreadsResponse = match self.http.fetch_json(SOURCE_FAMILY, &url).await {
            Ok(resp) => resp,
            Err(err) => {
                out.record_failure(kind, video_id, err.diagnostic_status());
                return Vec::new();
            }
        };
        let comments: Vec<Comment> = resp
            .items
            .into_iter()
            .map(|thread| thread.snippet.top_level_comment.snippet)
            .filter_map(|s| {
                non_empty(&s.text_display).map(|body| Comment {
                    body,
                    score: s.like_count,
                    author: s.author_display_name,
                })
            })
            .take(limit)
            .collect();
        out.record(DiagnosticRecord::new(
            kind,
            video_id,
            DiagnosticStatus::from_count(comments.len()),
            comments.len(),
        ));
        comments
    }
}

/// Prefers entries whose channel or title mentions the channel name; falls back to the
/// first results when none do.
fn pick_channel_entries(channel: &str, entries: &[SearchItem], limit: usize) -> Vec<String> {
    let needle = channel.to_lowercase();
    let matches: Vec<String> = entries
        .iter()
        .filter(|e| {
            e.snippet.channel_title.to_lowercase().contains(&needle)
                || e.snippet.title.to_lowercase().contains(&needle)
        })
        .take(limit)
        .map(|e| e.id.video_id.clone())
        .collect();
    if !matches.is_empty() {
        return matches;
    }
    entries
        .iter()
        .take(limit)
        .map(|e| e.id.video_id.clone())
        .collect()
}

/// Caption segments from a timedtext XML document. Segment bodies are escaped twice
/// (`&amp;#39;`), so each one is decoded again after the document parse.
fn parse_timedtext(xml: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("text") else {
        return Vec::new();
    };
    Html::parse_fragment(xml)
        .select(&selector)
        .filter_map(|node| non_empty(&decode_segment(&node.text().collect::<String>())))
        .collect()
}

/// Second entity pass; inline markup such as `<font>` is dropped, its text kept.
fn decode_segment(segment: &str) -> String {
    Html::parse_fragment(segment)
        .root_element()
        .text()
        .collect()
}

fn parse_published_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl SourceAdapter for YoutubeAdapter {
    fn source(&self) -> Source {
        Source::Youtube
    }

    async fn harvest(&self, ctx: &AdapterContext) -> SourceHarvest {
        let mut out = SourceHarvest::default();
        let Some(key) = self.api_key.as_deref() else {
            warn!(run_id = %ctx.run_id, "YOUTUBE_API_KEY not set; skipping youtube harvest");
            return out;
        };

        let (seeds, origin) = self.collect_seeds(ctx, key, &mut out).await;
        let videos = if seeds.is_empty() {
            Vec::new()
        } else {
            self.hydrate(&seeds, origin, key, &mut out).await
        };

        let comment_limit = ctx.limits.per_post_comment_limit;
        let mut items = Vec::new();
        for video in videos {
            let created_at = parse_published_at(&video.snippet.published_at);
            if !ctx.is_within_window(created_at) {
                continue;
            }
            let transcript = if self.config.includes(YoutubeInclude::Transcript) {
                self.fetch_transcript(&video.id, &mut out).await
            } else {
                String::new()
            };
            let reported = video.statistics.comments();
            let comments = if self.config.includes(YoutubeInclude::Comments)
                && reported > 0
                && comment_limit > 0
            {
                self.fetch_comments(&video.id, comment_limit, key, &mut out)
                    .await
            } else {
                Vec::new()
            };
            items.push(RawItem {
                source: Source::Youtube,
                url: format!("https://www.youtube.com/watch?v={}", video.id),
                id: video.id,
                title: video.snippet.title,
                community: video.snippet.channel_title,
                body: ItemBody::Video {
                    description: video.snippet.description,
                    transcript,
                },
                created_at,
                engagement_score: video.statistics.likes(),
                reported_comment_count: reported,
                comments,
            });
        }

        info!(
            run_id = %ctx.run_id,
            attempt = ?ctx.attempt,
            items = items.len(),
            calls = out.diagnostics.len(),
            "youtube harvest finished"
        );
        out.items = items;
        out
    }
}
