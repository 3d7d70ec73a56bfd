//! Core domain model, run configuration, and mode policy for VVW.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const CRATE_NAME: &str = "vvw-core";

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 36_500;
pub const DEFAULT_CATEGORY_KEYWORD: &str = "robot vacuum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Reddit,
    Youtube,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Reddit => "reddit",
            Source::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub score: i64,
    #[serde(default)]
    pub author: String,
}

/// Source-specific free text carried by an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemBody {
    Post {
        #[serde(default)]
        selftext: String,
    },
    Video {
        #[serde(default)]
        description: String,
        #[serde(default)]
        transcript: String,
    },
}

/// One harvested post or video, normalized across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: Source,
    pub id: String,
    pub title: String,
    pub url: String,
    /// Subreddit or channel the item was published in.
    #[serde(default)]
    pub community: String,
    pub body: ItemBody,
    pub created_at: Option<DateTime<Utc>>,
    pub engagement_score: i64,
    /// Comment total as reported by the source, not the number fetched.
    #[serde(default)]
    pub reported_comment_count: u64,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl RawItem {
    /// Title, body fields, then every comment body, in that order.
    pub fn text_fields(&self) -> Vec<&str> {
        let mut out = vec![self.title.as_str()];
        match &self.body {
            ItemBody::Post { selftext } => out.push(selftext),
            ItemBody::Video {
                description,
                transcript,
            } => {
                out.push(description);
                out.push(transcript);
            }
        }
        out.extend(self.comments.iter().map(|c| c.body.as_str()));
        out
    }
}

/// Which adapter call produced a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    RedditSearch,
    RedditListing,
    RedditComments,
    YoutubeSearch,
    YoutubeListing,
    YoutubeSeed,
    YoutubeVideos,
    YoutubeTranscript,
    YoutubeComments,
}

impl SourceKind {
    pub fn source(self) -> Source {
        match self {
            SourceKind::RedditSearch | SourceKind::RedditListing | SourceKind::RedditComments => {
                Source::Reddit
            }
            _ => Source::Youtube,
        }
    }

    /// Search, listing and seed calls discover items; the rest enrich them.
    pub fn counts_as_hit(self) -> bool {
        matches!(
            self,
            SourceKind::RedditSearch
                | SourceKind::RedditListing
                | SourceKind::YoutubeSearch
                | SourceKind::YoutubeListing
                | SourceKind::YoutubeSeed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticStatus {
    Ok,
    NoResults,
    RateLimited,
    Forbidden,
    Http(u16),
    RequestFailed,
}

impl DiagnosticStatus {
    /// `Ok` when the call produced anything, `NoResults` otherwise.
    pub fn from_count(count: usize) -> Self {
        if count > 0 {
            DiagnosticStatus::Ok
        } else {
            DiagnosticStatus::NoResults
        }
    }
}

impl fmt::Display for DiagnosticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticStatus::Ok => f.write_str("ok"),
            DiagnosticStatus::NoResults => f.write_str("no_results"),
            DiagnosticStatus::RateLimited => f.write_str("rate_limited"),
            DiagnosticStatus::Forbidden => f.write_str("forbidden"),
            DiagnosticStatus::Http(code) => write!(f, "http_{code}"),
            DiagnosticStatus::RequestFailed => f.write_str("request_failed"),
        }
    }
}

impl Serialize for DiagnosticStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of exactly one adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub source_kind: SourceKind,
    pub target: String,
    pub status: DiagnosticStatus,
    pub result_count: usize,
}

impl DiagnosticRecord {
    pub fn new(
        source_kind: SourceKind,
        target: impl Into<String>,
        status: DiagnosticStatus,
        result_count: usize,
    ) -> Self {
        Self {
            source_kind,
            target: target.into(),
            status,
            result_count,
        }
    }

    pub fn is_productive(&self) -> bool {
        self.status == DiagnosticStatus::Ok && self.result_count > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub raw_hits_per_source: BTreeMap<Source, usize>,
    pub analyzed_hits_per_source: BTreeMap<Source, usize>,
    /// The sufficiency retry was attempted.
    pub retry_used: bool,
    /// The retry's item set replaced the initial one.
    pub retry_adopted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    WeeklyMonitoring,
    AdHocResearch,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::WeeklyMonitoring => "weekly_monitoring",
            Mode::AdHocResearch => "ad_hoc_research",
        }
    }

    /// Minimum analyzed item count before a harvest is considered sufficient.
    pub fn retry_threshold(self) -> usize {
        match self {
            Mode::WeeklyMonitoring => 8,
            Mode::AdHocResearch => 12,
        }
    }

    pub fn query_cap(self) -> usize {
        match self {
            Mode::WeeklyMonitoring => 10,
            Mode::AdHocResearch => 16,
        }
    }

    /// How many free-text keyword/focus terms are appended to the query list.
    pub fn term_budget(self) -> usize {
        match self {
            Mode::WeeklyMonitoring => 2,
            Mode::AdHocResearch => 6,
        }
    }
}

/// Parses `last_<N>_days` with `1 <= N <= MAX_WINDOW_DAYS`; anything else degrades to
/// seven days.
pub fn parse_day_window(preset: &str) -> u32 {
    preset
        .trim()
        .strip_prefix("last_")
        .and_then(|rest| rest.strip_suffix("_days"))
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| (1..=MAX_WINDOW_DAYS).contains(n))
        .unwrap_or(DEFAULT_WINDOW_DAYS)
}

/// Saturates at the earliest representable instant instead of overflowing.
pub fn window_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::seconds(i64::from(days) * 86_400))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported config format for {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default)]
    pub product_filter: ProductFilter,
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub focus: Vec<String>,
}

fn default_sources() -> Vec<Source> {
    vec![Source::Reddit, Source::Youtube]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            sources: default_sources(),
            date_range: DateRange::default(),
            product_filter: ProductFilter::default(),
            reddit: RedditConfig::default(),
            youtube: YoutubeConfig::default(),
            focus: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn is_enabled(&self, source: Source) -> bool {
        self.sources.contains(&source)
    }

    pub fn window_days(&self) -> u32 {
        parse_day_window(&self.date_range.preset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_preset() -> String {
    "last_7_days".to_string()
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            preset: default_preset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default = "default_filter_mode")]
    pub mode: String,
    #[serde(default)]
    pub selected_brands: Vec<String>,
    #[serde(default)]
    pub selected_models: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_filter_mode() -> String {
    "brands".to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY_KEYWORD.to_string()
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            mode: default_filter_mode(),
            selected_brands: Vec::new(),
            selected_models: Vec::new(),
            category: default_category(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default)]
    pub subreddits: Vec<String>,
    #[serde(default)]
    pub query_keywords: Vec<String>,
    #[serde(default = "default_per_query_limit")]
    pub per_query_limit: usize,
    #[serde(default = "default_per_sub_limit")]
    pub per_sub_limit: usize,
    #[serde(default = "default_per_post_comment_limit")]
    pub per_post_comment_limit: usize,
    #[serde(default = "default_true")]
    pub global_search_first: bool,
    /// Listing sort used when no query keywords are configured: new, hot or top.
    #[serde(default = "default_listing_sort")]
    pub listing_sort: String,
}

fn default_per_query_limit() -> usize {
    10
}
fn default_per_sub_limit() -> usize {
    25
}
fn default_per_post_comment_limit() -> usize {
    20
}
fn default_true() -> bool {
    true
}
fn default_listing_sort() -> String {
    "new".to_string()
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddits: Vec::new(),
            query_keywords: Vec::new(),
            per_query_limit: default_per_query_limit(),
            per_sub_limit: default_per_sub_limit(),
            per_post_comment_limit: default_per_post_comment_limit(),
            global_search_first: true,
            listing_sort: default_listing_sort(),
        }
    }
}

/// A configured video: either a bare id or an object carrying one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VideoSeed {
    Id(String),
    Entry {
        #[serde(alias = "video_id")]
        id: String,
    },
}

impl VideoSeed {
    pub fn id(&self) -> &str {
        match self {
            VideoSeed::Id(id) => id,
            VideoSeed::Entry { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YoutubeInclude {
    Transcript,
    Comments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub videos: Vec<VideoSeed>,
    #[serde(default = "default_include")]
    pub include: Vec<YoutubeInclude>,
    #[serde(default = "default_max_videos_per_channel")]
    pub max_videos_per_channel: usize,
    #[serde(default = "default_max_videos_total")]
    pub max_videos_total: usize,
    #[serde(default = "default_true")]
    pub global_search_first: bool,
}

fn default_include() -> Vec<YoutubeInclude> {
    vec![YoutubeInclude::Transcript, YoutubeInclude::Comments]
}
fn default_max_videos_per_channel() -> usize {
    2
}
fn default_max_videos_total() -> usize {
    5
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            videos: Vec::new(),
            include: default_include(),
            max_videos_per_channel: default_max_videos_per_channel(),
            max_videos_total: default_max_videos_total(),
            global_search_first: true,
        }
    }
}

impl YoutubeConfig {
    pub fn includes(&self, part: YoutubeInclude) -> bool {
        self.include.contains(&part)
    }
}
