//! Run pipeline: queries → harvest (with sufficiency retry) → analysis → report + artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::info;
use uuid::Uuid;
use vvw_adapters::{adapters_for_config, HarvestLimits, SourceAdapter};
use vvw_core::{DiagnosticRecord, Mode, RawItem, RunConfig, RuntimeStats, Source};
use vvw_storage::{HttpClientConfig, HttpFetcher, OutputStore, StoredArtifact};

pub mod analyze;
pub mod orchestrator;
pub mod query;
pub mod render;

pub use analyze::{AnalysisError, AnalysisResult, CorpusAnalyzer};
pub use orchestrator::{HarvestOrchestrator, HarvestOutcome, HarvestRequest};
pub use query::build_queries;
pub use render::{render_report, ReportContext, DEFAULT_TEMPLATE};

pub const CRATE_NAME: &str = "vvw-sync";

pub const REPORT_FILE: &str = "weekly_report.md";
pub const METRICS_FILE: &str = "metrics.json";
pub const CORPUS_FILE: &str = "corpus.json";

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub youtube_api_key: Option<String>,
    pub reddit_delay_ms: u64,
    pub youtube_delay_ms: u64,
}

impl SyncSettings {
    pub fn from_env() -> Self {
        Self {
            output_dir: std::env::var("VVW_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./outputs")),
            user_agent: std::env::var("VVW_USER_AGENT")
                .unwrap_or_else(|_| "vacuum-voice-weekly/0.1".to_string()),
            http_timeout_secs: env_u64("VVW_HTTP_TIMEOUT_SECS", 20),
            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            reddit_delay_ms: env_u64("VVW_REDDIT_DELAY_MS", 1200),
            youtube_delay_ms: env_u64("VVW_YOUTUBE_DELAY_MS", 500),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
        .with_source_delay(
            vvw_adapters::reddit::SOURCE_FAMILY,
            Duration::from_millis(self.reddit_delay_ms),
        )
        .with_source_delay(
            vvw_adapters::youtube::SOURCE_FAMILY,
            Duration::from_millis(self.youtube_delay_ms),
        )
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeWindow {
    pub preset: String,
    pub days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coverage {
    pub reddit_posts_count: usize,
    pub youtube_videos_count: usize,
    pub brands_count: usize,
    pub models_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub items: usize,
    pub comments: usize,
}

/// Written once per run as `metrics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: Mode,
    pub config_path: String,
    pub time_window: TimeWindow,
    pub sources: Vec<Source>,
    pub search_queries: Vec<String>,
    pub limits: HarvestLimits,
    pub diagnostics: Vec<DiagnosticRecord>,
    pub coverage: Coverage,
    pub runtime: RuntimeStats,
    pub retry_used: bool,
    pub superseded_items: Option<usize>,
    pub totals: Totals,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: Mode,
    pub items: usize,
    pub comments: usize,
    pub retry_used: bool,
    pub run_dir: String,
    pub artifacts: Vec<StoredArtifact>,
}

pub struct RunPipeline {
    config: RunConfig,
    config_path: PathBuf,
    template: String,
    store: OutputStore,
    orchestrator: HarvestOrchestrator,
    analyzer: CorpusAnalyzer,
}

impl RunPipeline {
    pub fn new(
        config: RunConfig,
        config_path: impl Into<PathBuf>,
        settings: &SyncSettings,
        template: Option<String>,
    ) -> Result<Self> {
        let http = Arc::new(
            HttpFetcher::new(settings.http_client_config()).context("building http client")?,
        );
        let adapters = adapters_for_config(&config, http, settings.youtube_api_key.clone());
        let orchestrator = HarvestOrchestrator::new(config.mode, adapters);
        Ok(Self {
            config,
            config_path: config_path.into(),
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            store: OutputStore::new(settings.output_dir.clone()),
            orchestrator,
            analyzer: CorpusAnalyzer::new().context("compiling tag lexicons")?,
        })
    }

    /// Replaces the configured network adapters.
    pub fn with_adapters(mut self, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        self.orchestrator = HarvestOrchestrator::new(self.config.mode, adapters);
        self
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let days = self.config.window_days();
        let queries = build_queries(&self.config);
        let limits = HarvestLimits::from_config(&self.config);
        info!(
            %run_id,
            mode = self.config.mode.as_str(),
            days,
            queries = queries.len(),
            sources = ?self.orchestrator.sources(),
            "starting run"
        );

        let request = HarvestRequest {
            run_id,
            now: started_at,
            days,
            queries: queries.clone(),
            limits,
        };
        let outcome = self.orchestrator.run(&request).await;
        let items = &outcome.adopted.items;
        let analysis = self.analyzer.analyze(items);
        let finished_at = Utc::now();

        let report = render_report(
            &self.template,
            &ReportContext {
                config: &self.config,
                analysis: &analysis,
                stats: &outcome.stats,
                generated_at: finished_at,
            },
        )
        .context("rendering weekly report")?;

        let metrics = RunMetrics {
            run_id,
            started_at,
            finished_at,
            mode: self.config.mode,
            config_path: self.config_path.display().to_string(),
            time_window: TimeWindow {
                preset: self.config.date_range.preset.clone(),
                days,
            },
            sources: self.config.sources.clone(),
            search_queries: queries,
            limits: outcome.adopted.limits,
            diagnostics: outcome.adopted.diagnostics.clone(),
            coverage: Coverage {
                reddit_posts_count: count_source(items, Source::Reddit),
                youtube_videos_count: count_source(items, Source::Youtube),
                brands_count: self.config.product_filter.selected_brands.len(),
                models_count: self.config.product_filter.selected_models.len(),
            },
            runtime: outcome.stats.clone(),
            retry_used: outcome.stats.retry_used,
            superseded_items: outcome.superseded_items,
            totals: Totals {
                items: analysis.total_items,
                comments: analysis.total_comments,
            },
        };

        let run_label = run_id.to_string();
        let metrics_json =
            serde_json::to_vec_pretty(&metrics).context("serializing run metrics")?;
        let corpus_json = serde_json::to_vec_pretty(items).context("serializing corpus")?;
        let mut artifacts = Vec::with_capacity(3);
        for (name, bytes) in [
            (REPORT_FILE, report.as_bytes()),
            (METRICS_FILE, metrics_json.as_slice()),
            (CORPUS_FILE, corpus_json.as_slice()),
        ] {
            let stored = self
                .store
                .write_artifact(&run_label, name, bytes)
                .await
                .with_context(|| format!("writing {name}"))?;
            info!(artifact = name, sha256 = %stored.sha256, bytes = stored.byte_size, "wrote artifact");
            artifacts.push(stored);
        }

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            mode: self.config.mode,
            items: analysis.total_items,
            comments: analysis.total_comments,
            retry_used: outcome.stats.retry_used,
            run_dir: self.store.root().join(&run_label).display().to_string(),
            artifacts,
        })
    }
}

fn count_source(items: &[RawItem], source: Source) -> usize {
    items.iter().filter(|i| i.source == source).count()
}

/// Loads config and optional template from disk, then runs once with env settings.
pub async fn run_from_paths(
    config_path: &Path,
    template_path: Option<&Path>,
    output_dir: Option<PathBuf>,
) -> Result<RunSummary> {
    let config = RunConfig::from_path(config_path)
        .with_context(|| format!("loading run config {}", config_path.display()))?;
    let mut settings = SyncSettings::from_env();
    if let Some(dir) = output_dir {
        settings.output_dir = dir;
    }
    let template = match template_path {
        Some(path) => Some(
            fs::read_to_string(path)
                .await
                .with_context(|| format!("reading template {}", path.display()))?,
        ),
        None => None,
    };
    RunPipeline::new(config, config_path, &settings, template)?
        .run_once()
        .await
}

pub async fn load_corpus(path: &Path) -> Result<Vec<RawItem>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading corpus {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing corpus {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vvw_adapters::{AdapterContext, SourceHarvest};
    use vvw_core::{Comment, DiagnosticStatus, ItemBody, SourceKind};

    struct FixedReddit {
        items: Vec<RawItem>,
    }

    #[async_trait]
    impl SourceAdapter for FixedReddit {
        fn source(&self) -> Source {
            Source::Reddit
        }

        async fn harvest(&self, ctx: &AdapterContext) -> SourceHarvest {
            let mut harvest = SourceHarvest::default();
            harvest.record(DiagnosticRecord::new(
                SourceKind::RedditSearch,
                ctx.queries.first().cloned().unwrap_or_default(),
                DiagnosticStatus::from_count(self.items.len()),
                self.items.len(),
            ));
            harvest.items = self.items.clone();
            harvest
        }
    }

    fn post(i: usize) -> RawItem {
        let text = if i % 2 == 0 {
            "my dog's hair keeps tangling the brush"
        } else {
            "great at climbing over the door threshold"
        };
        RawItem {
            source: Source::Reddit,
            id: format!("t3_{i}"),
            title: format!("Post {i}"),
            url: format!("https://www.reddit.com/comments/{i}/"),
            community: "RobotVacuums".into(),
            body: ItemBody::Post {
                selftext: text.to_string(),
            },
            created_at: None,
            engagement_score: i as i64,
            reported_comment_count: 1,
            comments: vec![Comment {
                body: "same here".into(),
                score: 1,
                author: "someone".into(),
            }],
        }
    }

    fn settings(dir: &Path) -> SyncSettings {
        SyncSettings {
            output_dir: dir.to_path_buf(),
            user_agent: "vvw-test/0.1".into(),
            http_timeout_secs: 5,
            youtube_api_key: None,
            reddit_delay_ms: 0,
            youtube_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn run_once_writes_report_metrics_and_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::default();
        config.sources = vec![Source::Reddit];
        config.product_filter.selected_brands = vec!["Roborock".into()];

        let pipeline = RunPipeline::new(config, "config/input.json", &settings(dir.path()), None)
            .unwrap()
            .with_adapters(vec![Box::new(FixedReddit {
                items: (0..9).map(post).collect(),
            })]);
        let summary = pipeline.run_once().await.unwrap();

        assert_eq!(summary.items, 9);
        assert_eq!(summary.comments, 9);
        assert!(!summary.retry_used);
        let names: Vec<&str> = summary.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![REPORT_FILE, METRICS_FILE, CORPUS_FILE]);

        let run_dir = dir.path().join(summary.run_id.to_string());
        let report = std::fs::read_to_string(run_dir.join(REPORT_FILE)).unwrap();
        assert!(report.contains("| 1 | hair_tangle | 防缠绕 | 5 | → |  |  |  |"));
        assert!(!report.contains("{{"));

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join(METRICS_FILE)).unwrap())
                .unwrap();
        assert_eq!(metrics["mode"], "weekly_monitoring");
        assert_eq!(metrics["config_path"], "config/input.json");
        assert_eq!(metrics["time_window"]["days"], 7);
        assert_eq!(metrics["search_queries"][0], "\"Roborock\"");
        assert_eq!(metrics["diagnostics"][0]["status"], "ok");
        assert_eq!(metrics["coverage"]["reddit_posts_count"], 9);
        assert_eq!(metrics["coverage"]["brands_count"], 1);
        assert_eq!(metrics["runtime"]["raw_hits_per_source"]["reddit"], 9);
        assert_eq!(metrics["retry_used"], false);

        let corpus = load_corpus(&run_dir.join(CORPUS_FILE)).await.unwrap();
        assert_eq!(corpus.len(), 9);
        assert_eq!(corpus[0].id, "t3_0");
    }

    #[tokio::test]
    async fn empty_harvest_still_produces_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RunPipeline::new(
            RunConfig::default(),
            "input.yaml",
            &settings(dir.path()),
            Some("items={{total_items}} retry={{retry_used}} x={{unknown}}".into()),
        )
        .unwrap()
        .with_adapters(vec![Box::new(FixedReddit { items: vec![] })]);
        let summary = pipeline.run_once().await.unwrap();

        assert_eq!(summary.items, 0);
        assert!(summary.retry_used);
        let report = std::fs::read_to_string(
            dir.path()
                .join(summary.run_id.to_string())
                .join(REPORT_FILE),
        )
        .unwrap();
        assert_eq!(report, "items=0 retry=yes (initial harvest kept) x=N/A");
    }

    #[test]
    fn http_settings_carry_per_source_delays() {
        let settings = settings(Path::new("/tmp"));
        let http = settings.http_client_config();
        assert_eq!(http.user_agent.as_deref(), Some("vvw-test/0.1"));
        assert_eq!(http.timeout, Duration::from_secs(5));
        assert_eq!(
            http.delay_for(vvw_adapters::reddit::SOURCE_FAMILY),
            Duration::ZERO
        );
    }
}
