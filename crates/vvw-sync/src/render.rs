//! Markdown report rendering by `{{placeholder}}` substitution.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};
use vvw_core::{RunConfig, RuntimeStats};

use crate::analyze::{AnalysisResult, TagCount};

pub const DEFAULT_TEMPLATE: &str = include_str!("../../../templates/weekly_report.template.md");

/// Empty first row of the Top-5 table in older templates; replaced by the feature table.
pub const LEGACY_TOP5_MARKER: &str = "| 1 |  |  |  |  |  |  |  |";

pub const NOT_AVAILABLE: &str = "N/A";

pub fn feature_label_cn(tag: &str) -> &'static str {
    match tag {
        "threshold_climbing" => "越门槛/跨障碍",
        "obstacle_avoidance" => "稳定避障",
        "mop_automation" => "拖布全自动维护",
        "hair_tangle" => "防缠绕",
        "carpet_performance" => "地毯深度清洁",
        _ => "",
    }
}

pub fn scenario_label_cn(tag: &str) -> &'static str {
    match tag {
        "pets" => "宠物毛发",
        "kids_toys" => "儿童玩具散落",
        "multi_floor" => "多楼层",
        "tight_layout" => "复杂家具/狭窄动线",
        _ => "",
    }
}

pub struct ReportContext<'a> {
    pub config: &'a RunConfig,
    pub analysis: &'a AnalysisResult,
    pub stats: &'a RuntimeStats,
    pub generated_at: DateTime<Utc>,
}

/// One pass over the template: substituted values are never rescanned, so harvested text
/// containing `{{...}}` is quoted verbatim.
pub fn render_report(template: &str, ctx: &ReportContext<'_>) -> Result<String> {
    let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}")
        .context("compiling placeholder pattern")?;

    let features_table = features_table(&ctx.analysis.top_features);
    // The marker and the tag table are template-owned text.
    let template = template.replace(LEGACY_TOP5_MARKER, &features_table);
    let values: HashMap<&str, String> = placeholders(ctx, features_table).into_iter().collect();
    let rendered = placeholder.replace_all(&template, |caps: &Captures<'_>| {
        values
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    });
    Ok(rendered.into_owned())
}

fn placeholders(ctx: &ReportContext<'_>, features_table: String) -> Vec<(&'static str, String)> {
    let config = ctx.config;
    let analysis = ctx.analysis;
    let filter = &config.product_filter;
    let sources = config
        .sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let (cn_1, en_1) = demand_takeaways(analysis.top_features.first());
    let (cn_2, en_2) = scenario_takeaways(analysis.top_scenarios.first());
    let (cn_3, en_3) = coverage_takeaways(analysis, &sources);

    vec![
        ("time_window", config.date_range.preset.clone()),
        ("sources", or_na(sources)),
        ("filter_mode", or_na(filter.mode.clone())),
        ("selected_brands", or_na(filter.selected_brands.join(", "))),
        ("selected_models", or_na(filter.selected_models.join(", "))),
        ("cn_takeaway_1", cn_1),
        ("cn_takeaway_2", cn_2),
        ("cn_takeaway_3", cn_3),
        ("en_takeaway_1", en_1),
        ("en_takeaway_2", en_2),
        ("en_takeaway_3", en_3),
        ("top_features_table", features_table),
        (
            "top_scenarios_table",
            scenarios_table(&analysis.top_scenarios),
        ),
        ("top_items", top_items(analysis)),
        ("total_items", analysis.total_items.to_string()),
        ("total_comments", analysis.total_comments.to_string()),
        ("retry_used", retry_label(ctx.stats)),
        ("missing_notes", missing_notes(ctx)),
    ]
}

fn or_na(value: String) -> String {
    if value.trim().is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        value
    }
}

fn demand_takeaways(top: Option<&TagCount>) -> (String, String) {
    match top {
        Some(t) => (
            format!(
                "本周需求Top为：{}（提及 {} 次）。",
                feature_label_cn(&t.tag),
                t.count
            ),
            format!("Top demand: {} ({} mentions).", t.tag, t.count),
        ),
        None => (
            "本周需求Top尚不足以统计。".to_string(),
            "Not enough data for top demand.".to_string(),
        ),
    }
}

fn scenario_takeaways(top: Option<&TagCount>) -> (String, String) {
    match top {
        Some(t) => (
            format!(
                "最常见使用场景：{}（提及 {} 次）。",
                scenario_label_cn(&t.tag),
                t.count
            ),
            format!("Most discussed scenario: {} ({} mentions).", t.tag, t.count),
        ),
        None => (
            "本周使用场景信号不足。".to_string(),
            "Not enough data for usage scenarios.".to_string(),
        ),
    }
}

fn coverage_takeaways(analysis: &AnalysisResult, sources: &str) -> (String, String) {
    (
        format!(
            "本周共分析 {} 条内容、{} 条评论（来源：{}）。",
            analysis.total_items, analysis.total_comments, sources
        ),
        format!(
            "Coverage: {} items and {} comments from {}.",
            analysis.total_items, analysis.total_comments, sources
        ),
    )
}

fn features_table(top: &[TagCount]) -> String {
    if top.is_empty() {
        return LEGACY_TOP5_MARKER.to_string();
    }
    top.iter()
        .enumerate()
        .map(|(idx, t)| {
            format!(
                "| {} | {} | {} | {} | → |  |  |  |",
                idx + 1,
                t.tag,
                feature_label_cn(&t.tag),
                t.count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn scenarios_table(top: &[TagCount]) -> String {
    if top.is_empty() {
        return "| 1 |  |  |  |".to_string();
    }
    top.iter()
        .enumerate()
        .map(|(idx, t)| {
            format!(
                "| {} | {} | {} | {} |",
                idx + 1,
                t.tag,
                scenario_label_cn(&t.tag),
                t.count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn top_items(analysis: &AnalysisResult) -> String {
    if analysis.top_items.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    analysis
        .top_items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let title = if item.title.trim().is_empty() {
                item.id.as_str()
            } else {
                item.title.trim()
            };
            let link = if item.url.is_empty() {
                title.to_string()
            } else {
                format!("[{title}]({})", item.url)
            };
            format!(
                "{}. {link} ({}, score {}, {} comments)",
                idx + 1,
                item.source,
                item.score,
                item.comments
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn retry_label(stats: &RuntimeStats) -> String {
    match (stats.retry_used, stats.retry_adopted) {
        (false, _) => "no".to_string(),
        (true, true) => "yes (deepened harvest adopted)".to_string(),
        (true, false) => "yes (initial harvest kept)".to_string(),
    }
}

fn missing_notes(ctx: &ReportContext<'_>) -> String {
    let mut notes: Vec<String> = ctx
        .stats
        .analyzed_hits_per_source
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(source, _)| format!("- {source}: no items within the time window"))
        .collect();
    notes.push(format!(
        "- Generated at {}",
        ctx.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    notes.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use vvw_core::{ItemBody, RawItem, Source};

    use crate::analyze::CorpusAnalyzer;

    fn config() -> RunConfig {
        let mut config = RunConfig::default();
        config.product_filter.selected_brands = vec!["Roborock".into(), "Dreame".into()];
        config
    }

    fn reddit(id: &str, text: &str) -> RawItem {
        RawItem {
            source: Source::Reddit,
            id: id.to_string(),
            title: format!("Thread {id}"),
            url: format!("https://www.reddit.com/r/RobotVacuums/comments/{id}/"),
            community: "RobotVacuums".into(),
            body: ItemBody::Post {
                selftext: text.to_string(),
            },
            created_at: None,
            engagement_score: 3,
            reported_comment_count: 0,
            comments: vec![],
        }
    }

    fn stats(reddit: usize, youtube: usize) -> RuntimeStats {
        let hits: BTreeMap<Source, usize> =
            [(Source::Reddit, reddit), (Source::Youtube, youtube)].into();
        RuntimeStats {
            raw_hits_per_source: hits.clone(),
            analyzed_hits_per_source: hits,
            retry_used: true,
            retry_adopted: false,
        }
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 30, 0).single().unwrap()
    }

    #[test]
    fn default_template_renders_without_leftover_placeholders() {
        let analysis = CorpusAnalyzer::new().unwrap().analyze(&[
            reddit("a", "my dog's hair keeps tangling the brush"),
            reddit("b", "hair everywhere"),
        ]);
        let cfg = config();
        let stats = stats(2, 0);
        let ctx = ReportContext {
            config: &cfg,
            analysis: &analysis,
            stats: &stats,
            generated_at: generated_at(),
        };
        let report = render_report(DEFAULT_TEMPLATE, &ctx).unwrap();

        assert!(!report.contains("{{"));
        assert!(!report.contains(LEGACY_TOP5_MARKER));
        assert!(report.contains("| 1 | hair_tangle | 防缠绕 | 2 | → |  |  |  |"));
        assert!(report.contains("本周需求Top为：防缠绕（提及 2 次）。"));
        assert!(report.contains("Top demand: hair_tangle (2 mentions)."));
        assert!(report.contains("| 1 | pets | 宠物毛发 | 1 |"));
        assert!(report.contains("Roborock, Dreame"));
        assert!(report.contains("- youtube: no items within the time window"));
        assert!(report.contains("Generated at 2026-03-10T08:30:00Z"));
        assert!(report.contains("yes (initial harvest kept)"));
    }

    #[test]
    fn empty_analysis_renders_sparse_report() {
        let analysis = CorpusAnalyzer::new().unwrap().analyze(&[]);
        let cfg = RunConfig::default();
        let stats = stats(0, 0);
        let ctx = ReportContext {
            config: &cfg,
            analysis: &analysis,
            stats: &stats,
            generated_at: generated_at(),
        };
        let report = render_report(DEFAULT_TEMPLATE, &ctx).unwrap();
        assert!(report.contains("本周需求Top尚不足以统计。"));
        assert!(report.contains("Not enough data for top demand."));
        assert!(report.contains(LEGACY_TOP5_MARKER));
        assert!(report.contains("关注品牌 / Brands: N/A"));
        assert!(!report.contains("{{"));
    }

    #[test]
    fn unknown_placeholders_fall_back_to_na() {
        let analysis = CorpusAnalyzer::new().unwrap().analyze(&[]);
        let cfg = config();
        let stats = RuntimeStats::default();
        let ctx = ReportContext {
            config: &cfg,
            analysis: &analysis,
            stats: &stats,
            generated_at: generated_at(),
        };
        let rendered = render_report(
            "window={{time_window}} signals={{competitive_signals}} x={{ spaced_key }} retry={{retry_used}}",
            &ctx,
        )
        .unwrap();
        assert_eq!(
            rendered,
            "window=last_7_days signals=N/A x=N/A retry=no"
        );
    }

    #[test]
    fn braced_text_in_harvested_titles_is_quoted_verbatim() {
        let mut braced = reddit("zz", "");
        braced.title = "Template {{total_items}} and {{foo}}".into();
        braced.url = String::new();
        braced.engagement_score = 0;
        let analysis = CorpusAnalyzer::new().unwrap().analyze(&[braced]);
        let cfg = config();
        let stats = stats(1, 0);
        let ctx = ReportContext {
            config: &cfg,
            analysis: &analysis,
            stats: &stats,
            generated_at: generated_at(),
        };
        let rendered = render_report("{{top_items}} / {{total_items}}", &ctx).unwrap();
        assert_eq!(
            rendered,
            "1. Template {{total_items}} and {{foo}} (reddit, score 0, 0 comments) / 1"
        );
    }

    #[test]
    fn top_items_link_titles_and_show_scores() {
        let analysis = CorpusAnalyzer::new()
            .unwrap()
            .analyze(&[reddit("abc", "mop is great")]);
        let cfg = config();
        let stats = stats(1, 0);
        let ctx = ReportContext {
            config: &cfg,
            analysis: &analysis,
            stats: &stats,
            generated_at: generated_at(),
        };
        let rendered = render_report("{{top_items}}", &ctx).unwrap();
        assert_eq!(
            rendered,
            "1. [Thread abc](https://www.reddit.com/r/RobotVacuums/comments/abc/) (reddit, score 3, 0 comments)"
        );
    }
}
