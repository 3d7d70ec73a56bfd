//! Lexicon tagging, per-tag/per-source tallies and engagement ranking over a corpus.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vvw_core::{RawItem, Source};

pub const TOP_TAGS: usize = 5;
pub const TOP_ITEMS: usize = 8;

/// Ordered tag → ordered pattern list. Order decides both match short-circuiting and
/// tie-breaks in the top-tag ranking.
pub type Lexicon = &'static [(&'static str, &'static [&'static str])];

pub const FEATURE_LEXICON: Lexicon = &[
    ("threshold_climbing", &[r"threshold", r"door sill", r"climb(ing)? over"]),
    (
        "obstacle_avoidance",
        &[r"obstacle", r"avoid(ance)?", r"cable", r"cord", r"poop", r"toy"],
    ),
    (
        "mop_automation",
        &[r"mop", r"wash", r"dry", r"self[- ]clean", r"auto[- ]lift"],
    ),
    ("hair_tangle", &[r"tangle", r"hair", r"anti[- ]tangle", r"brush"]),
    (
        "carpet_performance",
        &[r"carpet", r"high[- ]pile", r"rug", r"deep clean"],
    ),
];

pub const SCENARIO_LEXICON: Lexicon = &[
    ("pets", &[r"pet", r"dog", r"cat", r"fur"]),
    ("kids_toys", &[r"kid", r"child", r"toy", r"lego"]),
    (
        "multi_floor",
        &[r"upstairs", r"downstairs", r"multi[- ]floor", r"stairs"],
    ),
    ("tight_layout", &[r"tight", r"chair", r"table", r"narrow"]),
];

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid pattern {pattern:?} for tag {tag}: {source}")]
    Pattern {
        tag: &'static str,
        pattern: &'static str,
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub source: Source,
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub comments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub feature_counts: BTreeMap<String, usize>,
    pub scenario_counts: BTreeMap<String, usize>,
    pub source_counts: BTreeMap<String, usize>,
    pub top_features: Vec<TagCount>,
    pub top_scenarios: Vec<TagCount>,
    pub top_items: Vec<ItemSummary>,
    pub total_items: usize,
    pub total_comments: usize,
}

struct CompiledLexicon {
    tags: Vec<(&'static str, Vec<Regex>)>,
}

impl CompiledLexicon {
    fn compile(lexicon: Lexicon) -> Result<Self, AnalysisError> {
        let mut tags = Vec::with_capacity(lexicon.len());
        for &(tag, patterns) in lexicon {
            let mut compiled = Vec::with_capacity(patterns.len());
            for &pattern in patterns {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| AnalysisError::Pattern {
                        tag,
                        pattern,
                        source,
                    })?;
                compiled.push(re);
            }
            tags.push((tag, compiled));
        }
        Ok(Self { tags })
    }

    /// Adds one per tag with at least one matching pattern.
    fn tally(&self, blob: &str, counts: &mut [usize]) {
        for (slot, (_, patterns)) in counts.iter_mut().zip(&self.tags) {
            if patterns.iter().any(|re| re.is_match(blob)) {
                *slot += 1;
            }
        }
    }

    fn counts_map(&self, counts: &[usize]) -> BTreeMap<String, usize> {
        self.tags
            .iter()
            .zip(counts)
            .filter(|(_, count)| **count > 0)
            .map(|((tag, _), count)| (tag.to_string(), *count))
            .collect()
    }

    fn ranked(&self, counts: &[usize], limit: usize) -> Vec<TagCount> {
        let mut ranked: Vec<TagCount> = self
            .tags
            .iter()
            .zip(counts)
            .filter(|(_, count)| **count > 0)
            .map(|((tag, _), count)| TagCount {
                tag: tag.to_string(),
                count: *count,
            })
            .collect();
        // Stable: equal counts stay in lexicon order.
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked
    }
}

pub struct CorpusAnalyzer {
    features: CompiledLexicon,
    scenarios: CompiledLexicon,
}

impl CorpusAnalyzer {
    pub fn new() -> Result<Self, AnalysisError> {
        Self::with_lexicons(FEATURE_LEXICON, SCENARIO_LEXICON)
    }

    pub fn with_lexicons(features: Lexicon, scenarios: Lexicon) -> Result<Self, AnalysisError> {
        Ok(Self {
            features: CompiledLexicon::compile(features)?,
            scenarios: CompiledLexicon::compile(scenarios)?,
        })
    }

    pub fn analyze(&self, items: &[RawItem]) -> AnalysisResult {
        let mut feature_counts = vec![0usize; self.features.tags.len()];
        let mut scenario_counts = vec![0usize; self.scenarios.tags.len()];
        let mut source_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut summaries = Vec::with_capacity(items.len());

        for item in items {
            let blob = item.text_fields().join(" ");
            self.features.tally(&blob, &mut feature_counts);
            self.scenarios.tally(&blob, &mut scenario_counts);
            *source_counts.entry(item.source.to_string()).or_default() += 1;
            summaries.push(ItemSummary {
                source: item.source,
                id: item.id.clone(),
                title: item.title.clone(),
                url: item.url.clone(),
                score: item.engagement_score + item.comments.len() as i64,
                comments: item.comments.len(),
            });
        }

        summaries.sort_by(|a, b| b.score.cmp(&a.score));
        summaries.truncate(TOP_ITEMS);

        AnalysisResult {
            feature_counts: self.features.counts_map(&feature_counts),
            scenario_counts: self.scenarios.counts_map(&scenario_counts),
            source_counts,
            top_features: self.features.ranked(&feature_counts, TOP_TAGS),
            top_scenarios: self.scenarios.ranked(&scenario_counts, TOP_TAGS),
            top_items: summaries,
            total_items: items.len(),
            total_comments: items.iter().map(|it| it.comments.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vvw_core::{Comment, ItemBody};

    fn post(id: &str, selftext: &str, score: i64) -> RawItem {
        RawItem {
            source: Source::Reddit,
            id: id.to_string(),
            title: String::new(),
            url: format!("https://www.reddit.com/comments/{id}"),
            community: "RobotVacuums".into(),
            body: ItemBody::Post {
                selftext: selftext.to_string(),
            },
            created_at: None,
            engagement_score: score,
            reported_comment_count: 0,
            comments: vec![],
        }
    }

    fn comment(body: &str) -> Comment {
        Comment {
            body: body.to_string(),
            score: 1,
            author: "u".into(),
        }
    }

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn tags_pet_hair_and_threshold_posts() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let items = vec![
            post("a", "my dog's hair keeps tangling the brush", 1),
            post("b", "great at climbing over the door threshold", 1),
        ];
        let result = analyzer.analyze(&items);
        assert_eq!(
            result.feature_counts,
            counts(&[("hair_tangle", 1), ("threshold_climbing", 1)])
        );
        assert_eq!(result.scenario_counts, counts(&[("pets", 1)]));
        assert_eq!(result.source_counts, counts(&[("reddit", 2)]));
        assert_eq!(result.total_items, 2);
    }

    #[test]
    fn a_tag_counts_once_per_item_even_with_many_pattern_hits() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let mut item = post("a", "Hair TANGLE on the brush, anti-tangle my foot", 0);
        item.comments = vec![comment("more hair"), comment("brush again")];
        let result = analyzer.analyze(&[item]);
        assert_eq!(result.feature_counts.get("hair_tangle"), Some(&1));
    }

    #[test]
    fn comments_and_video_fields_feed_the_blob() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let video = RawItem {
            source: Source::Youtube,
            id: "v".into(),
            title: "S8 review".into(),
            url: String::new(),
            community: String::new(),
            body: ItemBody::Video {
                description: "goes upstairs with me".into(),
                transcript: "handles high-pile rugs".into(),
            },
            created_at: None,
            engagement_score: 4,
            reported_comment_count: 1,
            comments: vec![comment("the lego bricks were avoided")],
        };
        let result = analyzer.analyze(&[video]);
        assert_eq!(result.feature_counts.get("carpet_performance"), Some(&1));
        assert_eq!(result.feature_counts.get("obstacle_avoidance"), Some(&1));
        assert_eq!(result.scenario_counts.get("multi_floor"), Some(&1));
        assert_eq!(result.scenario_counts.get("kids_toys"), Some(&1));
        assert_eq!(result.top_items[0].score, 5);
        assert_eq!(result.total_comments, 1);
    }

    #[test]
    fn top_tags_are_capped_sorted_and_tie_broken_by_lexicon_order() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let items = vec![
            post("1", "carpet", 0),
            post("2", "carpet and mop", 0),
            post("3", "threshold", 0),
            post("4", "hair", 0),
            post("5", "cable", 0),
        ];
        let result = analyzer.analyze(&items);
        let ranked: Vec<(&str, usize)> = result
            .top_features
            .iter()
            .map(|t| (t.tag.as_str(), t.count))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("carpet_performance", 2),
                ("threshold_climbing", 1),
                ("obstacle_avoidance", 1),
                ("mop_automation", 1),
                ("hair_tangle", 1),
            ]
        );
        assert!(result.top_features.len() <= TOP_TAGS);
        assert!(result.top_scenarios.len() <= TOP_TAGS);
    }

    #[test]
    fn engagement_ranking_is_stable_and_capped() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let mut items: Vec<RawItem> = (0..10).map(|i| post(&format!("p{i}"), "", 1)).collect();
        items[7].engagement_score = 0;
        items[7].comments = vec![comment("x"), comment("y"), comment("z")];
        let result = analyzer.analyze(&items);
        let ids: Vec<&str> = result.top_items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["p7", "p0", "p1", "p2", "p3", "p4", "p5", "p6"]);
        assert_eq!(result.top_items[0].score, 3);
        assert_eq!(result.top_items[0].comments, 3);
    }

    #[test]
    fn analysis_is_deterministic() {
        let analyzer = CorpusAnalyzer::new().unwrap();
        let items = vec![
            post("a", "dog fur on the carpet under the table", 2),
            post("b", "mop lifts on rugs, kids love it", 2),
            post("c", "stuck on a cord", 5),
        ];
        let first = analyzer.analyze(&items);
        let second = CorpusAnalyzer::new().unwrap().analyze(&items);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn empty_corpus_yields_empty_result() {
        let result = CorpusAnalyzer::new().unwrap().analyze(&[]);
        assert!(result.feature_counts.is_empty());
        assert!(result.top_features.is_empty());
        assert!(result.top_items.is_empty());
        assert_eq!(result.total_items, 0);
    }

    #[test]
    fn invalid_pattern_is_reported_not_panicked() {
        const BROKEN: Lexicon = &[("broken", &[r"(unclosed"])];
        let err = CorpusAnalyzer::with_lexicons(BROKEN, SCENARIO_LEXICON)
            .err()
            .expect("compile error");
        assert!(err.to_string().contains("broken"));
    }
}
