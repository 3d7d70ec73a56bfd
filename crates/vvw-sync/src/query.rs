//! Search query derivation from brand/model targets and keyword/focus terms.

use std::collections::HashSet;

use vvw_core::RunConfig;

/// Ordered, exact-duplicate-free list that stops accepting at its cap.
struct QueryList {
    cap: usize,
    seen: HashSet<String>,
    out: Vec<String>,
}

impl QueryList {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            seen: HashSet::new(),
            out: Vec::new(),
        }
    }

    fn push(&mut self, query: String) {
        let query = query.trim();
        if query.is_empty() || self.out.len() >= self.cap {
            return;
        }
        if self.seen.insert(query.to_string()) {
            self.out.push(query.to_string());
        }
    }
}

fn cleaned(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Models, brand×model pairs, then per brand the bare and category forms, then the lead
/// brand against up to two competitors, then free-text terms within the mode's budget.
pub fn build_queries(config: &RunConfig) -> Vec<String> {
    let mode = config.mode;
    let brands = cleaned(&config.product_filter.selected_brands);
    let models = cleaned(&config.product_filter.selected_models);
    let category = config.product_filter.category.trim();
    let mut list = QueryList::new(mode.query_cap());

    for model in &models {
        list.push(format!("\"{model}\""));
    }
    for brand in &brands {
        for model in &models {
            list.push(format!("\"{brand}\" \"{model}\""));
        }
    }
    for brand in &brands {
        list.push(format!("\"{brand}\""));
        if !category.is_empty() {
            list.push(format!("\"{brand}\" {category}"));
        }
    }
    if let Some((lead, competitors)) = brands.split_first() {
        for competitor in competitors.iter().filter(|c| **c != *lead).take(2) {
            list.push(format!("\"{lead}\" \"{competitor}\""));
        }
    }

    let terms = config
        .reddit
        .query_keywords
        .iter()
        .chain(config.focus.iter())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .take(mode.term_budget());
    for term in terms {
        list.push(term.to_string());
    }

    list.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vvw_core::Mode;

    fn config(brands: &[&str], models: &[&str], mode: Mode) -> RunConfig {
        let mut cfg = RunConfig::default();
        cfg.mode = mode;
        cfg.product_filter.selected_brands = brands.iter().map(|s| s.to_string()).collect();
        cfg.product_filter.selected_models = models.iter().map(|s| s.to_string()).collect();
        cfg
    }

    #[test]
    fn emission_order_for_two_brands_and_one_model() {
        let queries = build_queries(&config(&["A", "B"], &["X"], Mode::WeeklyMonitoring));
        assert_eq!(
            queries,
            vec![
                "\"X\"",
                "\"A\" \"X\"",
                "\"B\" \"X\"",
                "\"A\"",
                "\"A\" robot vacuum",
                "\"B\"",
                "\"B\" robot vacuum",
                "\"A\" \"B\"",
            ]
        );
    }

    #[test]
    fn lead_brand_compares_against_at_most_two_competitors() {
        let queries = build_queries(&config(&["A", "B", "C", "D"], &[], Mode::AdHocResearch));
        let versus: Vec<&String> = queries
            .iter()
            .filter(|q| q.starts_with("\"A\" \""))
            .collect();
        assert_eq!(versus, vec!["\"A\" \"B\"", "\"A\" \"C\""]);
    }

    #[test]
    fn weekly_cap_truncates_in_emission_order() {
        let queries = build_queries(&config(
            &["A", "B", "C"],
            &["X", "Y"],
            Mode::WeeklyMonitoring,
        ));
        assert_eq!(queries.len(), 10);
        assert_eq!(queries[0], "\"X\"");
        assert_eq!(queries[8], "\"A\"");
        assert_eq!(queries[9], "\"A\" robot vacuum");
    }

    #[test]
    fn ad_hoc_cap_is_sixteen() {
        let brands = ["A", "B", "C", "D", "E", "F"];
        let queries = build_queries(&config(&brands, &["X", "Y"], Mode::AdHocResearch));
        assert_eq!(queries.len(), 16);
    }

    #[test]
    fn duplicates_are_dropped_after_trimming() {
        let mut cfg = config(&["A", " A "], &["X", "X "], Mode::WeeklyMonitoring);
        cfg.product_filter.category = String::new();
        cfg.reddit.query_keywords = vec!["\"A\"".into(), "  ".into()];
        let queries = build_queries(&cfg);
        let unique: HashSet<&String> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len());
        assert_eq!(queries, vec!["\"X\"", "\"A\" \"X\"", "\"A\""]);
    }

    #[test]
    fn free_text_terms_respect_mode_budget() {
        let mut cfg = config(&[], &[], Mode::WeeklyMonitoring);
        cfg.reddit.query_keywords = vec!["pet hair".into(), "mop".into()];
        cfg.focus = vec!["threshold".into(), "carpet".into()];
        assert_eq!(build_queries(&cfg), vec!["pet hair", "mop"]);

        cfg.mode = Mode::AdHocResearch;
        assert_eq!(
            build_queries(&cfg),
            vec!["pet hair", "mop", "threshold", "carpet"]
        );
    }

    #[test]
    fn empty_targets_yield_no_queries() {
        assert!(build_queries(&RunConfig::default()).is_empty());
    }
}
