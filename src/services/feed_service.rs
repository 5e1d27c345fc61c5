use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{EventCluster, FeedTheme, UserEventScore, UserSettings};
use crate::services::llm_service::{LlmService, ThemeAssignment};

/// Builds the bounded, themed feed out of scored clusters. Theme grouping
/// and briefing text prefer the LLM; both have deterministic fallbacks.
pub struct FeedService {
    llm: Arc<LlmService>,
}

impl FeedService {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self { llm }
    }

    /// Returns the themes (ordered by descending max cluster score) plus how
    /// many LLM calls fell back.
    pub async fn build_feed(
        &self,
        mut scored: Vec<(EventCluster, UserEventScore)>,
        settings: &UserSettings,
    ) -> (Vec<FeedTheme>, usize) {
        let mut llm_failures = 0usize;

        if scored.is_empty() {
            return (Vec::new(), 0);
        }

        // Sort by score, tie-break recency then canonical quality.
        scored.sort_by(|(ca, sa), (cb, sb)| {
            sb.total_score
                .partial_cmp(&sa.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    sb.breakdown
                        .recency_score
                        .partial_cmp(&sa.breakdown.recency_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    cb.canonical()
                        .source_quality_score
                        .partial_cmp(&ca.canonical().source_quality_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let cap = settings.mode.feed_cap();
        scored.truncate(cap);

        let assignments = match self.theme_assignments(&scored, cap).await {
            Ok(assignments) => assignments,
            Err(_) => {
                llm_failures += 1;
                fallback_grouping(&scored)
            }
        };

        let mut themes = Vec::new();
        for assignment in assignments {
            let members: Vec<(EventCluster, UserEventScore)> = assignment
                .cluster_indices
                .iter()
                .filter_map(|&i| scored.get(i).cloned())
                .collect();
            if members.is_empty() {
                continue;
            }

            let max_score = members
                .iter()
                .map(|(_, s)| s.total_score)
                .fold(f64::NEG_INFINITY, f64::max);

            let clusters: Vec<EventCluster> =
                members.into_iter().map(|(c, _)| c).collect();

            let (hook, context_explanation, why_it_matters) = self
                .theme_text(&assignment.theme_name, &clusters, settings, &mut llm_failures)
                .await;

            themes.push(FeedTheme {
                id: Uuid::new_v4(),
                theme_name: assignment.theme_name,
                event_clusters: clusters,
                hook,
                context_explanation,
                why_it_matters,
                max_score,
            });
        }

        themes.sort_by(|a, b| {
            b.max_score
                .partial_cmp(&a.max_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        (themes, llm_failures)
    }

    async fn theme_assignments(
        &self,
        scored: &[(EventCluster, UserEventScore)],
        cap: usize,
    ) -> Result<Vec<ThemeAssignment>, crate::errors::LlmError> {
        let summaries: Vec<String> = scored
            .iter()
            .map(|(c, _)| {
                format!(
                    "{} [{}] {}",
                    c.dominant_ticker.as_deref().unwrap_or("market"),
                    c.event_type,
                    c.canonical().clean_title
                )
            })
            .collect();

        let assignments = self.llm.group_into_themes(&summaries, cap).await?;

        if !assignments_are_valid(&assignments, scored.len()) {
            return Err(crate::errors::LlmError::InvalidResponse(
                "theme assignment does not partition the clusters".to_string(),
            ));
        }

        Ok(assignments)
    }

    async fn theme_text(
        &self,
        theme_name: &str,
        clusters: &[EventCluster],
        settings: &UserSettings,
        llm_failures: &mut usize,
    ) -> (String, String, String) {
        let digest: String = clusters
            .iter()
            .map(|c| {
                let canonical = c.canonical();
                format!("- {} ({})", canonical.clean_title, canonical.source)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let owned: Vec<String> = clusters
            .iter()
            .filter_map(|c| c.dominant_ticker.clone())
            .filter(|t| settings.owns(t))
            .collect();

        if self.llm.is_enabled() {
            match self.llm.write_theme_text(theme_name, &digest, &owned).await {
                Ok(text) => {
                    return (text.hook, text.context_explanation, text.why_it_matters)
                }
                Err(e) => {
                    debug!("theme text generation failed ({}), using template", e);
                    *llm_failures += 1;
                }
            }
        }

        fallback_theme_text(theme_name, clusters, &owned)
    }
}

/// The grouping must reference every selected cluster exactly once, with at
/// least one theme and no out-of-range indices.
fn assignments_are_valid(assignments: &[ThemeAssignment], cluster_count: usize) -> bool {
    if assignments.is_empty() {
        return false;
    }
    let mut seen = vec![false; cluster_count];
    for assignment in assignments {
        if assignment.cluster_indices.is_empty() {
            return false;
        }
        for &idx in &assignment.cluster_indices {
            if idx >= cluster_count || seen[idx] {
                return false;
            }
            seen[idx] = true;
        }
    }
    seen.into_iter().all(|s| s)
}

/// Deterministic grouping: by dominant ticker, then by event type for the
/// ticker-less remainder.
fn fallback_grouping(scored: &[(EventCluster, UserEventScore)]) -> Vec<ThemeAssignment> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();

    for (idx, (cluster, _)) in scored.iter().enumerate() {
        let key = match &cluster.dominant_ticker {
            Some(ticker) => format!("{} in focus", ticker),
            None => format!("Broader {} news", cluster.event_type),
        };
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(idx);
    }

    order
        .into_iter()
        .map(|key| ThemeAssignment {
            cluster_indices: buckets.remove(&key).unwrap_or_default(),
            theme_name: key,
        })
        .collect()
}

/// Template text built only from facts already in the articles.
fn fallback_theme_text(
    theme_name: &str,
    clusters: &[EventCluster],
    owned: &[String],
) -> (String, String, String) {
    let lead = clusters[0].canonical();

    let hook = format!("{}: {}", theme_name, lead.clean_title);

    let context_explanation = if clusters.len() == 1 {
        format!("One story here, via {}.", lead.source)
    } else {
        format!(
            "{} related stories, led by coverage from {}.",
            clusters.len(),
            lead.source
        )
    };

    let why_it_matters = if owned.is_empty() {
        "Worth a look for overall market context, even without a direct position.".to_string()
    } else {
        format!(
            "You hold {}, so this development touches your portfolio directly.",
            owned.join(", ")
        )
    };

    (hook, context_explanation, why_it_matters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CleanedArticle, EventType, Frequency, HoldingRef, Mode, ScoreBreakdown, Sensitivity,
    };
    use chrono::Utc;

    fn article(title: &str) -> CleanedArticle {
        CleanedArticle {
            id: Uuid::new_v4(),
            raw_article_id: Uuid::new_v4(),
            url: format!("https://example.com/{}", Uuid::new_v4()),
            clean_title: title.to_string(),
            clean_description: String::new(),
            clean_body: "body".to_string(),
            clean_tickers: Vec::new(),
            language: "en".to_string(),
            source: "Reuters".to_string(),
            source_quality_score: 1.0,
            published_at: Utc::now(),
            author: None,
            source_category: None,
            is_holdings_news: false,
            is_low_information: false,
        }
    }

    fn cluster(title: &str, ticker: Option<&str>) -> EventCluster {
        EventCluster {
            id: Uuid::new_v4(),
            articles: vec![article(title)],
            similarity_scores: Vec::new(),
            event_type: EventType::Earnings,
            dominant_ticker: ticker.map(|s| s.to_string()),
            canonical_index: 0,
            created_at: Utc::now(),
            merged_cross_ticker: false,
        }
    }

    fn scored(cluster: EventCluster, total: f64) -> (EventCluster, UserEventScore) {
        let score = UserEventScore {
            cluster_id: cluster.id,
            user_id: "u1".to_string(),
            total_score: total,
            breakdown: ScoreBreakdown {
                holdings_relevance: total,
                impact_label_score: 0.0,
                event_type_weight: 1.0,
                recency_score: 1.0,
            },
        };
        (cluster, score)
    }

    fn settings(mode: Mode, holdings: &[&str]) -> UserSettings {
        UserSettings {
            user_id: "u1".to_string(),
            user_name: None,
            holdings: holdings
                .iter()
                .map(|s| HoldingRef {
                    symbol: s.to_string(),
                    name: None,
                })
                .collect(),
            frequency: Frequency::Balanced,
            sensitivity: Sensitivity::Curious,
            weekly_summary: false,
            mode,
        }
    }

    #[tokio::test]
    async fn test_feed_capped_by_mode() {
        let svc = FeedService::new(Arc::new(LlmService::disabled()));
        let scored_clusters: Vec<_> = (0..8)
            .map(|i| {
                scored(
                    cluster(&format!("Story number {} about TSLA", i), Some("TSLA")),
                    0.9 - i as f64 * 0.05,
                )
            })
            .collect();

        let (themes, _) = svc
            .build_feed(scored_clusters, &settings(Mode::Focus, &["TSLA"]))
            .await;

        let total_clusters: usize = themes.iter().map(|t| t.event_clusters.len()).sum();
        assert_eq!(total_clusters, Mode::Focus.feed_cap());
    }

    #[tokio::test]
    async fn test_fallback_groups_by_ticker_then_event() {
        let svc = FeedService::new(Arc::new(LlmService::disabled()));
        let scored_clusters = vec![
            scored(cluster("AAPL beats on earnings", Some("AAPL")), 0.9),
            scored(cluster("AAPL ships a new product", Some("AAPL")), 0.8),
            scored(cluster("Inflation report lands", None), 0.7),
        ];

        let (themes, _) = svc
            .build_feed(scored_clusters, &settings(Mode::Smart, &["AAPL"]))
            .await;

        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].event_clusters.len(), 2);
        assert!(themes[0].theme_name.contains("AAPL"));
        assert!(!themes[0].hook.is_empty());
        assert!(!themes[0].why_it_matters.is_empty());
    }

    #[tokio::test]
    async fn test_themes_ordered_by_max_score() {
        let svc = FeedService::new(Arc::new(LlmService::disabled()));
        let scored_clusters = vec![
            scored(cluster("Minor macro story", None), 0.3),
            scored(cluster("NVDA earnings arrive", Some("NVDA")), 0.95),
        ];

        let (themes, _) = svc
            .build_feed(scored_clusters, &settings(Mode::Smart, &["NVDA"]))
            .await;

        assert!(themes.len() >= 2);
        assert!(themes[0].max_score >= themes[1].max_score);
        assert!(themes[0].theme_name.contains("NVDA"));
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_feed() {
        let svc = FeedService::new(Arc::new(LlmService::disabled()));
        let (themes, failures) = svc
            .build_feed(Vec::new(), &settings(Mode::Beginner, &[]))
            .await;
        assert!(themes.is_empty());
        assert_eq!(failures, 0);
    }

    #[test]
    fn test_assignment_validation() {
        let good = vec![ThemeAssignment {
            theme_name: "t".to_string(),
            cluster_indices: vec![0, 1],
        }];
        assert!(assignments_are_valid(&good, 2));

        let missing = vec![ThemeAssignment {
            theme_name: "t".to_string(),
            cluster_indices: vec![0],
        }];
        assert!(!assignments_are_valid(&missing, 2));

        let out_of_range = vec![ThemeAssignment {
            theme_name: "t".to_string(),
            cluster_indices: vec![0, 5],
        }];
        assert!(!assignments_are_valid(&out_of_range, 2));

        let duplicated = vec![
            ThemeAssignment {
                theme_name: "a".to_string(),
                cluster_indices: vec![0],
            },
            ThemeAssignment {
                theme_name: "b".to_string(),
                cluster_indices: vec![0, 1],
            },
        ];
        assert!(!assignments_are_valid(&duplicated, 2));
    }
}
