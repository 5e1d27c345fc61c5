use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{CleanedArticle, DetectedEvent, EventCluster, EventType};
use crate::services::llm_service::LlmService;

const TITLE_DUP_JACCARD: f64 = 0.85;
const QUICK_TITLE_JACCARD: f64 = 0.70;
const LLM_CANDIDATE_JACCARD: f64 = 0.30;
const LLM_FALLBACK_JACCARD: f64 = 0.50;
const CROSS_AUTO_MERGE_JACCARD: f64 = 0.50;
const CROSS_CANDIDATE_JACCARD: f64 = 0.35;
const SAME_EVENT_WINDOW_HOURS: i64 = 48;
const CROSS_MERGE_WINDOW_HOURS: i64 = 72;

/// Collapses articles about the same real-world event into clusters while
/// preserving multi-company events. Three stages: duplicate filter,
/// intra-ticker growth, cross-ticker merge. LLM checks break ambiguous
/// ties and degrade to similarity-only on failure.
pub struct ClusteringService {
    llm: Arc<LlmService>,
}

impl ClusteringService {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self { llm }
    }

    /// Cluster the input. `events` is keyed by cleaned-article id. Returns
    /// the clusters plus how many LLM checks failed and fell back.
    pub async fn cluster(
        &self,
        articles: Vec<CleanedArticle>,
        events: &HashMap<Uuid, DetectedEvent>,
        holdings: &[String],
    ) -> (Vec<EventCluster>, usize) {
        let mut llm_failures = 0usize;

        let survivors = duplicate_filter(articles);
        if survivors.is_empty() {
            return (Vec::new(), 0);
        }

        let mut clusters = self
            .intra_group_clustering(survivors, events, &mut llm_failures)
            .await;

        self.cross_ticker_merge(&mut clusters, holdings, &mut llm_failures)
            .await;

        (clusters, llm_failures)
    }

    // --------------------------------------------------------------------------
    // Stage 2: intra-group growth
    // --------------------------------------------------------------------------

    async fn intra_group_clustering(
        &self,
        articles: Vec<CleanedArticle>,
        events: &HashMap<Uuid, DetectedEvent>,
        llm_failures: &mut usize,
    ) -> Vec<EventCluster> {
        // Partition by dominant ticker, preserving first-seen group order.
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<CleanedArticle>> = HashMap::new();
        for article in articles {
            let key = events
                .get(&article.id)
                .and_then(|e| e.dominant_ticker.clone())
                .unwrap_or_else(|| "no-ticker".to_string());
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(article);
        }

        let mut clusters = Vec::new();
        for key in group_order {
            let members = groups.remove(&key).unwrap_or_default();
            let dominant = (key != "no-ticker").then_some(key);
            let grown = self
                .grow_group(members, dominant, events, llm_failures)
                .await;
            clusters.extend(grown);
        }
        clusters
    }

    async fn grow_group(
        &self,
        articles: Vec<CleanedArticle>,
        dominant_ticker: Option<String>,
        events: &HashMap<Uuid, DetectedEvent>,
        llm_failures: &mut usize,
    ) -> Vec<EventCluster> {
        let n = articles.len();
        let mut used = vec![false; n];
        let mut clusters = Vec::new();

        for seed_idx in 0..n {
            if used[seed_idx] {
                continue;
            }
            used[seed_idx] = true;

            let mut member_indices = vec![seed_idx];
            let mut similarities = Vec::new();

            for other_idx in (seed_idx + 1)..n {
                if used[other_idx] {
                    continue;
                }

                let seed = &articles[seed_idx];
                let other = &articles[other_idx];
                let jaccard = title_jaccard(&seed.clean_title, &other.clean_title);
                let tickers_match = dominant_ticker.is_some();

                let accepted_sim = if tickers_match
                    && same_event_type(seed, other, events)
                    && hours_apart(seed, other) <= SAME_EVENT_WINDOW_HOURS
                {
                    Some(0.95)
                } else if tickers_match && jaccard > QUICK_TITLE_JACCARD {
                    Some(jaccard)
                } else if jaccard > LLM_CANDIDATE_JACCARD || tickers_match {
                    // Ambiguous pair: ask the LLM, degrade to similarity.
                    match self.same_event_check(seed, other).await {
                        Ok(true) => Some(jaccard.max(LLM_FALLBACK_JACCARD)),
                        Ok(false) => None,
                        Err(_) => {
                            *llm_failures += 1;
                            (jaccard > LLM_FALLBACK_JACCARD).then_some(jaccard)
                        }
                    }
                } else {
                    None
                };

                if let Some(sim) = accepted_sim {
                    used[other_idx] = true;
                    member_indices.push(other_idx);
                    similarities.push(sim);
                }
            }

            let members: Vec<CleanedArticle> = member_indices
                .iter()
                .map(|&i| articles[i].clone())
                .collect();
            clusters.push(build_cluster(
                members,
                similarities,
                dominant_ticker.clone(),
                events,
                false,
            ));
        }

        clusters
    }

    async fn same_event_check(
        &self,
        a: &CleanedArticle,
        b: &CleanedArticle,
    ) -> Result<bool, crate::errors::LlmError> {
        self.llm
            .same_event(
                &a.clean_title,
                &a.clean_description,
                &b.clean_title,
                &b.clean_description,
            )
            .await
    }

    // --------------------------------------------------------------------------
    // Stage 3: cross-ticker merge
    // --------------------------------------------------------------------------

    async fn cross_ticker_merge(
        &self,
        clusters: &mut Vec<EventCluster>,
        holdings: &[String],
        llm_failures: &mut usize,
    ) {
        loop {
            let mut merge_pair: Option<(usize, usize)> = None;

            'search: for i in 0..clusters.len() {
                for j in (i + 1)..clusters.len() {
                    let (a, b) = (&clusters[i], &clusters[j]);
                    let (Some(ticker_a), Some(ticker_b)) =
                        (&a.dominant_ticker, &b.dominant_ticker)
                    else {
                        continue;
                    };
                    if ticker_a == ticker_b {
                        continue;
                    }

                    if self.should_merge(a, b, llm_failures).await {
                        merge_pair = Some((i, j));
                        break 'search;
                    }
                }
            }

            match merge_pair {
                Some((i, j)) => {
                    let removed = clusters.remove(j);
                    let target = clusters.remove(i);
                    let merged = merge_clusters(target, removed, holdings);
                    clusters.insert(i, merged);
                }
                None => break,
            }
        }
    }

    async fn should_merge(
        &self,
        a: &EventCluster,
        b: &EventCluster,
        llm_failures: &mut usize,
    ) -> bool {
        let jaccard = title_jaccard(&a.canonical().clean_title, &b.canonical().clean_title);

        if jaccard > CROSS_AUTO_MERGE_JACCARD {
            return true;
        }

        let tickers_a: HashSet<String> = a.mentioned_tickers().into_iter().collect();
        let tickers_b: HashSet<String> = b.mentioned_tickers().into_iter().collect();
        let tickers_overlap = !tickers_a.is_disjoint(&tickers_b);

        let close_in_time = hours_apart(a.canonical(), b.canonical()) <= CROSS_MERGE_WINDOW_HOURS;
        let is_candidate = tickers_overlap || (jaccard > CROSS_CANDIDATE_JACCARD && close_in_time);
        if !is_candidate {
            return false;
        }

        match self.same_event_check(a.canonical(), b.canonical()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!("cross-ticker LLM check failed ({}), similarity-only", e);
                *llm_failures += 1;
                jaccard > CROSS_AUTO_MERGE_JACCARD
            }
        }
    }
}

// ==============================================================================
// Stage 1: duplicate filter
// ==============================================================================

/// Drop exact url duplicates, exact normalized-title duplicates, and titles
/// whose word overlap with an already-kept title exceeds the near-dup bound.
pub fn duplicate_filter(articles: Vec<CleanedArticle>) -> Vec<CleanedArticle> {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut kept_token_sets: Vec<HashSet<String>> = Vec::new();
    let mut kept = Vec::new();

    for article in articles {
        if !seen_urls.insert(article.url.clone()) {
            continue;
        }

        let tokens = title_tokens(&article.clean_title);
        let normalized: String = {
            let mut sorted: Vec<&String> = tokens.iter().collect();
            sorted.sort();
            sorted
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        };
        if !normalized.is_empty() && !seen_titles.insert(normalized) {
            continue;
        }

        if kept_token_sets
            .iter()
            .any(|prev| jaccard(prev, &tokens) > TITLE_DUP_JACCARD)
        {
            continue;
        }

        kept_token_sets.push(tokens);
        kept.push(article);
    }

    kept
}

// ==============================================================================
// Cluster assembly
// ==============================================================================

fn build_cluster(
    articles: Vec<CleanedArticle>,
    similarity_scores: Vec<f64>,
    dominant_ticker: Option<String>,
    events: &HashMap<Uuid, DetectedEvent>,
    merged_cross_ticker: bool,
) -> EventCluster {
    debug_assert!(!articles.is_empty(), "clusters are never empty");

    let event_type = articles
        .iter()
        .filter_map(|a| events.get(&a.id))
        .map(|e| e.event_type)
        .max_by(|a, b| {
            a.base_score()
                .partial_cmp(&b.base_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(EventType::Fluff);

    let canonical_index = pick_canonical(&articles);

    EventCluster {
        id: Uuid::new_v4(),
        articles,
        similarity_scores,
        event_type,
        dominant_ticker,
        canonical_index,
        created_at: Utc::now(),
        merged_cross_ticker,
    }
}

fn merge_clusters(a: EventCluster, b: EventCluster, holdings: &[String]) -> EventCluster {
    let event_type = if a.event_type.base_score() >= b.event_type.base_score() {
        a.event_type
    } else {
        b.event_type
    };

    let dominant_ticker = pick_merged_dominant(&a, &b, holdings);

    let created_at = a.created_at.min(b.created_at);

    let mut articles = a.articles;
    articles.extend(b.articles);
    let mut similarity_scores = a.similarity_scores;
    similarity_scores.extend(b.similarity_scores);

    let canonical_index = pick_canonical(&articles);

    EventCluster {
        id: Uuid::new_v4(),
        articles,
        similarity_scores,
        event_type,
        dominant_ticker,
        canonical_index,
        created_at,
        merged_cross_ticker: true,
    }
}

/// Holdings-owner ticker preferred, else the candidate mentioned in more
/// member articles; alphabetical on ties for determinism.
fn pick_merged_dominant(a: &EventCluster, b: &EventCluster, holdings: &[String]) -> Option<String> {
    let candidates: Vec<String> = [a.dominant_ticker.clone(), b.dominant_ticker.clone()]
        .into_iter()
        .flatten()
        .collect();
    if candidates.is_empty() {
        return None;
    }

    if let Some(owned) = candidates.iter().find(|t| holdings.contains(t)) {
        return Some(owned.clone());
    }

    let all_articles = a.articles.iter().chain(b.articles.iter());
    let mut counts: HashMap<&String, usize> = HashMap::new();
    for article in all_articles {
        for candidate in &candidates {
            if article.mentions(candidate) {
                *counts.entry(candidate).or_insert(0) += 1;
            }
        }
    }

    candidates
        .iter()
        .max_by(|x, y| {
            counts
                .get(x)
                .unwrap_or(&0)
                .cmp(counts.get(y).unwrap_or(&0))
                .then_with(|| y.cmp(x)) // alphabetical preference on ties
        })
        .cloned()
}

/// Scored canonical pick: quality, body substance, freshness, title length.
pub fn pick_canonical(articles: &[CleanedArticle]) -> usize {
    let now = Utc::now();
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;

    for (idx, article) in articles.iter().enumerate() {
        let body_len = article.clean_body.chars().count() as f64;
        let title_len = article.clean_title.chars().count() as f64;
        let age_days = (now - article.published_at).num_seconds() as f64 / 86_400.0;

        let score = 0.4 * article.source_quality_score
            + 0.3 * (body_len / 1000.0).min(1.0)
            + 0.2 * (1.0 - age_days / 7.0).max(0.0)
            + 0.1 * (title_len / 100.0).min(1.0);

        if score > best_score {
            best_score = score;
            best = idx;
        }
    }

    best
}

// ==============================================================================
// Similarity helpers
// ==============================================================================

/// Title tokens for similarity: lowercased, punctuation stripped, short
/// words (2 chars or fewer) removed.
pub fn title_tokens(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

pub fn title_jaccard(a: &str, b: &str) -> f64 {
    jaccard(&title_tokens(a), &title_tokens(b))
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn same_event_type(
    a: &CleanedArticle,
    b: &CleanedArticle,
    events: &HashMap<Uuid, DetectedEvent>,
) -> bool {
    match (events.get(&a.id), events.get(&b.id)) {
        (Some(ea), Some(eb)) => ea.event_type == eb.event_type,
        _ => false,
    }
}

fn hours_apart(a: &CleanedArticle, b: &CleanedArticle) -> i64 {
    (a.published_at - b.published_at).num_hours().abs()
}
