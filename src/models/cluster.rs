use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::article::CleanedArticle;
use crate::models::event::EventType;

/// A non-empty set of articles judged to describe the same real-world event.
/// The canonical article is an index into `articles`, never a second owning
/// handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCluster {
    pub id: Uuid,
    pub articles: Vec<CleanedArticle>,
    /// Pairwise similarity scores recorded while the cluster grew. Informational.
    pub similarity_scores: Vec<f64>,
    pub event_type: EventType,
    pub dominant_ticker: Option<String>,
    pub canonical_index: usize,
    pub created_at: DateTime<Utc>,
    /// Set when the cluster was produced by a cross-ticker merge.
    pub merged_cross_ticker: bool,
}

impl EventCluster {
    pub fn canonical(&self) -> &CleanedArticle {
        // canonical_index is maintained by the clustering engine and always
        // points inside `articles`.
        &self.articles[self.canonical_index]
    }

    /// Union of every member's extracted tickers.
    pub fn mentioned_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .articles
            .iter()
            .flat_map(|a| a.clean_tickers.iter().cloned())
            .collect();
        tickers.sort();
        tickers.dedup();
        tickers
    }

    pub fn is_holdings_related(&self) -> bool {
        self.articles.iter().any(|a| a.is_holdings_news)
    }

    pub fn max_quality(&self) -> f64 {
        self.articles
            .iter()
            .map(|a| a.source_quality_score)
            .fold(0.0, f64::max)
    }
}
