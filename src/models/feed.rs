use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::cluster::EventCluster;

/// A human-readable grouping of clusters, with generated briefing text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTheme {
    pub id: Uuid,
    pub theme_name: String,
    pub event_clusters: Vec<EventCluster>,
    pub hook: String,
    pub context_explanation: String,
    pub why_it_matters: String,
    /// Highest member score; themes are ordered by this, descending.
    pub max_score: f64,
}

/// Counters accumulated across one pipeline run. Returned next to the feed
/// so callers can see what happened to their input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub fetched: usize,
    pub cleaned: usize,
    pub dropped_non_english: usize,
    pub detected: usize,
    pub clusters: usize,
    pub scored: usize,
    pub themes: usize,
    pub llm_failures: usize,
    pub invariant_drops: usize,
}
