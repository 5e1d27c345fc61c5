use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    CleanedArticle, DetectedEvent, EventCluster, FeedTheme, PipelineDiagnostics, UserEventScore,
    UserSettings,
};
use crate::services::cleaning_service::CleaningService;
use crate::services::clustering_service::ClusteringService;
use crate::services::event_detection::EventDetectionService;
use crate::services::feed_service::FeedService;
use crate::services::fetch_service::MultiLayerFetcher;
use crate::services::llm_service::LlmService;
use crate::services::scoring_service;
use crate::services::source_registry::SourceRegistry;

const DEFAULT_FETCH_LIMIT: usize = 50;

/// The personalization pipeline: fetch, clean, detect, cluster, score, build
/// the feed. Bulk-synchronous between stages; each stage sees the previous
/// stage's full output. One entry point, data in / data out, no storage.
pub struct NewsPipeline {
    registry: Arc<SourceRegistry>,
    fetcher: MultiLayerFetcher,
    cleaner: CleaningService,
    detector: EventDetectionService,
    clusterer: ClusteringService,
    feed: FeedService,
    fetch_limit: usize,
}

impl NewsPipeline {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: MultiLayerFetcher,
        cleaner: CleaningService,
        llm: Arc<LlmService>,
    ) -> Self {
        let fetch_limit = std::env::var("FETCH_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FETCH_LIMIT);

        Self {
            registry,
            fetcher,
            cleaner,
            detector: EventDetectionService::new(llm.clone()),
            clusterer: ClusteringService::new(llm.clone()),
            feed: FeedService::new(llm),
            fetch_limit,
        }
    }

    /// Run the whole pipeline for one user. A cancelled run returns an error
    /// rather than partial output.
    pub async fn run(
        &self,
        settings: &UserSettings,
        cancel: &CancellationToken,
    ) -> Result<(Vec<FeedTheme>, PipelineDiagnostics), AppError> {
        let mut diagnostics = PipelineDiagnostics::default();

        // --- fetch ---------------------------------------------------------------
        let raw_articles = self
            .fetcher
            .fetch_all(&settings.holdings, self.fetch_limit, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        diagnostics.fetched = raw_articles.len();

        // --- clean ---------------------------------------------------------------
        let mut cleaned: Vec<CleanedArticle> = Vec::with_capacity(raw_articles.len());
        for raw in &raw_articles {
            let article = self.cleaner.clean_with_registry(raw, &self.registry);
            if article.language != "en" {
                diagnostics.dropped_non_english += 1;
                continue;
            }
            cleaned.push(article);
        }
        diagnostics.cleaned = cleaned.len();
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // --- detect --------------------------------------------------------------
        let holdings = settings.symbols();
        let (events, detect_llm_failures) = self.detector.detect_all(&cleaned, &holdings).await;
        diagnostics.detected = events.len();
        diagnostics.llm_failures += detect_llm_failures;
        let events_by_article: HashMap<Uuid, DetectedEvent> = events
            .into_iter()
            .map(|e| (e.cleaned_article_id, e))
            .collect();
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // --- cluster -------------------------------------------------------------
        let (clusters, cluster_llm_failures) = self
            .clusterer
            .cluster(cleaned, &events_by_article, &holdings)
            .await;
        diagnostics.clusters = clusters.len();
        diagnostics.llm_failures += cluster_llm_failures;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        // --- score ---------------------------------------------------------------
        let mut scored: Vec<(EventCluster, UserEventScore)> = Vec::new();
        for cluster in clusters {
            if cluster.articles.is_empty() {
                // Should be impossible by construction; drop and count.
                diagnostics.invariant_drops += 1;
                continue;
            }
            if let Some(score) = scoring_service::score(&cluster, settings, &events_by_article) {
                scored.push((cluster, score));
            }
        }
        diagnostics.scored = scored.len();

        // --- feed ----------------------------------------------------------------
        let (themes, feed_llm_failures) = self.feed.build_feed(scored, settings).await;
        diagnostics.themes = themes.len();
        diagnostics.llm_failures += feed_llm_failures;

        info!(
            "Pipeline run for {}: {} fetched -> {} cleaned -> {} clusters -> {} scored -> {} themes",
            settings.user_id,
            diagnostics.fetched,
            diagnostics.cleaned,
            diagnostics.clusters,
            diagnostics.scored,
            diagnostics.themes
        );

        Ok((themes, diagnostics))
    }
}
