use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::external::alphavantage::NewsSearchApi;
use crate::models::{normalize_url, HoldingRef, RawArticle};
use crate::services::rate_limiter::RateLimiter;
use crate::services::source_registry::{Source, SourceRegistry, SourceTransport};

const RSS_TIMEOUT: Duration = Duration::from_secs(20);
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// At most this many feed fetches in flight at once, which also bounds
/// per-host concurrency since each source is fetched exactly once per run.
const MAX_CONCURRENT_FETCHES: usize = 4;

/// Phase B pulls in the L3 API only when the wire and aggregator layers
/// produced fewer than this many top stories.
const DEFAULT_L3_FLOOR: usize = 10;

/// Pulls articles from every registered source: a holdings-first pass, then
/// top stories. Sources fetch in parallel with individual timeouts; a failing
/// source contributes nothing and never aborts the batch.
pub struct MultiLayerFetcher {
    registry: Arc<SourceRegistry>,
    client: reqwest::Client,
    search_api: Option<Arc<dyn NewsSearchApi>>,
    /// Concurrency gate over feed fetches (no spacing, just a cap).
    fetch_gate: RateLimiter,
    l3_floor: usize,
}

impl MultiLayerFetcher {
    pub fn new(registry: Arc<SourceRegistry>, search_api: Option<Arc<dyn NewsSearchApi>>) -> Self {
        let l3_floor = std::env::var("L3_FALLBACK_FLOOR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_L3_FLOOR);

        Self {
            registry,
            client: reqwest::Client::new(),
            search_api,
            fetch_gate: RateLimiter::new(MAX_CONCURRENT_FETCHES, Duration::ZERO),
            l3_floor,
        }
    }

    /// Fetch up to `limit` deduplicated articles, holdings news first.
    pub async fn fetch_all(
        &self,
        holdings: &[HoldingRef],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<RawArticle> {
        if cancel.is_cancelled() {
            return Vec::new();
        }

        // One fetch per feed source; the holdings pass filters the same
        // payloads so nothing is pulled twice.
        let feed_sources: Vec<&Source> = self
            .registry
            .all()
            .iter()
            .filter(|s| matches!(s.transport, SourceTransport::Feed { .. }))
            .collect();

        let fetches = feed_sources
            .iter()
            .map(|source| self.fetch_feed_source(source, cancel));
        let per_source: Vec<Vec<RawArticle>> = join_all(fetches).await;

        // Phase A: holdings-first. Feed items matching a held symbol or
        // company name, plus a targeted L3 search.
        let mut phase_a: Vec<RawArticle> = Vec::new();
        if !holdings.is_empty() {
            for items in &per_source {
                for item in items {
                    if matches_holdings(item, holdings) {
                        let mut hit = item.clone();
                        hit.id = Uuid::new_v4();
                        hit.is_holdings_news = true;
                        phase_a.push(hit);
                    }
                }
            }

            if let Some(api) = &self.search_api {
                let symbols: Vec<String> =
                    holdings.iter().map(|h| h.symbol.clone()).collect();
                match with_timeout(API_TIMEOUT, cancel, api.search(&symbols, limit)).await {
                    Some(Ok(mut articles)) => {
                        for a in &mut articles {
                            a.is_holdings_news = true;
                        }
                        phase_a.extend(articles);
                    }
                    Some(Err(e)) => warn!("L3 holdings search failed: {}", e),
                    None => warn!("L3 holdings search timed out or was cancelled"),
                }
            }
        }

        // Phase B: top stories from L1+L2, with L3 as a thin-feed fallback.
        let mut phase_b: Vec<RawArticle> = per_source.into_iter().flatten().collect();

        if phase_b.len() < self.l3_floor {
            if let Some(api) = &self.search_api {
                match with_timeout(API_TIMEOUT, cancel, api.search(&[], limit)).await {
                    Some(Ok(articles)) => {
                        info!(
                            "L1+L2 thin ({} items), topping up with {} L3 items",
                            phase_b.len(),
                            articles.len()
                        );
                        phase_b.extend(articles);
                    }
                    Some(Err(e)) => warn!("L3 top-stories fallback failed: {}", e),
                    None => {}
                }
            }
        }

        merge_and_dedup(phase_a, phase_b, limit)
    }

    async fn fetch_feed_source(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Vec<RawArticle> {
        let SourceTransport::Feed { url } = &source.transport else {
            return Vec::new();
        };

        // Every source joins the same join_all; the gate keeps only a few
        // requests in flight at a time.
        let _permit = self.fetch_gate.acquire().await;

        let fetch = self.fetch_feed(url, source);
        match with_timeout(RSS_TIMEOUT, cancel, fetch).await {
            Some(Ok(items)) => {
                info!("Fetched {} items from {}", items.len(), source.name);
                items
            }
            Some(Err(e)) => {
                warn!("Failed to fetch {}: {}", source.name, e);
                Vec::new()
            }
            None => {
                warn!("Fetch of {} timed out or was cancelled", source.name);
                Vec::new()
            }
        }
    }

    async fn fetch_feed(&self, url: &str, source: &Source) -> anyhow::Result<Vec<RawArticle>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }

        let bytes = response.bytes().await?;
        let feed = feed_rs::parser::parse(&bytes[..])?;

        Ok(feed_entries_to_articles(feed, source))
    }
}

/// Convert parsed feed entries into raw articles for one source.
pub fn feed_entries_to_articles(feed: feed_rs::model::Feed, source: &Source) -> Vec<RawArticle> {
    let now = Utc::now();
    feed.entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.map(|t| t.content)?;
            if title.trim().is_empty() {
                return None;
            }
            let url = entry.links.first().map(|l| l.href.clone())?;

            Some(RawArticle {
                id: Uuid::new_v4(),
                source: source.name.clone(),
                source_layer: source.layer,
                title,
                raw_body: entry.content.and_then(|c| c.body),
                description: entry.summary.map(|s| s.content),
                published_at: entry
                    .published
                    .or(entry.updated)
                    .map(|d| d.to_rfc3339()),
                url,
                initial_tickers: None,
                fetch_time: now,
                is_holdings_news: false,
                source_tag: entry.authors.first().map(|a| a.name.clone()),
            })
        })
        .collect()
}

/// Does this feed item mention one of the user's holdings? Symbols match as
/// exact uppercase tokens, company names case-insensitively.
pub fn matches_holdings(article: &RawArticle, holdings: &[HoldingRef]) -> bool {
    let text = format!(
        "{} {}",
        article.title,
        article.description.as_deref().unwrap_or("")
    );
    let lower = text.to_lowercase();

    holdings.iter().any(|h| {
        let symbol_hit = text
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == h.symbol);
        let name_hit = h
            .name
            .as_ref()
            .map(|n| !n.is_empty() && lower.contains(&n.to_lowercase()))
            .unwrap_or(false);
        symbol_hit || name_hit
    })
}

/// Concatenate the holdings pass ahead of top stories, drop repeated
/// normalized urls, cap to `limit` preserving order.
pub fn merge_and_dedup(
    phase_a: Vec<RawArticle>,
    phase_b: Vec<RawArticle>,
    limit: usize,
) -> Vec<RawArticle> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for article in phase_a.into_iter().chain(phase_b) {
        if merged.len() >= limit {
            break;
        }
        if seen.insert(normalize_url(&article.url)) {
            merged.push(article);
        }
    }

    merged
}

async fn with_timeout<T>(
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(limit, fut) => result.ok(),
    }
}
