use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::{holding_queries, news_queries};
use crate::errors::AppError;
use crate::models::{normalize_url, AlertKind, HoldingRef, RawArticle};
use crate::services::alert_service::{self, AlertCandidate, DispatchOutcome};
use crate::services::content_hash;
use crate::services::fetch_service::MultiLayerFetcher;
use crate::services::llm_service::LlmService;
use crate::services::notification_service::NotificationService;
use crate::services::source_registry::SourceRegistry;

/// Only headlines published inside this window are alert-worthy.
const FRESHNESS_HOURS: i64 = 24;

const NEWS_FETCH_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct NewsMonitorStats {
    pub articles_seen: usize,
    pub delivered: usize,
    pub digested: usize,
    pub duplicates: usize,
    pub tier_drops: usize,
}

/// Watches headlines for held symbols and pushes tier-gated news alerts.
pub struct NewsMonitor {
    pool: PgPool,
    fetcher: Arc<MultiLayerFetcher>,
    registry: Arc<SourceRegistry>,
    notifier: Arc<NotificationService>,
    llm: Arc<LlmService>,
}

impl NewsMonitor {
    pub fn new(
        pool: PgPool,
        fetcher: Arc<MultiLayerFetcher>,
        registry: Arc<SourceRegistry>,
        notifier: Arc<NotificationService>,
        llm: Arc<LlmService>,
    ) -> Self {
        Self {
            pool,
            fetcher,
            registry,
            notifier,
            llm,
        }
    }

    pub async fn run(&self) -> Result<NewsMonitorStats, AppError> {
        let mut stats = NewsMonitorStats::default();

        let symbols = holding_queries::all_symbols(&self.pool).await?;
        if symbols.is_empty() {
            return Ok(stats);
        }

        let holdings: Vec<HoldingRef> = symbols
            .iter()
            .map(|s| HoldingRef {
                symbol: s.clone(),
                name: None,
            })
            .collect();

        let cancel = CancellationToken::new();
        let articles = self
            .fetcher
            .fetch_all(&holdings, NEWS_FETCH_LIMIT, &cancel)
            .await;

        let now = chrono::Utc::now();
        for article in articles.iter().filter(|a| a.is_holdings_news) {
            stats.articles_seen += 1;

            // Stale items never alert.
            let published_at = article
                .published_at
                .as_deref()
                .and_then(parse_feed_date)
                .unwrap_or(article.fetch_time);
            if (now - published_at).num_hours() > FRESHNESS_HOURS {
                continue;
            }

            let Some(symbol) = symbol_for(article, &symbols) else {
                continue;
            };

            let url = normalize_url(&article.url);
            let url_hash = content_hash::news_hash(&url);
            let tier = self.registry.tier(&article.source);

            // The url-keyed cache is the monitor's dedup memory; a headline
            // we have cached before was already considered.
            let fresh = news_queries::try_insert_news_item(
                &self.pool,
                &symbol,
                &article.title,
                &url,
                &article.source,
                tier,
                published_at,
                &url_hash,
            )
            .await?;
            if !fresh {
                stats.duplicates += 1;
                continue;
            }

            self.alert_holders(article, &symbol, &url, &url_hash, tier, &mut stats)
                .await?;
        }

        info!(
            "News monitor: {} articles, {} delivered, {} digested, {} dedup hits, {} tier drops",
            stats.articles_seen,
            stats.delivered,
            stats.digested,
            stats.duplicates,
            stats.tier_drops
        );
        Ok(stats)
    }

    async fn alert_holders(
        &self,
        article: &RawArticle,
        symbol: &str,
        url: &str,
        url_hash: &str,
        tier: i32,
        stats: &mut NewsMonitorStats,
    ) -> Result<(), AppError> {
        let holders = holding_queries::holders_of(&self.pool, symbol).await?;

        for user in holders {
            let accepted = user.sensitivity().accepted_news_tiers();
            if !accepted.contains(&tier) {
                info!(
                    "Dropped news for {} (source {}, tier {}): tier_below_sensitivity",
                    user.user_id, article.source, tier
                );
                stats.tier_drops += 1;
                continue;
            }

            let candidate = AlertCandidate {
                user_id: user.user_id.clone(),
                kind: AlertKind::News,
                symbol: Some(symbol.to_string()),
                content_hash: url_hash.to_string(),
                title: format!("{}: {}", symbol, article.title),
                fallback_message: format!("{} (via {})", article.title, article.source),
                llm_facts: format!(
                    "symbol={} headline={} source={}",
                    symbol, article.title, article.source
                ),
                url: Some(url.to_string()),
                metadata: json!({
                    "source": article.source,
                    "source_tier": tier,
                }),
                push_data: json!({
                    "alert_type": "news",
                    "symbol": symbol,
                    "url": url,
                }),
            };

            match alert_service::dispatch(&self.pool, &self.notifier, &self.llm, &user, candidate)
                .await?
            {
                DispatchOutcome::Delivered => stats.delivered += 1,
                DispatchOutcome::Digested => stats.digested += 1,
                DispatchOutcome::Duplicate => stats.duplicates += 1,
            }
        }

        Ok(())
    }
}

fn parse_feed_date(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .or_else(|_| chrono::DateTime::parse_from_rfc2822(raw))
        .map(|d| d.with_timezone(&chrono::Utc))
        .ok()
}

/// Which monitored symbol does this article belong to? Prefer the tagged
/// tickers, fall back to a token scan of the title.
fn symbol_for(article: &RawArticle, symbols: &[String]) -> Option<String> {
    if let Some(initial) = &article.initial_tickers {
        if let Some(hit) = initial.iter().find(|t| symbols.contains(t)) {
            return Some(hit.clone());
        }
    }

    article
        .title
        .split(|c: char| !c.is_alphanumeric())
        .find(|token| symbols.iter().any(|s| s == token))
        .map(|s| s.to_string())
}
