use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{holding_queries, price_queries};
use crate::errors::AppError;
use crate::external::quote_provider::QuoteProvider;
use crate::models::{AlertKind, PricePoint};
use crate::services::alert_service::{self, AlertCandidate, DispatchOutcome};
use crate::services::content_hash;
use crate::services::llm_service::LlmService;
use crate::services::notification_service::NotificationService;
use crate::services::rate_limiter::RateLimiter;

/// Quote providers on free tiers want at most one request every 12 seconds.
const QUOTE_SPACING: Duration = Duration::from_secs(12);

/// The move we alert on is measured over this window.
const CHANGE_WINDOW_MINUTES: i64 = 15;

/// Skip the symbol unless some point in the window is at least this old, so
/// a cold cache cannot fake a 15-minute move.
const MIN_SPAN_MINUTES: i64 = 10;

#[derive(Debug, Default)]
pub struct PriceMonitorStats {
    pub symbols_checked: usize,
    pub delivered: usize,
    pub digested: usize,
    pub duplicates: usize,
}

/// Polls quotes for every held symbol, appends price points, and raises
/// threshold alerts on 15-minute moves.
pub struct PriceMonitor {
    pool: PgPool,
    provider: Arc<dyn QuoteProvider>,
    quote_limiter: RateLimiter,
    notifier: Arc<NotificationService>,
    llm: Arc<LlmService>,
}

impl PriceMonitor {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn QuoteProvider>,
        notifier: Arc<NotificationService>,
        llm: Arc<LlmService>,
    ) -> Self {
        Self {
            pool,
            provider,
            quote_limiter: RateLimiter::new(1, QUOTE_SPACING),
            notifier,
            llm,
        }
    }

    pub async fn run(&self) -> Result<PriceMonitorStats, AppError> {
        let mut stats = PriceMonitorStats::default();
        let symbols = holding_queries::all_symbols(&self.pool).await?;

        for symbol in symbols {
            stats.symbols_checked += 1;

            let quote = {
                let _guard = self.quote_limiter.acquire().await;
                match self.provider.fetch_quote(&symbol).await {
                    Ok(quote) => quote,
                    Err(e) => {
                        warn!("Quote fetch failed for {}: {}", symbol, e);
                        continue;
                    }
                }
            };

            price_queries::insert_price_point(
                &self.pool,
                &symbol,
                quote.price,
                quote.change_percent,
                quote.volume,
            )
            .await?;

            let window =
                price_queries::window(&self.pool, &symbol, CHANGE_WINDOW_MINUTES).await?;
            let Some(change_pct) = fifteen_minute_change(&window) else {
                continue;
            };

            self.alert_holders(&symbol, change_pct, &mut stats).await?;
        }

        info!(
            "Price monitor: {} symbols, {} delivered, {} digested, {} dedup hits",
            stats.symbols_checked, stats.delivered, stats.digested, stats.duplicates
        );
        Ok(stats)
    }

    async fn alert_holders(
        &self,
        symbol: &str,
        change_pct: f64,
        stats: &mut PriceMonitorStats,
    ) -> Result<(), AppError> {
        let holders = holding_queries::holders_of(&self.pool, symbol).await?;
        let now = chrono::Utc::now();

        for user in holders {
            let threshold = user.sensitivity().price_threshold_pct();
            // At-threshold moves fire: the comparator is >=.
            if change_pct.abs() < threshold {
                continue;
            }

            let arrow = if change_pct >= 0.0 { "↑" } else { "↓" };
            let magnitude = format!("{:.1}", change_pct.abs());
            let title = format!("{} {} {}%", symbol, arrow, magnitude);
            let direction = if change_pct >= 0.0 { "up" } else { "down" };

            let candidate = AlertCandidate {
                user_id: user.user_id.clone(),
                kind: AlertKind::Price,
                symbol: Some(symbol.to_string()),
                content_hash: content_hash::price_hash(symbol, now),
                title,
                fallback_message: format!(
                    "{} moved {} {}% over the last 15 minutes.",
                    symbol, direction, magnitude
                ),
                llm_facts: format!(
                    "symbol={} direction={} change_percent={}% window=15 minutes",
                    symbol, direction, magnitude
                ),
                url: None,
                metadata: json!({
                    "change_percent": change_pct,
                    "window_minutes": CHANGE_WINDOW_MINUTES,
                }),
                push_data: json!({
                    "alert_type": "price",
                    "symbol": symbol,
                    "changePercent": change_pct,
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

/// Newest minus oldest price inside the window, as a percent of the oldest.
/// None unless the window spans at least ten minutes of history.
pub fn fifteen_minute_change(window: &[PricePoint]) -> Option<f64> {
    let oldest = window.first()?;
    let newest = window.last()?;

    let oldest_age = (chrono::Utc::now() - oldest.ts).num_minutes();
    if oldest_age < MIN_SPAN_MINUTES {
        return None;
    }

    if oldest.price <= 0.0 {
        return None;
    }

    Some(((newest.price - oldest.price) / oldest.price) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn point(price: f64, minutes_ago: i64) -> PricePoint {
        PricePoint {
            id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            price,
            change_percent: None,
            volume: None,
            ts: Utc::now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_change_requires_history() {
        // A single fresh point cannot produce a move.
        assert_eq!(fifteen_minute_change(&[point(100.0, 0)]), None);
        // Two points both younger than ten minutes: skip.
        assert_eq!(
            fifteen_minute_change(&[point(100.0, 4), point(98.0, 0)]),
            None
        );
    }

    #[test]
    fn test_change_computed_oldest_to_newest() {
        let window = vec![point(100.0, 14), point(99.0, 7), point(97.9, 0)];
        let change = fifteen_minute_change(&window).unwrap();
        assert!((change - (-2.1)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_price_guard() {
        let window = vec![point(0.0, 14), point(10.0, 0)];
        assert_eq!(fifteen_minute_change(&window), None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // Exactly-at-threshold fires: 2.0% at curious (2.0%).
        let change: f64 = -2.0;
        let threshold = crate::models::Sensitivity::Curious.price_threshold_pct();
        assert!(change.abs() >= threshold);
    }
}
