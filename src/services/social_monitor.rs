use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{holding_queries, social_queries};
use crate::errors::AppError;
use crate::models::AlertKind;
use crate::services::alert_service::{self, AlertCandidate, DispatchOutcome};
use crate::services::content_hash;
use crate::services::llm_service::LlmService;
use crate::services::notification_service::NotificationService;

const DEFAULT_SUBREDDITS: &[&str] = &["stocks", "investing", "wallstreetbets"];

#[derive(Debug, Default)]
pub struct SocialMonitorStats {
    pub symbols_checked: usize,
    pub delivered: usize,
    pub digested: usize,
    pub duplicates: usize,
}

/// Counts forum mentions per held symbol over the last hour and alerts when
/// the spike multiple against the 7-day baseline clears the user's
/// sensitivity threshold.
pub struct SocialMonitor {
    pool: PgPool,
    client: reqwest::Client,
    subreddits: Vec<String>,
    notifier: Arc<NotificationService>,
    llm: Arc<LlmService>,
}

impl SocialMonitor {
    pub fn new(pool: PgPool, notifier: Arc<NotificationService>, llm: Arc<LlmService>) -> Self {
        let subreddits = std::env::var("SOCIAL_SUBREDDITS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|subs| !subs.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect());

        Self {
            pool,
            client: reqwest::Client::new(),
            subreddits,
            notifier,
            llm,
        }
    }

    pub async fn run(&self) -> Result<SocialMonitorStats, AppError> {
        let mut stats = SocialMonitorStats::default();
        let symbols = holding_queries::all_symbols(&self.pool).await?;
        let now = Utc::now();

        for symbol in symbols {
            stats.symbols_checked += 1;

            for subreddit in &self.subreddits {
                let count = match self.mention_count(&symbol, subreddit).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!("Mention count failed for {} in r/{}: {}", symbol, subreddit, e);
                        continue;
                    }
                };

                let baseline =
                    social_queries::baseline_7day(&self.pool, &symbol, subreddit).await?;

                social_queries::insert_mention(
                    &self.pool,
                    &symbol,
                    count,
                    subreddit,
                    now - Duration::hours(1),
                    now,
                    baseline,
                )
                .await?;

                // Baseline of zero (or none) means the raw count is the spike.
                let spike = match baseline {
                    Some(b) if b > 0.0 => count as f64 / b,
                    _ => count as f64,
                };

                if count > 0 {
                    self.alert_holders(&symbol, subreddit, count, spike, &mut stats)
                        .await?;
                }
            }
        }

        info!(
            "Social monitor: {} symbols, {} delivered, {} digested, {} dedup hits",
            stats.symbols_checked, stats.delivered, stats.digested, stats.duplicates
        );
        Ok(stats)
    }

    async fn alert_holders(
        &self,
        symbol: &str,
        subreddit: &str,
        count: i32,
        spike: f64,
        stats: &mut SocialMonitorStats,
    ) -> Result<(), AppError> {
        let holders = holding_queries::holders_of(&self.pool, symbol).await?;
        let now = Utc::now();

        for user in holders {
            let threshold = user.sensitivity().social_spike_threshold();
            if spike < threshold {
                continue;
            }

            let spike_str = format!("{:.1}", spike);
            let candidate = AlertCandidate {
                user_id: user.user_id.clone(),
                kind: AlertKind::Social,
                symbol: Some(symbol.to_string()),
                content_hash: content_hash::social_hash(symbol, now),
                title: format!("{} is buzzing ({}x usual)", symbol, spike_str),
                fallback_message: format!(
                    "{} got {} mentions in r/{} over the past hour, about {}x its usual pace.",
                    symbol, count, subreddit, spike_str
                ),
                llm_facts: format!(
                    "symbol={} mentions={} forum=r/{} spike_multiple={}x window=1 hour",
                    symbol, count, subreddit, spike_str
                ),
                url: None,
                metadata: json!({
                    "subreddit": subreddit,
                    "mention_count": count,
                    "spike_multiple": spike,
                }),
                push_data: json!({
                    "alert_type": "social",
                    "symbol": symbol,
                    "spikeMultiple": spike,
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

    /// Posts mentioning the symbol in one forum over the past hour.
    async fn mention_count(&self, symbol: &str, subreddit: &str) -> Result<i32, AppError> {
        let url = format!(
            "https://www.reddit.com/r/{}/search.json?q={}&restrict_sr=1&sort=new&t=hour&limit=100",
            subreddit, symbol
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "marketbrief-monitor/0.1")
            .send()
            .await
            .map_err(|e| AppError::External(format!("reddit request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "reddit returned {}",
                response.status()
            )));
        }

        let listing: RedditListing = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("reddit parse failed: {}", e)))?;

        Ok(listing.data.children.len() as i32)
    }
}

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    children: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_thresholds_by_sensitivity() {
        use crate::models::Sensitivity;
        assert_eq!(Sensitivity::Calm.social_spike_threshold(), 3.0);
        assert_eq!(Sensitivity::Curious.social_spike_threshold(), 2.0);
        assert_eq!(Sensitivity::Alert.social_spike_threshold(), 1.5);
    }

    #[test]
    fn test_zero_baseline_spike_is_count() {
        let count = 7;
        let baseline: Option<f64> = Some(0.0);
        let spike = match baseline {
            Some(b) if b > 0.0 => count as f64 / b,
            _ => count as f64,
        };
        assert_eq!(spike, 7.0);
    }

    #[test]
    fn test_reddit_listing_parse() {
        let body = r#"{"data": {"children": [{"kind": "t3"}, {"kind": "t3"}]}}"#;
        let listing: RedditListing = serde_json::from_str(body).unwrap();
        assert_eq!(listing.data.children.len(), 2);
    }
}
