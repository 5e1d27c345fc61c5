use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ==============================================================================
// Alert Log
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Price,
    News,
    Social,
    Mock,
    Digest,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Price => "price",
            AlertKind::News => "news",
            AlertKind::Social => "social",
            AlertKind::Mock => "mock",
            AlertKind::Digest => "digest",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per delivered push.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertLog {
    pub id: Uuid,
    pub user_id: String,
    pub alert_type: String,
    pub symbol: Option<String>,
    pub content_hash: String,
    pub title: String,
    pub message: String,
    pub url: Option<String>,
    pub metadata: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

// ==============================================================================
// Monitor data
// ==============================================================================

/// Append-only price observation. Retained for 7 days.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricePoint {
    pub id: Uuid,
    pub symbol: String,
    pub price: f64,
    pub change_percent: Option<f64>,
    pub volume: Option<i64>,
    pub ts: DateTime<Utc>,
}

/// Cached news headline, keyed by url.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NewsItemRecord {
    pub id: Uuid,
    pub symbol: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub source_tier: i32,
    pub published_at: DateTime<Utc>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

/// Hourly mention count for one symbol in one forum.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SocialMention {
    pub id: Uuid,
    pub symbol: String,
    pub mention_count: i32,
    pub subreddit: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub baseline_7day: Option<f64>,
}

impl SocialMention {
    /// Spike multiple against the rolling baseline. A zero baseline means the
    /// raw count itself is the spike.
    pub fn spike_multiple(&self) -> f64 {
        match self.baseline_7day {
            Some(baseline) if baseline > 0.0 => self.mention_count as f64 / baseline,
            _ => self.mention_count as f64,
        }
    }
}

/// Candidate suppressed by the daily push budget, waiting for the digest.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DigestItem {
    pub id: Uuid,
    pub user_id: String,
    pub symbol: Option<String>,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub digested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(count: i32, baseline: Option<f64>) -> SocialMention {
        SocialMention {
            id: Uuid::new_v4(),
            symbol: "GME".to_string(),
            mention_count: count,
            subreddit: "stocks".to_string(),
            period_start: Utc::now(),
            period_end: Utc::now(),
            baseline_7day: baseline,
        }
    }

    #[test]
    fn test_spike_multiple() {
        assert_eq!(mention(30, Some(10.0)).spike_multiple(), 3.0);
        assert_eq!(mention(7, Some(0.0)).spike_multiple(), 7.0);
        assert_eq!(mention(7, None).spike_multiple(), 7.0);
    }
}
