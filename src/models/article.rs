use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An article exactly as a source produced it. Created by the fetcher,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub id: Uuid,
    pub source: String,
    pub source_layer: u8,
    pub title: String,
    pub raw_body: Option<String>,
    pub description: Option<String>,
    /// Raw date string as published; normalized later by the cleaning engine.
    pub published_at: Option<String>,
    pub url: String,
    pub initial_tickers: Option<Vec<String>>,
    pub fetch_time: DateTime<Utc>,
    /// True when this article came out of a holdings-targeted query.
    pub is_holdings_news: bool,
    pub source_tag: Option<String>,
}

/// Cleaned, normalized article derived 1:1 from a `RawArticle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedArticle {
    pub id: Uuid,
    pub raw_article_id: Uuid,
    pub url: String,
    pub clean_title: String,
    pub clean_description: String,
    pub clean_body: String,
    /// Uppercase symbols recognized by the ticker vocabulary.
    pub clean_tickers: Vec<String>,
    pub language: String,
    pub source: String,
    pub source_quality_score: f64,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub source_category: Option<String>,
    pub is_holdings_news: bool,
    pub is_low_information: bool,
}

impl CleanedArticle {
    pub fn mentions(&self, symbol: &str) -> bool {
        self.clean_tickers.iter().any(|t| t == symbol)
    }
}

/// Lowercase the url and strip its query string. Used for exact-duplicate
/// detection in the fetcher and the clustering duplicate filter.
pub fn normalize_url(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    match url::Url::parse(&lowered) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        // Not a parseable url; fall back to a plain string strip.
        Err(_) => lowered
            .split(['?', '#'])
            .next()
            .unwrap_or(&lowered)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_strips_query() {
        assert_eq!(
            normalize_url("https://Example.com/News/Item?utm_source=rss&x=1"),
            "https://example.com/news/item"
        );
    }

    #[test]
    fn test_normalize_url_is_idempotent() {
        let once = normalize_url("https://example.com/a?b=c");
        assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn test_normalize_url_garbage_in() {
        assert_eq!(normalize_url("not a url?x=1"), "not a url");
    }
}
